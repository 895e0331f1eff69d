use niffler_common::{KafkaSettings, UserName, WaitConfig};
use niffler_e2e::kafka::{Delivery, USER_TYPE_HEADER};
use niffler_e2e::{E2eError, KafkaClient, Matcher, MemoryBus, MessageBus};
use serde_json::json;
use std::time::Duration;

fn client_with_topic(topic: &str, partitions: usize) -> KafkaClient<MemoryBus> {
    let bus = MemoryBus::new();
    bus.create_topic(topic, partitions);
    KafkaClient::new(bus, KafkaSettings::default())
}

fn wait(timeout_ms: u64) -> WaitConfig {
    WaitConfig::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(100),
    )
}

async fn publish_json(client: &KafkaClient<MemoryBus>, topic: &str, value: serde_json::Value) {
    client.produce_json(topic, None, &value).await.unwrap();
}

/// Anchoring `users` at offset 5 and publishing a matching payload yields
/// exactly that record.
#[tokio::test(start_paused = true)]
async fn anchored_wait_returns_new_matching_message() {
    let client = client_with_topic("users", 1);
    for i in 0..5 {
        publish_json(&client, "users", json!({ "username": format!("old-{i}") })).await;
    }

    let anchors = client.anchor("users").await.unwrap();
    assert_eq!(anchors.offset(0), Some(5));

    publish_json(&client, "users", json!({ "username": "alice" })).await;

    let record = client
        .await_new_message(anchors, &Matcher::field_eq("username", "alice"), wait(2_000))
        .await
        .unwrap();

    assert_eq!(record.offset, 5);
    assert_eq!(record.json().unwrap(), json!({ "username": "alice" }));
}

/// A message produced while the session is polling is picked up.
#[tokio::test(start_paused = true)]
async fn message_published_during_wait_is_observed() {
    let client = client_with_topic("users", 1);
    let producer = client.bus().connect();

    let anchors = client.anchor("users").await.unwrap();
    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        producer
            .publish("users", None, br#"{"username":"late"}"#, &[])
            .await
            .unwrap();
    });

    let record = client
        .await_new_message(anchors, &Matcher::field_eq("username", "late"), wait(3_000))
        .await
        .unwrap();
    publisher.await.unwrap();

    assert_eq!(record.offset, 0);
}

/// Records written before the anchors were captured are never returned,
/// even when they match.
#[tokio::test(start_paused = true)]
async fn messages_before_anchor_are_never_returned() {
    let client = client_with_topic("users", 1);
    publish_json(&client, "users", json!({ "username": "alice" })).await;

    let anchors = client.anchor("users").await.unwrap();
    publish_json(&client, "users", json!({ "username": "bob" })).await;

    let err = client
        .await_new_message(anchors, &Matcher::field_eq("username", "alice"), wait(500))
        .await
        .unwrap_err();

    match err {
        E2eError::MessageNotFound {
            topic,
            expected,
            timeout,
        } => {
            assert_eq!(topic, "users");
            assert_eq!(expected, r#"username == "alice""#);
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected MessageNotFound, got {other}"),
    }
}

/// Malformed and non-matching payloads are skipped without ending the session.
#[tokio::test(start_paused = true)]
async fn malformed_and_foreign_payloads_are_skipped() {
    let client = client_with_topic("users", 1);
    let anchors = client.anchor("users").await.unwrap();

    client
        .bus()
        .publish("users", None, b"not a json", &[])
        .await
        .unwrap();
    publish_json(&client, "users", json!({ "foo": "bar" })).await;
    publish_json(&client, "users", json!({ "username": "alice" })).await;

    let record = client
        .await_new_message(anchors, &Matcher::field_eq("username", "alice"), wait(2_000))
        .await
        .unwrap();
    assert_eq!(record.offset, 2);
}

/// A strict wait on a silent topic fails after the configured timeout and
/// not much later.
#[tokio::test(start_paused = true)]
async fn silent_topic_times_out_on_schedule() {
    let client = client_with_topic("users", 1);
    let anchors = client.anchor("users").await.unwrap();

    let start = tokio::time::Instant::now();
    let err = client
        .await_new_message(anchors, &Matcher::any(), wait(300))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, E2eError::MessageNotFound { .. }));
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(500), "elapsed {elapsed:?}");
}

/// Every partition is anchored at its own watermark.
#[tokio::test]
async fn anchors_cover_every_partition() {
    let client = client_with_topic("users", 3);
    for key in ["a", "b", "c", "a"] {
        client
            .produce_json("users", Some(key), &json!({ "username": key }))
            .await
            .unwrap();
    }

    let anchors = client.anchor("users").await.unwrap();
    assert_eq!(anchors.as_slice().len(), 3);

    let total: i64 = anchors.as_slice().iter().map(|a| a.offset).sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn anchoring_unknown_topic_fails() {
    let client = client_with_topic("users", 1);
    assert!(matches!(
        client.anchor("spends").await,
        Err(E2eError::UnknownTopic(_))
    ));
}

/// The registration event carries the Spring type header and decodes back.
#[tokio::test(start_paused = true)]
async fn user_event_roundtrip() {
    let client = client_with_topic("users", 1);
    let anchors = client.anchor("users").await.unwrap();

    let delivery = client.send_user_event("users", "duck").await.unwrap();
    assert_eq!(delivery, Delivery { partition: 0, offset: 0 });

    let record = &client.bus().records("users")[0];
    assert_eq!(record.header(USER_TYPE_HEADER.0), Some(USER_TYPE_HEADER.1));

    let event = client
        .await_user_event(anchors, "duck", wait(1_000))
        .await
        .unwrap();
    assert_eq!(event, UserName::new("duck"));
}

#[tokio::test]
async fn userdata_payload_is_keyed_by_id() {
    let client = KafkaClient::new(MemoryBus::new(), KafkaSettings::default());

    client
        .produce_user_data(&json!({ "id": "1f0c", "username": "duck", "currency": "RUB" }))
        .await
        .unwrap();
    client
        .produce_user_data(&json!({ "username": "goose" }))
        .await
        .unwrap();

    let records = client.bus().records("userdata");
    let keys: Vec<_> = records.iter().map(|r| r.key.clone().unwrap()).collect();
    assert_eq!(keys, [b"1f0c".to_vec(), b"goose".to_vec()]);
    assert_eq!(client.topic_names().await.unwrap(), ["userdata"]);
}
