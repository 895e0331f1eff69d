//! Checks against a running Niffler stack.
//!
//! Endpoints come from the environment (`NIFFLER_KAFKA_ADDRESS_CONSUMER`,
//! `NIFFLER_USERDATA_DB_URL`, ...). Run with:
//! `cargo test --package niffler-e2e --test live -- --ignored`
#![cfg(feature = "kafka")]

use niffler_common::Settings;
use niffler_e2e::{
    KafkaBus, KafkaClient, PgUserdataStore, RunnerConfig, Scenario, ScenarioRunner,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runner() -> ScenarioRunner<KafkaBus, PgUserdataStore> {
    init_logging();
    let settings = Settings::from_env().unwrap();
    let kafka = settings.kafka.with_unique_group();
    let bus = KafkaBus::connect(&kafka).unwrap();

    ScenarioRunner::new(
        KafkaClient::new(bus, kafka),
        PgUserdataStore::new(&settings.database.userdata_url),
        RunnerConfig {
            waits: settings.waits.clone(),
            ..RunnerConfig::default()
        },
    )
}

#[tokio::test]
#[ignore]
async fn live_user_event_roundtrip() {
    let mut runner = runner();
    let result = runner.run_scenario(Scenario::UserEventRoundtrip).await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
#[ignore]
async fn live_userdata_scenarios() {
    let mut runner = runner();
    let suite = runner
        .run_scenarios(&[
            Scenario::UserdataConsumesUserEvent,
            Scenario::UserdataIdempotentOnDuplicates,
            Scenario::UserdataHandlesMultipleMessages,
        ])
        .await;
    assert!(suite.success(), "{:#?}", suite.results);
}

#[tokio::test]
#[ignore]
async fn live_brokers_advertise_users_topic() {
    init_logging();
    let settings = Settings::from_env().unwrap();
    let bus = KafkaBus::connect(&settings.kafka).unwrap();
    let client = KafkaClient::new(bus, settings.kafka.clone());

    assert!(!client.bus().advertised_brokers().await.unwrap().is_empty());
    assert!(client
        .topic_names()
        .await
        .unwrap()
        .contains(&settings.kafka.users_topic));
}
