//! Offset-anchored Kafka waits
//!
//! Several test workers publish to the same shared topics, so "the message my
//! test caused" cannot be identified by position alone. A wait session works
//! in two steps:
//!
//! ```text
//! anchor(topic)            await_new_message(anchors, matcher)
//!   │ high watermark of      │ assign consumer to exactly those offsets
//!   │ every partition        │ poll one record per attempt
//!   ▼                        │ skip malformed / non-matching payloads
//! Anchors ───── moved ──────▶▼
//!                          Record | MessageNotFound
//! ```
//!
//! Capture the anchors *before* triggering the action under test; anything
//! written earlier is never returned.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use niffler_common::wait::{wait_until, Ready, WaitConfig};
use niffler_common::{KafkaSettings, UserName, WaitError};

use crate::error::{E2eError, E2eResult};

#[cfg(feature = "kafka")]
pub mod broker;
pub mod memory;

#[cfg(feature = "kafka")]
pub use broker::KafkaBus;
pub use memory::MemoryBus;

/// Type header the Spring consumers of niffler-userdata dispatch on
pub const USER_TYPE_HEADER: (&str, &str) = ("__TypeId__", "guru.qa.niffler.model.UserJson");

/// A consumed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

impl Record {
    /// Payload decoded as UTF-8 JSON
    pub fn json(&self) -> E2eResult<Value> {
        let bytes = self.payload.as_deref().unwrap_or_default();
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> E2eResult<T> {
        let bytes = self.payload.as_deref().unwrap_or_default();
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Ready for Record {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Where a produced record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Read-start position for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// The anchors of every partition of one topic.
///
/// Not `Clone`: a set is consumed by exactly one polling session.
#[derive(Debug, PartialEq, Eq)]
pub struct Anchors {
    topic: String,
    anchors: Vec<Anchor>,
}

impl Anchors {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Anchored offset of `partition`, if the topic had it at capture time
    pub fn offset(&self, partition: i32) -> Option<i64> {
        self.anchors
            .iter()
            .find(|a| a.partition == partition)
            .map(|a| a.offset)
    }
}

impl fmt::Display for Anchors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.topic)?;
        for (i, anchor) in self.anchors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}", anchor.partition, anchor.offset)?;
        }
        write!(f, "]")
    }
}

type Predicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Content filter applied to decoded payloads
pub struct Matcher {
    description: String,
    predicate: Option<Predicate>,
}

impl Matcher {
    /// Accept any JSON payload
    pub fn any() -> Self {
        Self {
            description: "any payload".to_string(),
            predicate: None,
        }
    }

    /// Accept payloads whose top-level `field` equals `expected`
    pub fn field_eq(field: &str, expected: impl Into<Value>) -> Self {
        let expected = expected.into();
        let field_name = field.to_string();
        Self {
            description: format!("{field} == {expected}"),
            predicate: Some(Box::new(move |payload: &Value| {
                payload.get(&field_name) == Some(&expected)
            })),
        }
    }

    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Some(Box::new(predicate)),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn matches(&self, payload: &Value) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(payload))
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("description", &self.description)
            .finish()
    }
}

/// The queue collaborator: a consumer with explicit assignment plus a producer
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Names of all topics visible to the client
    async fn topics(&self) -> E2eResult<Vec<String>>;

    /// Partition ids of `topic`
    async fn partitions(&self, topic: &str) -> E2eResult<Vec<i32>>;

    /// Offset of the next record that will be appended to the partition
    async fn high_watermark(&self, topic: &str, partition: i32) -> E2eResult<i64>;

    /// Replace the consumer assignment with exactly these positions
    async fn assign(&self, anchors: &[Anchor]) -> E2eResult<()>;

    /// Fetch at most one record, waiting up to `timeout`
    async fn poll(&self, timeout: Duration) -> E2eResult<Option<Record>>;

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> E2eResult<Delivery>;
}

/// Test-facing Kafka helper.
///
/// Holds one consumer assignment at a time: do not run two
/// [`await_new_message`](KafkaClient::await_new_message) sessions on the same
/// client concurrently.
pub struct KafkaClient<B> {
    bus: B,
    settings: KafkaSettings,
}

impl<B: MessageBus> KafkaClient<B> {
    pub fn new(bus: B, settings: KafkaSettings) -> Self {
        Self { bus, settings }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn settings(&self) -> &KafkaSettings {
        &self.settings
    }

    pub async fn topic_names(&self) -> E2eResult<Vec<String>> {
        self.bus.topics().await
    }

    /// Capture the current high watermark of every partition of `topic`
    pub async fn anchor(&self, topic: &str) -> E2eResult<Anchors> {
        let partitions = self.bus.partitions(topic).await?;
        if partitions.is_empty() {
            return Err(E2eError::UnknownTopic(topic.to_string()));
        }

        let mut anchors = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let offset = self.bus.high_watermark(topic, partition).await?;
            anchors.push(Anchor {
                topic: topic.to_string(),
                partition,
                offset,
            });
        }

        let anchors = Anchors {
            topic: topic.to_string(),
            anchors,
        };
        info!("Anchored {}", anchors);
        Ok(anchors)
    }

    /// Wait for the first record after `anchors` whose payload satisfies `matcher`
    pub async fn await_new_message(
        &self,
        anchors: Anchors,
        matcher: &Matcher,
        wait: WaitConfig,
    ) -> E2eResult<Record> {
        self.bus.assign(anchors.as_slice()).await?;

        let wait = wait.strict();
        let deadline = Instant::now() + wait.timeout;
        let poll_timeout = self.settings.poll_timeout();
        let bus = &self.bus;
        let anchors_ref = &anchors;
        let probe_name = format!("new message on {}", anchors.topic());

        let outcome = wait_until(&probe_name, &wait, move || async move {
            // a single poll never outlives the session
            let budget = poll_timeout.min(deadline.saturating_duration_since(Instant::now()));
            bus.poll(budget).await.and_then(|polled| match polled {
                Some(record) => accept(anchors_ref, matcher, record),
                None => Ok(None),
            })
        })
        .await;

        match outcome {
            Ok(Some(record)) => Ok(record),
            Ok(None) | Err(WaitError::Timeout { .. }) => Err(E2eError::MessageNotFound {
                topic: anchors.topic().to_string(),
                expected: matcher.description().to_string(),
                timeout: wait.timeout,
            }),
            Err(WaitError::Probe(e)) => Err(e),
        }
    }

    /// Wait for the registration event of `username`
    pub async fn await_user_event(
        &self,
        anchors: Anchors,
        username: &str,
        wait: WaitConfig,
    ) -> E2eResult<UserName> {
        let matcher = Matcher::field_eq("username", username);
        let record = self.await_new_message(anchors, &matcher, wait).await?;
        record.decode()
    }

    /// Publish `value` as JSON
    pub async fn produce_json(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &Value,
    ) -> E2eResult<Delivery> {
        let payload = serde_json::to_vec(value)?;
        let delivery = self.bus.publish(topic, key, &payload, &[]).await?;
        debug!(
            "Delivered to {} [{}] @ {}",
            topic, delivery.partition, delivery.offset
        );
        Ok(delivery)
    }

    /// Publish a full userdata payload keyed by its id (or username)
    pub async fn produce_user_data(&self, value: &Value) -> E2eResult<Delivery> {
        let key = value
            .get("id")
            .or_else(|| value.get("username"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "unknown".to_string());
        let topic = self.settings.userdata_topic.clone();
        self.produce_json(&topic, Some(&key), value).await
    }

    /// Publish the event niffler-auth emits after a registration
    pub async fn send_user_event(&self, topic: &str, username: &str) -> E2eResult<Delivery> {
        let payload = serde_json::to_vec(&UserName::new(username))?;
        let delivery = self
            .bus
            .publish(topic, None, &payload, &[USER_TYPE_HEADER])
            .await?;
        info!(
            "Sent user event for '{}' to {} [{}] @ {}",
            username, topic, delivery.partition, delivery.offset
        );
        Ok(delivery)
    }
}

/// Decide whether a polled record ends the session
fn accept(anchors: &Anchors, matcher: &Matcher, record: Record) -> E2eResult<Option<Record>> {
    if let Some(start) = anchors.offset(record.partition) {
        if record.offset < start {
            debug!(
                "Ignoring {} [{}] @ {} before anchor {}",
                record.topic, record.partition, record.offset, start
            );
            return Ok(None);
        }
    }

    let payload = match record.json() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                "Skipping malformed payload at {} [{}] @ {}: {}",
                record.topic, record.partition, record.offset, e
            );
            return Ok(None);
        }
    };

    if matcher.matches(&payload) {
        info!(
            "Matched {} at {} [{}] @ {}",
            matcher.description(),
            record.topic,
            record.partition,
            record.offset
        );
        Ok(Some(record))
    } else {
        debug!(
            "Skipping non-matching payload at {} [{}] @ {}",
            record.topic, record.partition, record.offset
        );
        Ok(None)
    }
}
