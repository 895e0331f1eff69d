//! Kafka bus backed by librdkafka

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use niffler_common::KafkaSettings;

use super::{Anchor, Delivery, MessageBus, Record};
use crate::error::{E2eError, E2eResult};

/// Timeout for metadata and watermark requests
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a produce request to be acknowledged
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer/producer pair against a real cluster
pub struct KafkaBus {
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
}

impl KafkaBus {
    /// Create the clients; no network round trip happens here
    pub fn connect(settings: &KafkaSettings) -> E2eResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.consumer_bootstrap)
            .set("group.id", &settings.group_id)
            .set("client.id", &settings.client_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .create()?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.producer_bootstrap)
            .set("client.id", &settings.client_id)
            .set("message.timeout.ms", "5000")
            .create()?;

        info!(
            "Kafka clients created: producer={}, consumer={}, group={}",
            settings.producer_bootstrap, settings.consumer_bootstrap, settings.group_id
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            producer,
        })
    }

    /// Broker addresses as advertised in cluster metadata
    pub async fn advertised_brokers(&self) -> E2eResult<Vec<String>> {
        let brokers = self
            .blocking(|consumer| {
                let metadata = consumer.fetch_metadata(None, METADATA_TIMEOUT)?;
                Ok(metadata
                    .brokers()
                    .iter()
                    .map(|b| format!("{}:{}", b.host(), b.port()))
                    .collect::<Vec<_>>())
            })
            .await?;
        info!("Advertised brokers: {:?}", brokers);
        Ok(brokers)
    }

    /// Metadata calls block inside librdkafka; keep them off the async workers
    async fn blocking<T, F>(&self, call: F) -> E2eResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StreamConsumer) -> KafkaResult<T> + Send + 'static,
    {
        let consumer = Arc::clone(&self.consumer);
        let result = tokio::task::spawn_blocking(move || call(&consumer))
            .await
            .map_err(|e| E2eError::Bus(format!("metadata task failed: {e}")))?;
        Ok(result?)
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    let value = h.value.map(String::from_utf8_lossy).unwrap_or_default();
                    (h.key.to_string(), value.into_owned())
                })
                .collect()
        })
        .unwrap_or_default();

    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn topics(&self) -> E2eResult<Vec<String>> {
        self.blocking(|consumer| {
            let metadata = consumer.fetch_metadata(None, METADATA_TIMEOUT)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect())
        })
        .await
    }

    async fn partitions(&self, topic: &str) -> E2eResult<Vec<i32>> {
        let name = topic.to_string();
        let partitions = self
            .blocking(move |consumer| {
                let metadata = consumer.fetch_metadata(Some(name.as_str()), METADATA_TIMEOUT)?;
                Ok(metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == name && t.error().is_none())
                    .map(|t| t.partitions().iter().map(|p| p.id()).collect::<Vec<_>>()))
            })
            .await?;

        match partitions {
            Some(ids) if !ids.is_empty() => Ok(ids),
            _ => Err(E2eError::UnknownTopic(topic.to_string())),
        }
    }

    async fn high_watermark(&self, topic: &str, partition: i32) -> E2eResult<i64> {
        let name = topic.to_string();
        let (_low, high) = self
            .blocking(move |consumer| consumer.fetch_watermarks(&name, partition, METADATA_TIMEOUT))
            .await?;
        Ok(high)
    }

    async fn assign(&self, anchors: &[Anchor]) -> E2eResult<()> {
        let mut assignment = TopicPartitionList::new();
        for anchor in anchors {
            assignment.add_partition_offset(
                &anchor.topic,
                anchor.partition,
                Offset::Offset(anchor.offset),
            )?;
        }
        self.consumer.assign(&assignment)?;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> E2eResult<Option<Record>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_record(&message))),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> E2eResult<Delivery> {
        let mut owned = OwnedHeaders::new();
        for &(name, value) in headers {
            owned = owned.insert(Header {
                key: name,
                value: Some(value),
            });
        }

        let mut record = FutureRecord::<str, [u8]>::to(topic)
            .payload(payload)
            .headers(owned);
        if let Some(key) = key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(err, _message)| err)?;

        Ok(Delivery { partition, offset })
    }
}
