//! In-process message bus
//!
//! Partitioned append-only logs with the same assign/poll/watermark
//! semantics as a broker. Used by the test suite and for dry runs of the
//! scenarios without infrastructure.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Anchor, Delivery, MessageBus, Record};
use crate::error::{E2eError, E2eResult};

#[derive(Default)]
struct Log {
    topics: BTreeMap<String, Vec<Vec<Record>>>,
}

#[derive(Default)]
struct Cursor {
    positions: Vec<Anchor>,
    next: usize,
}

/// One consumer/producer view over a shared in-memory log.
///
/// [`MemoryBus::connect`] opens another view on the same log with its own
/// assignment, like a second client against the same cluster.
pub struct MemoryBus {
    log: Arc<Mutex<Log>>,
    cursor: Mutex<Cursor>,
    auto_create_partitions: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            cursor: Mutex::new(Cursor::default()),
            auto_create_partitions: 1,
        }
    }

    /// A new client on the same log
    pub fn connect(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            cursor: Mutex::new(Cursor::default()),
            auto_create_partitions: self.auto_create_partitions,
        }
    }

    /// Create `topic` with `partitions` partitions; existing topics are kept
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut log = self.log.lock();
        log.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1)]);
    }

    /// Every record of `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let log = self.log.lock();
        log.topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn topics(&self) -> E2eResult<Vec<String>> {
        Ok(self.log.lock().topics.keys().cloned().collect())
    }

    async fn partitions(&self, topic: &str) -> E2eResult<Vec<i32>> {
        let log = self.log.lock();
        let partitions = log
            .topics
            .get(topic)
            .ok_or_else(|| E2eError::UnknownTopic(topic.to_string()))?;
        Ok((0..partitions.len() as i32).collect())
    }

    async fn high_watermark(&self, topic: &str, partition: i32) -> E2eResult<i64> {
        let log = self.log.lock();
        log.topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map(|records| records.len() as i64)
            .ok_or_else(|| E2eError::UnknownTopic(format!("{topic} [{partition}]")))
    }

    async fn assign(&self, anchors: &[Anchor]) -> E2eResult<()> {
        let mut cursor = self.cursor.lock();
        cursor.positions = anchors.to_vec();
        cursor.next = 0;
        Ok(())
    }

    /// Returns immediately when no assigned partition has a pending record
    async fn poll(&self, _timeout: Duration) -> E2eResult<Option<Record>> {
        let log = self.log.lock();
        let mut cursor = self.cursor.lock();
        let assigned = cursor.positions.len();

        for step in 0..assigned {
            let slot = (cursor.next + step) % assigned;
            let position = &cursor.positions[slot];
            let pending = log
                .topics
                .get(&position.topic)
                .and_then(|partitions| partitions.get(position.partition as usize))
                .and_then(|records| records.get(position.offset as usize))
                .cloned();

            if let Some(record) = pending {
                cursor.positions[slot].offset += 1;
                cursor.next = (slot + 1) % assigned;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> E2eResult<Delivery> {
        let mut log = self.log.lock();
        let partitions = log
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.auto_create_partitions]);

        let partition = match key {
            Some(key) => key.bytes().map(usize::from).sum::<usize>() % partitions.len(),
            None => partitions.iter().map(Vec::len).sum::<usize>() % partitions.len(),
        };
        let records = &mut partitions[partition];
        let offset = records.len() as i64;

        records.push(Record {
            topic: topic.to_string(),
            partition: partition as i32,
            offset,
            key: key.map(|k| k.as_bytes().to_vec()),
            payload: Some(payload.to_vec()),
            headers: headers
                .iter()
                .map(|&(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        });

        Ok(Delivery {
            partition: partition as i32,
            offset,
        })
    }
}
