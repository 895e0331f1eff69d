//! Stand-in for niffler-userdata in dry runs
//!
//! Consumes the `users` topic of a [`MemoryBus`] from the beginning and
//! registers every username in a [`SqliteStore`], ignoring duplicates and
//! malformed payloads like the real service does.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use niffler_common::{User, UserName};

use crate::db::SqliteStore;
use crate::error::E2eResult;
use crate::kafka::{Anchor, MemoryBus, MessageBus};

/// Pause between polls when the topic is drained
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Handle to a running emulator; the task stops when the handle is dropped
pub struct UserdataEmulator {
    task: JoinHandle<E2eResult<()>>,
}

impl UserdataEmulator {
    /// Start consuming `topic`; `bus` should be a dedicated [`MemoryBus::connect`] view
    pub fn spawn(bus: MemoryBus, store: SqliteStore, topic: &str) -> Self {
        bus.create_topic(topic, 1);
        let topic = topic.to_string();
        let task = tokio::spawn(async move { consume(bus, store, topic).await });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for UserdataEmulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn consume(bus: MemoryBus, store: SqliteStore, topic: String) -> E2eResult<()> {
    let anchors: Vec<Anchor> = bus
        .partitions(&topic)
        .await?
        .into_iter()
        .map(|partition| Anchor {
            topic: topic.clone(),
            partition,
            offset: 0,
        })
        .collect();
    bus.assign(&anchors).await?;
    info!("Userdata emulator consuming '{}'", topic);

    loop {
        let Some(record) = bus.poll(IDLE_POLL).await? else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        let event: UserName = match record.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!("Emulator skipping offset {}: {}", record.offset, e);
                continue;
            }
        };

        let user = User::registered(uuid::Uuid::new_v4().to_string(), event.username);
        match store.insert_user(&user) {
            Ok(true) => debug!("Emulator registered '{}'", user.username),
            Ok(false) => debug!("Emulator ignored duplicate '{}'", user.username),
            Err(e) => error!(
                "Emulator failed to register '{}' from offset {}: {}",
                user.username, record.offset, e
            ),
        }
    }
}
