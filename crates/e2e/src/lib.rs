//! Niffler E2E helpers
//!
//! Waits for the asynchronous side effects of the Niffler services and a
//! small runner for the Kafka/userdata scenarios built on them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 niffler_common::wait_until                  │
//! │        probe ── ready? ── sleep(interval) ── deadline       │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  kafka::KafkaClient<B>       │  db::wait_for_user           │
//! │    ├── anchor(topic)         │  db::wait_for_friendship     │
//! │    ├── await_new_message     │    lookup errors retried     │
//! │    └── send_user_event       │                              │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │  MessageBus                  │  UserdataStore / SpendStore  │
//! │    ├── KafkaBus (rdkafka)    │    ├── PgUserdataStore       │
//! │    └── MemoryBus             │    ├── PgSpendStore          │
//! │                              │    └── SqliteStore           │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  runner::ScenarioRunner  ──▶  SuiteResult (JSON)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod db;
pub mod emulator;
pub mod error;
pub mod kafka;
pub mod runner;

pub use db::{
    wait_for_friendship, wait_for_user, PgSpendStore, PgUserdataStore, SpendStore, SqliteStore,
    UserdataStore,
};
pub use emulator::UserdataEmulator;
pub use error::{E2eError, E2eResult};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBus;
pub use kafka::{Anchor, Anchors, KafkaClient, Matcher, MemoryBus, MessageBus, Record};
pub use runner::{RunnerConfig, Scenario, ScenarioResult, ScenarioRunner, SuiteResult};
