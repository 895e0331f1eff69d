//! Niffler E2E Common Library
//!
//! Wait primitives, domain models, configuration and test data shared by the
//! Niffler end-to-end toolkit.

pub mod config;
pub mod error;
pub mod models;
pub mod testdata;
pub mod wait;

// Re-export commonly used types
pub use config::{DatabaseSettings, KafkaSettings, Settings, WaitSettings};
pub use error::{Error, Result, WaitError};
pub use models::{Category, CurrencyValues, Friendship, FriendshipStatus, User, UserName};
pub use testdata::TestData;
pub use wait::{wait_until, Ready, WaitConfig};

/// Toolkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
