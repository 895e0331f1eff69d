//! CLI Commands

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use niffler_common::{Settings, WaitConfig};

pub mod db;
pub mod kafka;
pub mod scenario;

/// Settings from `path` if given, otherwise from the environment
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Settings::from_env().context("failed to read settings from environment"),
    }
}

/// `wait` with its timeout replaced by `--timeout` seconds, if given
pub fn with_timeout(wait: WaitConfig, timeout_secs: Option<u64>) -> WaitConfig {
    match timeout_secs {
        Some(secs) => wait.timeout(Duration::from_secs(secs)),
        None => wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_override() {
        let base = WaitConfig::default().strict();
        assert_eq!(with_timeout(base, Some(3)).timeout, Duration::from_secs(3));
        assert_eq!(with_timeout(base, None).timeout, base.timeout);
        assert!(with_timeout(base, Some(3)).fail_on_timeout);
    }
}
