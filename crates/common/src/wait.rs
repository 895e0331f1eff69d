//! Poll-until-timeout combinator
//!
//! Asynchronous side effects of the system under test (a Kafka event, a row
//! written by a consumer) become visible at some unknown point. [`wait_until`]
//! calls a probe repeatedly until it yields a usable value or a fixed deadline
//! passes.
//!
//! ```text
//! start ──probe──sleep──probe──sleep── ... ──probe──┐
//!   │                                               │
//!   └──────────── timeout + grace ──────────────────┘ deadline (never moves)
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

use crate::error::WaitError;

/// Default total wait time
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Default pause between probe calls
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Added to the deadline to absorb comparison jitter on the final attempt
pub const DEADLINE_GRACE: Duration = Duration::from_millis(100);

/// Per-call wait parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Total time budget, measured from the first probe call
    pub timeout: Duration,

    /// Pause between consecutive probe calls
    pub interval: Duration,

    /// Return [`WaitError::Timeout`] instead of the empty value
    pub fail_on_timeout: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            fail_on_timeout: false,
        }
    }
}

impl WaitConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            fail_on_timeout: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn fail_on_timeout(mut self, fail: bool) -> Self {
        self.fail_on_timeout = fail;
        self
    }

    /// Shorthand for `fail_on_timeout(true)`
    pub fn strict(self) -> Self {
        self.fail_on_timeout(true)
    }
}

/// Decides whether a probe result counts as "arrived".
///
/// `None`, empty strings and empty collections are not ready. Domain rows
/// are ready as soon as they exist.
pub trait Ready {
    fn is_ready(&self) -> bool;
}

impl<T: Ready> Ready for Option<T> {
    fn is_ready(&self) -> bool {
        self.as_ref().is_some_and(|value| value.is_ready())
    }
}

impl<T: Ready + ?Sized> Ready for &T {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

impl<T: Ready + ?Sized> Ready for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

impl Ready for str {
    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

impl Ready for String {
    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Ready for [T] {
    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Ready for Vec<T> {
    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

impl Ready for serde_json::Value {
    fn is_ready(&self) -> bool {
        match self {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }
}

macro_rules! always_ready {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Ready for $ty {
                fn is_ready(&self) -> bool {
                    true
                }
            }
        )*
    };
}

always_ready!(bool, i32, i64, u32, u64, usize, f64);

/// Call `probe` until it returns a ready value or the deadline passes.
///
/// The probe is called at least once. Errors returned by the probe end the
/// wait immediately; only "not ready yet" is retried. On timeout the last
/// probe value is returned, unless `config.fail_on_timeout` is set.
pub async fn wait_until<T, E, F, Fut>(
    name: &str,
    config: &WaitConfig,
    mut probe: F,
) -> Result<T, WaitError<E>>
where
    T: Ready,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout + DEADLINE_GRACE;
    let mut attempts = 0u32;

    debug!(probe = name, timeout = ?config.timeout, "start waiting");

    loop {
        attempts += 1;
        let result = probe().await.map_err(WaitError::Probe)?;
        if result.is_ready() {
            debug!(probe = name, attempts, elapsed = ?start.elapsed(), "probe ready");
            return Ok(result);
        }

        let now = Instant::now();
        if now >= deadline {
            error!(
                probe = name,
                attempts,
                timeout = ?config.timeout,
                "no result before deadline"
            );
            if config.fail_on_timeout {
                return Err(WaitError::Timeout {
                    probe: name.to_string(),
                    timeout: config.timeout,
                });
            }
            return Ok(result);
        }

        sleep(config.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;
    use test_case::test_case;

    #[test_case(None::<String> => false ; "none")]
    #[test_case(Some(String::new()) => false ; "empty string")]
    #[test_case(Some("x".to_string()) => true ; "non-empty string")]
    fn test_option_string_readiness(value: Option<String>) -> bool {
        value.is_ready()
    }

    #[test]
    fn test_collections_and_json_readiness() {
        assert!(!Vec::<u8>::new().is_ready());
        assert!(vec![0u8].is_ready());
        assert!(!serde_json::Value::Null.is_ready());
        assert!(!serde_json::json!([]).is_ready());
        assert!(!serde_json::json!("").is_ready());
        assert!(serde_json::json!({"username": "alice"}).is_ready());
        assert!(Some(0i64).is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_ready_value_without_extra_calls() {
        let calls = Cell::new(0);
        let config = WaitConfig::default();

        let value = wait_until("third-call", &config, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok::<_, Infallible>((n >= 3).then(|| format!("value-{n}"))) }
        })
        .await
        .unwrap();

        assert_eq!(value.as_deref(), Some("value-3"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_timeout_after_timeout_plus_grace() {
        let config = WaitConfig::new(Duration::from_millis(300), Duration::from_millis(100)).strict();
        let start = Instant::now();

        let err = wait_until("always-none", &config, || async {
            Ok::<Option<String>, Infallible>(None)
        })
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(400), "{elapsed:?}");
        assert!(err.to_string().contains("always-none"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lenient_timeout_returns_empty_value() {
        let config = WaitConfig::new(Duration::from_millis(500), Duration::from_millis(100));

        let value = wait_until("always-empty", &config, || async {
            Ok::<Vec<u8>, Infallible>(Vec::new())
        })
        .await
        .unwrap();

        assert!(value.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_is_not_retried() {
        let calls = Cell::new(0);
        let config = WaitConfig::default().strict();

        let err = wait_until("failing", &config, || {
            calls.set(calls.get() + 1);
            async { Err::<Option<String>, _>("boom") }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Probe("boom")));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_probes_once() {
        let calls = Cell::new(0);
        let config = WaitConfig::new(Duration::ZERO, Duration::from_millis(100));

        let _ = wait_until("zero", &config, || {
            calls.set(calls.get() + 1);
            async { Ok::<Option<String>, Infallible>(None) }
        })
        .await;

        assert!(calls.get() >= 1);
    }
}
