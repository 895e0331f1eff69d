//! Scenario runner for the Kafka/userdata checks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use niffler_common::{TestData, WaitConfig, WaitSettings};

use crate::db::{wait_for_user, UserdataStore};
use crate::error::{E2eError, E2eResult};
use crate::kafka::{KafkaClient, MessageBus};

/// The runnable scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Anchor `users`, publish a registration event and observe it
    UserEventRoundtrip,
    /// A published event ends up as exactly one `user` row
    UserdataConsumesUserEvent,
    /// Publishing the same user twice keeps one row with the same id
    UserdataIdempotentOnDuplicates,
    /// Several events in a row all end up in the database
    UserdataHandlesMultipleMessages,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::UserEventRoundtrip,
        Scenario::UserdataConsumesUserEvent,
        Scenario::UserdataIdempotentOnDuplicates,
        Scenario::UserdataHandlesMultipleMessages,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::UserEventRoundtrip => "user-event-roundtrip",
            Scenario::UserdataConsumesUserEvent => "userdata-consumes-user-event",
            Scenario::UserdataIdempotentOnDuplicates => "userdata-idempotent-on-duplicates",
            Scenario::UserdataHandlesMultipleMessages => "userdata-handles-multiple-messages",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| E2eError::ScenarioNotFound(s.to_string()))
    }
}

/// Outcome of one step inside a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Result of running several scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub waits: WaitSettings,

    /// How long to give the consumer before checking a duplicate was ignored
    pub duplicate_settle: Duration,

    /// Budget for re-reading a row that is already known to exist
    pub recheck_timeout: Duration,

    /// Messages published by the multiple-messages scenario
    pub batch_size: usize,

    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            waits: WaitSettings::default(),
            duplicate_settle: Duration::from_secs(1),
            recheck_timeout: Duration::from_secs(5),
            batch_size: 3,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

#[derive(Default)]
struct Steps {
    results: Vec<StepResult>,
}

impl Steps {
    async fn run<T, Fut>(&mut self, name: &str, step: Fut) -> E2eResult<T>
    where
        Fut: Future<Output = E2eResult<T>>,
    {
        let start = Instant::now();
        let outcome = step.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => debug!("  step '{}' ok ({} ms)", name, duration_ms),
            Err(e) => warn!("  step '{}' failed: {}", name, e),
        }
        self.results.push(StepResult {
            name: name.to_string(),
            success: outcome.is_ok(),
            duration_ms,
            error: outcome.as_ref().err().map(ToString::to_string),
        });
        outcome
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}

/// Runs scenarios against one message bus and one userdata store
pub struct ScenarioRunner<B, S> {
    kafka: KafkaClient<B>,
    store: S,
    config: RunnerConfig,
    data: TestData,
}

impl<B: MessageBus, S: UserdataStore> ScenarioRunner<B, S> {
    pub fn new(kafka: KafkaClient<B>, store: S, config: RunnerConfig) -> Self {
        Self::with_data(kafka, store, config, TestData::new())
    }

    /// Runner with a caller-provided generator, e.g. a seeded one
    pub fn with_data(kafka: KafkaClient<B>, store: S, config: RunnerConfig, data: TestData) -> Self {
        Self {
            kafka,
            store,
            config,
            data,
        }
    }

    pub fn kafka(&self) -> &KafkaClient<B> {
        &self.kafka
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every scenario
    pub async fn run_all(&mut self) -> SuiteResult {
        self.run_scenarios(&Scenario::ALL).await
    }

    /// Run one scenario by name
    pub async fn run_named(&mut self, name: &str) -> E2eResult<SuiteResult> {
        let scenario: Scenario = name.parse()?;
        Ok(self.run_scenarios(&[scenario]).await)
    }

    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(scenarios.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", scenarios.len());

        for &scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    pub async fn run_scenario(&mut self, scenario: Scenario) -> ScenarioResult {
        let start = Instant::now();
        debug!("Running scenario: {}", scenario);

        let mut steps = Steps::default();
        let outcome = match scenario {
            Scenario::UserEventRoundtrip => {
                let username = self.data.username();
                self.user_event_roundtrip(&mut steps, &username).await
            }
            Scenario::UserdataConsumesUserEvent => {
                let username = self.data.username();
                let outcome = self.consumes_user_event(&mut steps, &username).await;
                self.cleanup(&mut steps, &[username]).await;
                outcome
            }
            Scenario::UserdataIdempotentOnDuplicates => {
                let username = self.data.username();
                let outcome = self.idempotent_on_duplicates(&mut steps, &username).await;
                self.cleanup(&mut steps, &[username]).await;
                outcome
            }
            Scenario::UserdataHandlesMultipleMessages => {
                let usernames: Vec<String> =
                    (0..self.config.batch_size).map(|_| self.data.username()).collect();
                let outcome = self.handles_multiple_messages(&mut steps, &usernames).await;
                self.cleanup(&mut steps, &usernames).await;
                outcome
            }
        };

        ScenarioResult {
            name: scenario.name().to_string(),
            success: outcome.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps: steps.results,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    fn users_topic(&self) -> &str {
        &self.kafka.settings().users_topic
    }

    async fn user_event_roundtrip(&self, steps: &mut Steps, username: &str) -> E2eResult<()> {
        let topic = self.users_topic();

        let anchors = steps.run("anchor users topic", self.kafka.anchor(topic)).await?;
        steps
            .run(
                "publish user event",
                self.kafka.send_user_event(topic, username),
            )
            .await?;
        let event = steps
            .run(
                "await user event",
                self.kafka
                    .await_user_event(anchors, username, self.config.waits.kafka()),
            )
            .await?;

        ensure(event.username == username, || {
            format!("event carries '{}', expected '{}'", event.username, username)
        })
    }

    async fn consumes_user_event(&self, steps: &mut Steps, username: &str) -> E2eResult<()> {
        steps
            .run(
                "publish user event",
                self.kafka.send_user_event(self.users_topic(), username),
            )
            .await?;
        let user = steps
            .run(
                "wait for user row",
                wait_for_user(&self.store, username, self.config.waits.db()),
            )
            .await?;
        ensure(user.username == username, || {
            format!("row has username '{}'", user.username)
        })?;

        self.expect_single_row(steps, username).await
    }

    async fn idempotent_on_duplicates(&self, steps: &mut Steps, username: &str) -> E2eResult<()> {
        let topic = self.users_topic();

        steps
            .run(
                "publish user event",
                self.kafka.send_user_event(topic, username),
            )
            .await?;
        let first = steps
            .run(
                "wait for user row",
                wait_for_user(&self.store, username, self.config.waits.db()),
            )
            .await?;
        self.expect_single_row(steps, username).await?;

        steps
            .run(
                "publish duplicate event",
                self.kafka.send_user_event(topic, username),
            )
            .await?;
        tokio::time::sleep(self.config.duplicate_settle).await;
        self.expect_single_row(steps, username).await?;

        let recheck = WaitConfig::new(self.config.recheck_timeout, self.config.waits.db().interval);
        let second = steps
            .run(
                "re-read user row",
                wait_for_user(&self.store, username, recheck),
            )
            .await?;
        ensure(first.id == second.id, || {
            format!("row id changed from {} to {}", first.id, second.id)
        })
    }

    async fn handles_multiple_messages(
        &self,
        steps: &mut Steps,
        usernames: &[String],
    ) -> E2eResult<()> {
        for username in usernames {
            steps
                .run("remove leftovers", self.store.delete_user_by_username(username))
                .await?;
        }

        let topic = self.users_topic();
        for username in usernames {
            steps
                .run(
                    "publish user event",
                    self.kafka.send_user_event(topic, username),
                )
                .await?;
        }

        for username in usernames {
            let user = steps
                .run(
                    "wait for user row",
                    wait_for_user(&self.store, username, self.config.waits.db()),
                )
                .await?;
            ensure(&user.username == username, || {
                format!("row has username '{}'", user.username)
            })?;
            self.expect_single_row(steps, username).await?;
        }
        Ok(())
    }

    async fn expect_single_row(&self, steps: &mut Steps, username: &str) -> E2eResult<()> {
        let count = steps
            .run(
                "count user rows",
                self.store.count_users_by_username(username),
            )
            .await?;
        ensure(count == 1, || {
            format!("expected exactly one row for '{username}', found {count}")
        })
    }

    /// Cleanup failures are recorded as steps but never fail the scenario
    async fn cleanup(&self, steps: &mut Steps, usernames: &[String]) {
        for username in usernames {
            let _ = steps
                .run("delete user", self.store.delete_user_by_username(username))
                .await;
        }
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.config.output_dir, results)
    }
}

/// Write suite results as `scenario-results.json` under `output_dir`
pub fn write_results(output_dir: &Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("scenario-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("user-event-roundtrip", Scenario::UserEventRoundtrip)]
    #[test_case("userdata-consumes-user-event", Scenario::UserdataConsumesUserEvent)]
    #[test_case("userdata-idempotent-on-duplicates", Scenario::UserdataIdempotentOnDuplicates)]
    #[test_case("userdata-handles-multiple-messages", Scenario::UserdataHandlesMultipleMessages)]
    fn test_scenario_names(name: &str, expected: Scenario) {
        assert_eq!(name.parse::<Scenario>().unwrap(), expected);
        assert_eq!(expected.to_string(), name);
    }

    #[test]
    fn test_unknown_scenario() {
        assert!(matches!(
            "invalid-messages".parse::<Scenario>(),
            Err(E2eError::ScenarioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_steps_record_failures() {
        let mut steps = Steps::default();
        steps.run("ok", async { Ok(1) }).await.unwrap();
        let failed: E2eResult<()> = steps
            .run("boom", async { ensure(false, || "nope".to_string()) })
            .await;

        assert!(failed.is_err());
        assert!(steps.results[0].success);
        assert_eq!(
            steps.results[1].error.as_deref(),
            Some("Assertion failed: nope")
        );
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let suite = SuiteResult {
            total: 1,
            passed: 1,
            failed: 0,
            duration_ms: 12,
            results: vec![ScenarioResult {
                name: "user-event-roundtrip".to_string(),
                success: true,
                duration_ms: 12,
                steps: vec![],
                error: None,
            }],
        };

        let path = write_results(&dir.path().join("out"), &suite).unwrap();
        let parsed: SuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.results[0].name, "user-event-roundtrip");
        assert!(parsed.success());
    }
}
