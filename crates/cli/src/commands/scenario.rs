//! Scenario Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;

use niffler_common::Settings;
use niffler_e2e::runner::ScenarioResult;
use niffler_e2e::{
    KafkaBus, KafkaClient, MemoryBus, MessageBus, PgUserdataStore, RunnerConfig, Scenario,
    ScenarioRunner, SqliteStore, SuiteResult, UserdataEmulator, UserdataStore,
};

use crate::output::{print_error, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ScenarioCommands {
    /// List available scenarios
    List,

    /// Run scenarios against the configured stack
    Run {
        /// Run only this scenario
        #[arg(short, long)]
        name: Option<String>,

        /// Directory for scenario-results.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use an in-memory bus and database with an emulated userdata service
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: usize,
    pub error: Option<String>,
}

impl From<&ScenarioResult> for ScenarioDisplay {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            name: result.name.clone(),
            success: result.success,
            duration_ms: result.duration_ms,
            steps: result.steps.len(),
            error: result.error.clone(),
        }
    }
}

impl TableDisplay for ScenarioDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Result", "Duration", "Steps", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            if self.success { "✓ passed" } else { "✗ failed" }.to_string(),
            format!("{} ms", self.duration_ms),
            self.steps.to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Serialize)]
pub struct ScenarioName {
    pub name: &'static str,
}

impl TableDisplay for ScenarioName {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.to_string()]
    }
}

pub async fn execute(cmd: ScenarioCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    match cmd {
        ScenarioCommands::List => {
            let names: Vec<ScenarioName> = Scenario::ALL
                .iter()
                .map(|s| ScenarioName { name: s.name() })
                .collect();
            print_list(&names, format);
            Ok(())
        }

        ScenarioCommands::Run {
            name,
            output,
            dry_run,
        } => {
            let mut config = RunnerConfig {
                waits: settings.waits.clone(),
                ..RunnerConfig::default()
            };
            if let Some(dir) = output {
                config.output_dir = dir;
            }

            if dry_run {
                let bus = MemoryBus::new();
                let store = SqliteStore::open_memory()?;
                let _emulator = UserdataEmulator::spawn(
                    bus.connect(),
                    store.clone(),
                    &settings.kafka.users_topic,
                );
                let client = KafkaClient::new(bus, settings.kafka.clone());
                run(ScenarioRunner::new(client, store, config), name.as_deref(), format).await
            } else {
                let kafka = settings.kafka.with_unique_group();
                let client = KafkaClient::new(KafkaBus::connect(&kafka)?, kafka);
                let store = PgUserdataStore::new(&settings.database.userdata_url);
                run(ScenarioRunner::new(client, store, config), name.as_deref(), format).await
            }
        }
    }
}

async fn run<B, S>(
    mut runner: ScenarioRunner<B, S>,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<()>
where
    B: MessageBus,
    S: UserdataStore,
{
    let suite: SuiteResult = match name {
        Some(name) => runner.run_named(name).await?,
        None => runner.run_all().await,
    };

    let rows: Vec<ScenarioDisplay> = suite.results.iter().map(ScenarioDisplay::from).collect();
    print_list(&rows, format);

    let path = runner.write_results(&suite)?;
    if suite.success() {
        print_success(&format!(
            "{}/{} scenario(s) passed; results in {}",
            suite.passed,
            suite.total,
            path.display()
        ));
        Ok(())
    } else {
        print_error(&format!("{} scenario(s) failed", suite.failed));
        bail!("scenario run failed")
    }
}
