//! Steam - Engine/Compartment Registry Driver
//!
//! Drives the registry through its control interface: scripted scenarios,
//! a race harness for the unsynchronized mode, and a short demo.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use steam_registry::{
    race, ConcurrencyMode, ControlDevice, HandlePolicy, RegistryConfig, Scenario, ScenarioRunner,
};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Application name
pub const APP_NAME: &str = "steam";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default race rounds
pub const RACE_ROUNDS_DEFAULT: usize = 16;

/// Default callers per race round
pub const RACE_CONTENDERS_DEFAULT: usize = 2;

// =============================================================================
// CLI
// =============================================================================

/// Steam - engine/compartment slot registry
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Engine/compartment slot registry behind a control interface")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Identifier seed
    #[arg(long)]
    seed: Option<u64>,

    /// Handle policy (aliasing, checked)
    #[arg(long)]
    policy: Option<HandlePolicy>,

    /// Concurrency mode (racy, serialized)
    #[arg(long)]
    mode: Option<ConcurrencyMode>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a scenario file and print the report
    Run {
        /// Scenario JSON file
        path: PathBuf,
    },
    /// Run the race harness and print the report
    Race {
        /// Rounds per race shape
        #[arg(long, default_value_t = RACE_ROUNDS_DEFAULT)]
        rounds: usize,

        /// Callers per round
        #[arg(long, default_value_t = RACE_CONTENDERS_DEFAULT)]
        contenders: usize,
    },
    /// Run the built-in scenario and one race round
    Demo,
}

impl Cli {
    /// Defaults, then file, then environment, then flags.
    fn registry_config(&self) -> anyhow::Result<RegistryConfig> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::load(path)?,
            None => RegistryConfig::default(),
        }
        .apply_env()?;

        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(policy) = self.policy {
            config.handle_policy = policy;
        }
        if let Some(mode) = self.mode {
            config.concurrency = mode;
        }
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Steam v{}", APP_VERSION);

    let config = cli.registry_config()?;

    match cli.command {
        Cmd::Run { path } => {
            let scenario = Scenario::load(&path)?;
            tracing::info!(path = %path.display(), steps = scenario.steps.len(), "Running scenario");
            run_scenario(&config, &scenario).await?;
        }
        Cmd::Race { rounds, contenders } => {
            if !(2..=race::RACE_CONTENDERS_COUNT_MAX).contains(&contenders) {
                anyhow::bail!(
                    "contenders must be in 2..={}, got {}",
                    race::RACE_CONTENDERS_COUNT_MAX,
                    contenders
                );
            }
            let report = race::run(&config, rounds, contenders).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Cmd::Demo => {
            run_scenario(&config, &Scenario::demo()).await?;
            let report = race::run(&config, 1, RACE_CONTENDERS_DEFAULT).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn run_scenario(config: &RegistryConfig, scenario: &Scenario) -> anyhow::Result<()> {
    let device = ControlDevice::register(config);
    let mut runner = ScenarioRunner::new(device.clone());
    let report = runner.run(scenario).await?;

    if !report.audit.is_empty() {
        tracing::warn!(divergences = report.audit.len(), "Registry diverged from its links");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    device.deregister();
    Ok(())
}
