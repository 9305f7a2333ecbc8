//! Experiment Lab: operator tooling for the experimentation engine.
//!
//! Inspects buckets, simulates experiments offline and evaluates flags from
//! JSON fixtures, using the same configuration as the service.

mod simulate;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use experiment_core::bucketing::Bucketer;
use experiment_core::config::AppConfig;
use experiment_core::types::{ExperimentDefinition, FlagDefinition};
use experiment_flags::FeatureFlagManager;
use serde_json::json;
use tracing::{info, warn};

use crate::simulate::Simulation;

#[derive(Parser, Debug)]
#[command(name = "experiment-lab")]
#[command(about = "Operator tooling for experiments and feature flags")]
#[command(version)]
struct Cli {
    /// TOML config file, overlaid by EXPERIMENT_LAB__* variables
    #[arg(long, env = "EXPERIMENT_LAB_CONFIG")]
    config: Option<PathBuf>,

    /// Bucketing seed (overrides config)
    #[arg(long, env = "EXPERIMENT_LAB__BUCKETING_SEED")]
    seed: Option<String>,

    /// Human-readable logs instead of JSON
    #[arg(long, default_value_t = false)]
    plain_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the bucket a subject falls into for a key
    Bucket {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        key: String,
    },
    /// Run synthetic users through an experiment and print the analysis
    Simulate {
        /// Experiment definition (JSON)
        #[arg(long)]
        definition: PathBuf,
        #[arg(long, default_value_t = 1_000)]
        users: u64,
        /// Conversion probability per variant, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        rates: Vec<f64>,
        #[arg(long, default_value_t = 42)]
        rng_seed: u64,
    },
    /// Evaluate a flag for one user from a JSON list of flag definitions
    EvaluateFlag {
        #[arg(long)]
        flags: PathBuf,
        #[arg(long)]
        key: String,
        #[arg(long)]
        user: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "experiment_lab=info,experiment_engine=info,experiment_flags=info".into()
    });
    // Logs go to stderr so command output stays pipeable.
    if cli.plain_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }

    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(seed) = cli.seed {
        config.bucketing_seed = seed;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        p_value_method = ?config.experiments.p_value_method,
        overrides_bypass_disabled = config.flags.overrides_bypass_disabled,
        "Configuration loaded"
    );

    match cli.command {
        Command::Bucket { subject, key } => {
            let bucketer = Bucketer::new(config.bucketing_seed.clone());
            let output = json!({
                "seed": bucketer.seed(),
                "subject": subject,
                "key": key,
                "bucket": bucketer.bucket(&subject, &key),
                "digest": bucketer.digest_hex(&subject, &key),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Simulate {
            definition,
            users,
            rates,
            rng_seed,
        } => {
            let definition: ExperimentDefinition = read_json(&definition)?;
            let simulation = Simulation {
                users,
                rates,
                rng_seed,
            };
            let results = simulate::run(&config, definition, &simulation)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::EvaluateFlag { flags, key, user } => {
            let definitions: Vec<FlagDefinition> = read_json(&flags)?;
            let manager = FeatureFlagManager::new(&config);
            for definition in definitions {
                manager.create_flag(definition)?;
            }
            let evaluation = manager.evaluate(&key, &user);
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
    }

    Ok(())
}

/// An explicit config file must load and validate. Without one, environment
/// problems fall back to defaults.
fn resolve_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(Some(path))
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
