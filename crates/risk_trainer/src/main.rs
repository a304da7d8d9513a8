//! Migraine risk trainer CLI
//!
//! Trains models from a JSON log export and serves one-off predictions
//! against the resulting model store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migraine_risk_core::{ConfigManager, InMemoryLogStore, Predictor, RiskConfig};
use migraine_risk_trainer::{BatchMode, RetrainAdvisor, RiskTrainer};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "risk-trainer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train and query next-day migraine risk models", long_about = None)]
struct Args {
    /// JSON array of daily log records
    #[arg(short, long, global = true)]
    logs: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model store directory
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the population occurrence model
    TrainGlobal,
    /// Train the population severity model
    TrainSeverity,
    /// Train one user's personal model
    TrainUser {
        #[arg(long)]
        user: u64,
    },
    /// Train every user's personal model
    TrainAll {
        /// Only users whose model is missing or stale
        #[arg(long)]
        only_stale: bool,
        /// Worker threads (defaults to the number of CPUs)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Retrain advice for the global model, or one user's
    Status {
        #[arg(long)]
        user: Option<u64>,
    },
    /// Predict next-day risk for one user
    Predict {
        #[arg(long)]
        user: u64,
        /// Skip the feature attribution
        #[arg(long)]
        no_explain: bool,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

fn load_config(args: &Args) -> Result<RiskConfig> {
    let manager = ConfigManager::new();
    if let Some(path) = &args.config {
        manager
            .load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
    }
    manager.load_from_env().context("Invalid environment override")?;
    let mut config = manager.get_config();
    if let Some(dir) = &args.model_dir {
        config.model_dir = dir.clone();
        manager.update_config(config.clone());
    }
    manager.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_logs(args: &Args) -> Result<InMemoryLogStore> {
    let path = args
        .logs
        .as_ref()
        .context("--logs <file.json> is required for this command")?;
    let store = InMemoryLogStore::from_json_file(path)
        .with_context(|| format!("Failed to load logs from {}", path.display()))?;
    info!("Loaded {} records from {}", store.len(), path.display());
    Ok(store)
}

fn run(args: &Args) -> Result<Value> {
    let config = load_config(args)?;

    let output = match args.command {
        Command::CheckConfig => {
            let warnings = config.validate()?;
            json!({ "ok": true, "config": config, "warnings": warnings })
        }
        Command::Predict { user, no_explain } => {
            let logs = load_logs(args)?;
            let predictor = Predictor::new(config).context("Failed to set up predictor")?;
            predictor
                .predict_next_day_risk(&logs, user, !no_explain)
                .context("Prediction failed")?
                .to_json()
        }
        Command::TrainGlobal => {
            let logs = load_logs(args)?;
            trainer(config)?.train_global_occurrence(&logs)?.to_json()
        }
        Command::TrainSeverity => {
            let logs = load_logs(args)?;
            trainer(config)?.train_global_severity(&logs)?.to_json()
        }
        Command::TrainUser { user } => {
            let logs = load_logs(args)?;
            trainer(config)?.train_user_occurrence(&logs, user)?.to_json()
        }
        Command::TrainAll {
            only_stale,
            threads,
        } => {
            let logs = load_logs(args)?;
            let mode = if only_stale {
                BatchMode::OnlyStale
            } else {
                BatchMode::All
            };
            trainer(config)?.train_all_users(&logs, mode, threads)?.to_json()
        }
        Command::Status { user } => {
            let logs = load_logs(args)?;
            let trainer = trainer(config)?;
            let advisor = RetrainAdvisor::new(&trainer);
            match user {
                Some(id) => {
                    let decision = advisor.user(&logs, id)?;
                    json!({ "ok": true, "user_id": id, "decision": decision })
                }
                None => {
                    let decision = advisor.global(&logs)?;
                    json!({ "ok": true, "scope": "global", "decision": decision })
                }
            }
        }
    };
    Ok(output)
}

fn trainer(config: RiskConfig) -> Result<RiskTrainer> {
    let trainer = RiskTrainer::new(config).context("Failed to set up trainer")?;
    info!("Model store: {}", trainer.store().base().display());
    Ok(trainer)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Migraine risk trainer v{}", env!("CARGO_PKG_VERSION"));

    let output = run(&args)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to encode output")?
    );
    Ok(())
}
