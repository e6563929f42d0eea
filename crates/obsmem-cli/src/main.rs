//! obsmem - Observational Memory CLI
//!
//! ## Commands
//!
//! - `plan`: Show which buffered chunks an activation would release
//! - `simulate`: Run a scripted memory lifecycle against a store

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use obsmem_core::{
    plan_activation, ActivationPlan, ActivationResult, ActiveObservationsUpdate,
    BufferedObservationChunk, BufferedReflectionUpdate, NewObservationChunk, ObservationConfig,
    ObservationalMemory, ObservationalMemoryRecord,
};
use obsmem_state::{InMemoryRecordStore, RecordStore, StoreConfig, SurrealRecordStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "obsmem")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Observational memory for long-running agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the activation boundary for a list of chunk sizes
    Plan {
        /// Raw-message token threshold (default: OBSMEM_MESSAGE_TOKENS or 30000)
        #[arg(long)]
        threshold: Option<u64>,

        /// Activation ratio in [0, 1] (default: OBSMEM_BUFFER_ACTIVATION or 0.8)
        #[arg(long)]
        ratio: Option<f64>,

        /// Raw-message tokens currently pending
        #[arg(long)]
        pending: u64,

        /// Message tokens of each buffered chunk, oldest first
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        chunks: Vec<u64>,

        /// Prefer the over-boundary even past the overshoot margin
        #[arg(long)]
        force: bool,
    },

    /// Run a JSON lifecycle script and print the resulting history
    Simulate {
        /// Path to the script file
        script: PathBuf,

        /// Record store backend
        #[arg(long, value_enum, default_value = "memory")]
        store: StoreKind,

        /// SurrealDB URL for `--store surreal` (default: environment, then local)
        #[arg(long, env = "SURREALDB_URL")]
        db_url: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Surreal,
}

/// A lifecycle script for `simulate`.
#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    thread_id: Option<String>,
    resource_id: String,
    /// Falls back to the environment when absent
    #[serde(default)]
    config: Option<ObservationConfig>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    AddPending {
        tokens: u64,
    },
    Observe {
        observations: String,
        token_count: u64,
    },
    Buffer {
        cycle_id: String,
        observations: String,
        token_count: u64,
        message_tokens: u64,
        #[serde(default)]
        message_ids: Vec<String>,
    },
    Activate {
        #[serde(default)]
        force: bool,
    },
    BufferReflection {
        reflection: String,
        token_count: u64,
        #[serde(default)]
        input_token_count: u64,
        line_count: usize,
    },
    Reflect {
        token_count: u64,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::AddPending { .. } => "add_pending",
            Step::Observe { .. } => "observe",
            Step::Buffer { .. } => "buffer",
            Step::Activate { .. } => "activate",
            Step::BufferReflection { .. } => "buffer_reflection",
            Step::Reflect { .. } => "reflect",
        }
    }
}

/// State of the key's head after one script step.
#[derive(Debug, Serialize)]
struct StepReport {
    op: &'static str,
    record_id: String,
    generation: u64,
    pending_message_tokens: u64,
    buffered_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation: Option<ActivationResult>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    steps: Vec<StepReport>,
    /// Newest first
    history: Vec<ObservationalMemoryRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    obsmem_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Plan {
            threshold,
            ratio,
            pending,
            chunks,
            force,
        } => cmd_plan(threshold, ratio, pending, &chunks, force),
        Commands::Simulate {
            script,
            store,
            db_url,
        } => cmd_simulate(&script, store, db_url.as_deref()).await,
    }
}

/// Print the activation plan as JSON
fn cmd_plan(
    threshold: Option<u64>,
    ratio: Option<f64>,
    pending: u64,
    chunks: &[u64],
    force: bool,
) -> Result<()> {
    let plan = build_plan(threshold, ratio, pending, chunks, force)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn build_plan(
    threshold: Option<u64>,
    ratio: Option<f64>,
    pending: u64,
    chunks: &[u64],
    force: bool,
) -> Result<ActivationPlan> {
    let mut config = ObservationConfig::from_env().context("Invalid OBSMEM_* environment")?;
    if let Some(threshold) = threshold {
        config = config.with_message_tokens_threshold(threshold);
    }
    if let Some(ratio) = ratio {
        config = config.with_buffer_activation(ratio);
    }
    config.validate()?;

    let now = Utc::now();
    let buffered: Vec<BufferedObservationChunk> = chunks
        .iter()
        .enumerate()
        .map(|(i, tokens)| {
            NewObservationChunk {
                cycle_id: format!("chunk-{}", i + 1),
                observations: String::new(),
                token_count: 0,
                message_ids: Vec::new(),
                message_tokens: *tokens,
                last_observed_at: now,
                suggested_continuation: None,
                current_task: None,
            }
            .into_chunk()
        })
        .collect();

    let params = config
        .activation_params(pending)
        .with_force_max_activation(force);
    Ok(plan_activation(&buffered, &params))
}

/// Run a lifecycle script and print the report as JSON
async fn cmd_simulate(path: &Path, store: StoreKind, db_url: Option<&str>) -> Result<()> {
    let script = load_script(path)?;
    let om = open_engine(store, db_url).await?;
    let report = run_script(&om, script).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_script(path: &Path) -> Result<Script> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid script {}", path.display()))
}

async fn open_engine(store: StoreKind, db_url: Option<&str>) -> Result<ObservationalMemory> {
    let store: Arc<dyn RecordStore> = match store {
        StoreKind::Memory => Arc::new(InMemoryRecordStore::new()),
        StoreKind::Surreal => {
            let config = match db_url {
                Some(url) => StoreConfig::url(url),
                None => StoreConfig::from_env(),
            };
            let surreal = SurrealRecordStore::open(config)
                .await
                .context("Failed to connect to obsmem database")?;
            Arc::new(surreal)
        }
    };
    Ok(ObservationalMemory::new(store))
}

async fn run_script(om: &ObservationalMemory, script: Script) -> Result<SimulationReport> {
    let config = match script.config {
        Some(config) => config,
        None => ObservationConfig::from_env().context("Invalid OBSMEM_* environment")?,
    };
    config.validate()?;

    let initial = om
        .initialize_observational_memory(
            script.thread_id.as_deref(),
            &script.resource_id,
            config.scope,
            config.to_record_config(),
        )
        .await?;
    let key = initial.scope_key();
    info!(scope_key = %key, steps = script.steps.len(), "running script");

    let mut steps = Vec::with_capacity(script.steps.len());
    for step in script.steps {
        let head = om
            .get_observational_memory(&key)
            .await?
            .with_context(|| format!("No memory for {key}"))?;
        let op = step.name();
        let mut activation = None;

        match step {
            Step::AddPending { tokens } => {
                om.add_pending_message_tokens(&head.id, tokens).await?;
            }
            Step::Observe {
                observations,
                token_count,
            } => {
                om.update_active_observations(
                    &head.id,
                    ActiveObservationsUpdate {
                        observations,
                        token_count,
                        last_observed_at: Utc::now(),
                        observed_message_ids: None,
                    },
                )
                .await?;
            }
            Step::Buffer {
                cycle_id,
                observations,
                token_count,
                message_tokens,
                message_ids,
            } => {
                let now = Utc::now();
                let chunk = NewObservationChunk {
                    cycle_id,
                    observations,
                    token_count,
                    message_ids,
                    message_tokens,
                    last_observed_at: now,
                    suggested_continuation: None,
                    current_task: None,
                };
                om.update_buffered_observations(&head.id, chunk, Some(now))
                    .await?;
            }
            Step::Activate { force } => {
                let params = ObservationConfig::from_record_config(&head.config)?
                    .activation_params(head.pending_message_tokens)
                    .with_force_max_activation(force);
                activation = Some(om.swap_buffered_to_active(&head.id, params).await?);
            }
            Step::BufferReflection {
                reflection,
                token_count,
                input_token_count,
                line_count,
            } => {
                om.update_buffered_reflection(
                    &head.id,
                    BufferedReflectionUpdate {
                        reflection,
                        token_count,
                        input_token_count,
                        reflected_observation_line_count: line_count,
                    },
                )
                .await?;
            }
            Step::Reflect { token_count } => {
                om.swap_buffered_reflection_to_active(&head, token_count)
                    .await?;
            }
        }

        let after = om
            .get_observational_memory(&key)
            .await?
            .with_context(|| format!("No memory for {key}"))?;
        steps.push(StepReport {
            op,
            record_id: after.id.to_string(),
            generation: after.generation_count,
            pending_message_tokens: after.pending_message_tokens,
            buffered_chunks: after.buffered_observation_chunks.len(),
            activation,
        });
    }

    let history = om.get_observational_memory_history(&key, None).await?;
    Ok(SimulationReport { steps, history })
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsmem_core::BoundaryChoice;

    const SCRIPT: &str = r#"{
        "thread_id": "t-sim",
        "resource_id": "r-sim",
        "config": {"message_tokens_threshold": 5000, "buffer_activation": 0.8},
        "steps": [
            {"op": "add_pending", "tokens": 6000},
            {"op": "buffer", "cycle_id": "c1", "observations": "- c1", "token_count": 200, "message_tokens": 2000},
            {"op": "buffer", "cycle_id": "c2", "observations": "- c2", "token_count": 200, "message_tokens": 2000},
            {"op": "buffer", "cycle_id": "c3", "observations": "- c3", "token_count": 200, "message_tokens": 2000},
            {"op": "activate"},
            {"op": "buffer_reflection", "reflection": "R", "token_count": 5, "line_count": 1},
            {"op": "reflect", "token_count": 5}
        ]
    }"#;

    #[test]
    fn test_build_plan_rejects_overshoot() {
        let plan = build_plan(Some(5000), Some(0.8), 6000, &[2000, 2000, 2000], false).unwrap();
        assert_eq!(plan.choice, BoundaryChoice::Under);
        assert_eq!(plan.chunks_to_activate, 2);
    }

    #[test]
    fn test_build_plan_rejects_invalid_ratio() {
        assert!(build_plan(Some(5000), Some(2.0), 6000, &[2000], false).is_err());
    }

    #[test]
    fn test_cli_parses_chunk_list() {
        let cli = Cli::try_parse_from([
            "obsmem", "plan", "--pending", "6000", "--chunks", "2000,2000,2000",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan { chunks, force, .. } => {
                assert_eq!(chunks, vec![2000, 2000, 2000]);
                assert!(!force);
            }
            _ => panic!("expected plan"),
        }
    }

    #[tokio::test]
    async fn test_simulate_script_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(&path, SCRIPT).unwrap();

        let script = load_script(&path).unwrap();
        let om = open_engine(StoreKind::Memory, None).await.unwrap();
        let report = run_script(&om, script).await.unwrap();

        let activate = &report.steps[4];
        assert_eq!(activate.op, "activate");
        assert_eq!(activate.pending_message_tokens, 2000);
        let activation = activate.activation.as_ref().unwrap();
        assert_eq!(activation.chunks_activated, 2);

        let last = report.steps.last().unwrap();
        assert_eq!(last.generation, 1);
        assert_eq!(last.pending_message_tokens, 0);
        assert_eq!(last.buffered_chunks, 1);

        assert_eq!(report.history.len(), 2);
        assert_eq!(report.history[0].active_observations, "R\n\n- c2");
    }

    #[test]
    fn test_load_script_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"steps\": [").unwrap();
        let err = load_script(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid script"));
    }
}
