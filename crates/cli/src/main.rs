//! `flow-runner` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a flow JSON file and print its batch plan.
//! - `run`: execute a flow with the built-in processors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use engine::{
    DependencyGraph, EngineError, ExecutorConfig, Flow, FlowExecutor, RunStatus,
};
use nodes::builtin::EchoGenerator;
use nodes::NodeRegistry;

#[derive(Parser)]
#[command(
    name = "flow-runner",
    about = "Dependency-ordered flow execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a flow definition JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
    /// Run a flow and print the outcome as JSON.
    Run {
        /// Path to the flow JSON file.
        path: PathBuf,
        /// Runtime input for an entry node, as `node_id=value`.
        /// The value is parsed as JSON and falls back to a plain string.
        #[arg(long = "input", value_name = "ID=VALUE")]
        inputs: Vec<String>,
        /// Named credential handed to processors, as `name=secret`.
        #[arg(long = "credential", value_name = "NAME=SECRET")]
        credentials: Vec<String>,
        #[arg(long, env = "FLOW_MAX_RETRIES")]
        max_retries: Option<u32>,
        #[arg(long, env = "FLOW_RETRY_BASE_DELAY_MS")]
        retry_base_delay_ms: Option<u64>,
        #[arg(long, env = "FLOW_MAX_CONCURRENCY")]
        max_concurrency: Option<usize>,
        #[arg(long, env = "FLOW_NODE_TIMEOUT_MS")]
        node_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let registry = NodeRegistry::with_builtins(Arc::new(EchoGenerator));

    match cli.command {
        Command::Validate { path } => validate(&path, &registry),
        Command::Run {
            path,
            inputs,
            credentials,
            max_retries,
            retry_base_delay_ms,
            max_concurrency,
            node_timeout_ms,
        } => {
            let flow = load_flow(&path)?;

            let mut config = ExecutorConfig::from_env();
            if let Some(n) = max_retries {
                config.retry.max_retries = n;
            }
            if let Some(ms) = retry_base_delay_ms {
                config.retry.base_delay = Duration::from_millis(ms);
            }
            if let Some(n) = max_concurrency {
                config.max_concurrency = Some(n.max(1));
            }
            if let Some(ms) = node_timeout_ms {
                config.node_timeout = Some(Duration::from_millis(ms));
            }

            let runtime_inputs = inputs
                .iter()
                .map(|raw| {
                    let (id, value) = split_pair(raw)?;
                    let value = serde_json::from_str(value)
                        .unwrap_or_else(|_| Value::String(value.to_string()));
                    Ok((id.to_string(), value))
                })
                .collect::<Result<HashMap<_, _>>>()?;
            let credentials = credentials
                .iter()
                .map(|raw| split_pair(raw).map(|(k, v)| (k.to_string(), v.to_string())))
                .collect::<Result<HashMap<_, _>>>()?;

            info!(flow = %flow.name, nodes = flow.nodes.len(), "running flow");
            let executor = FlowExecutor::new(registry, config).with_credentials(credentials);
            let outcome = executor.run(&flow, runtime_inputs).await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);

            Ok(match outcome.status {
                RunStatus::Stalled => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
    }
}

fn validate(path: &Path, registry: &NodeRegistry) -> Result<ExitCode> {
    let flow = load_flow(path)?;
    let graph = DependencyGraph::build(&flow.nodes, &flow.edges, registry)?;

    for dropped in graph.dropped_edges() {
        println!(
            "dropped edge {} ({} -> {}): {:?}",
            dropped.edge_id, dropped.source, dropped.target, dropped.reason
        );
    }

    match graph.topological_batches() {
        Ok(batches) => {
            println!("flow is valid, {} batch(es):", batches.len());
            for (i, batch) in batches.iter().enumerate() {
                println!("  {i}: {}", batch.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::CycleDetected { nodes }) => {
            eprintln!("validation failed: cycle through {}", nodes.join(", "));
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn load_flow(path: &Path) -> Result<Flow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid flow JSON in {}", path.display()))
}

fn split_pair(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_pair_keeps_equals_in_value() {
        assert_eq!(split_pair("i1=a=b").unwrap(), ("i1", "a=b"));
        assert!(split_pair("novalue").is_err());
        assert!(split_pair("=x").is_err());
    }

    #[test]
    fn cli_parses_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "flow-runner",
            "run",
            "flow.json",
            "--input",
            "i1=hello",
            "--input",
            "i2={\"n\":1}",
            "--max-retries",
            "0",
        ])
        .unwrap();
        match cli.command {
            Command::Run { inputs, max_retries, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(max_retries, Some(0));
            }
            Command::Validate { .. } => panic!("expected run"),
        }
    }
}
