use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use strata_runtime::{
  ChannelNotifier, EdgeExecutor, EdgeInput, Env, ExecutorError, RuntimeConfig,
};
use strata_storage::{HttpTransport, ManifestClient, MemoryTransport, StorageConfig,
  StorageTransport};
use strata_workflow::{Edge, Workflow};

/// Strata - a dataflow workflow engine
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow file end to end
  Run {
    /// Path to the workflow file (JSON, version 0.2)
    workflow_file: PathBuf,

    /// Base URL of a storage service; defaults to in-memory storage
    #[arg(long)]
    storage_url: Option<String>,

    /// Content size at which block outputs tier to external storage
    #[arg(long)]
    external_threshold: Option<usize>,

    /// Print execution events as JSON lines to stderr
    #[arg(long)]
    events: bool,
  },
}

/// Copies the first input's content into every output block. Stands in for
/// a real edge body so workflows can be exercised without a provider.
struct PassthroughExecutor;

#[async_trait]
impl EdgeExecutor for PassthroughExecutor {
  async fn execute(
    &self,
    edge: &Edge,
    inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError> {
    let source = inputs
      .values()
      .next()
      .map(|input| input.content.clone())
      .unwrap_or(Value::Null);
    Ok(
      edge
        .outputs
        .keys()
        .map(|block_id| (block_id.clone(), source.clone()))
        .collect(),
    )
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      storage_url,
      external_threshold,
      events,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(
        workflow_file,
        storage_url,
        external_threshold,
        events,
      ))?;
    }
    None => {
      println!("strata - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run_workflow(
  workflow_file: PathBuf,
  storage_url: Option<String>,
  external_threshold: Option<usize>,
  print_events: bool,
) -> Result<()> {
  let raw = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let workflow = Workflow::from_json(&raw)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  eprintln!(
    "Loaded workflow: {} blocks, {} edges",
    workflow.blocks.len(),
    workflow.edges.len()
  );

  let mut storage_config = StorageConfig::default();
  let transport: Arc<dyn StorageTransport> = match storage_url {
    Some(url) => {
      storage_config.base_url = url.clone();
      Arc::new(HttpTransport::new(&url).context("invalid storage url")?)
    }
    None => Arc::new(MemoryTransport::new()),
  };
  let client = Arc::new(ManifestClient::new(transport, storage_config));

  let mut runtime_config = RuntimeConfig::from_env();
  if let Some(threshold) = external_threshold {
    runtime_config.tiering_threshold = threshold;
  }

  let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = receiver.recv().await {
      if print_events {
        match serde_json::to_string(&event) {
          Ok(line) => eprintln!("{line}"),
          Err(err) => eprintln!("failed to encode event: {err}"),
        }
      }
    }
  });

  let env = Env::new(
    runtime_config,
    client,
    Arc::new(PassthroughExecutor),
    Arc::new(ChannelNotifier::new(sender)),
  );

  let cancel = CancellationToken::new();
  let run = env.run(workflow, cancel);
  eprintln!("Execution: {}", run.execution_id());

  let result = run.wait().await.context("workflow execution failed")?;
  drop(env);
  let _ = printer.await;

  println!("{}", serde_json::to_string_pretty(&result.block_results)?);
  Ok(())
}
