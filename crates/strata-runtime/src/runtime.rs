//! Orchestration environment.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use strata_storage::ManifestClient;
use strata_workflow::{Block, Workflow};

use crate::config::RuntimeConfig;
use crate::event::ExecutionNotifier;
use crate::execution::WorkflowRun;
use crate::executor::EdgeExecutor;

/// Final state of a completed run.
#[derive(Debug)]
pub struct RunResult {
  pub execution_id: String,
  /// Every block, with post-run content, flags, and metadata.
  pub blocks: HashMap<String, Block>,
  /// Per updated block: inlined content (internal) or external metadata
  /// wrapper (external). Kept for callers that consume the flat map shape.
  pub block_results: HashMap<String, Value>,
}

/// The orchestration environment.
///
/// Ties together the planner, edge executor, tiering/persistence, and the
/// event stream. One `Env` can drive many runs; each run owns its blocks.
pub struct Env {
  pub(crate) config: RuntimeConfig,
  pub(crate) client: Arc<ManifestClient>,
  pub(crate) executor: Arc<dyn EdgeExecutor>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
}

impl Env {
  pub fn new(
    config: RuntimeConfig,
    client: Arc<ManifestClient>,
    executor: Arc<dyn EdgeExecutor>,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      config,
      client,
      executor,
      notifier,
    }
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  /// Start a run over a workflow. Call `.wait()` on the returned handle to
  /// drive it to completion.
  pub fn run(&self, workflow: Workflow, cancel: CancellationToken) -> WorkflowRun<'_> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    WorkflowRun::new(self, execution_id, workflow, cancel)
  }
}
