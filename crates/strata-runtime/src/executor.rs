//! Edge executor seam.
//!
//! Edge bodies (LLM calls, search, transforms) are external collaborators:
//! to the engine each is a function from named input blocks to new content
//! per output block.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use strata_workflow::Edge;

/// One resolved input handed to an edge body.
#[derive(Debug, Clone)]
pub struct EdgeInput {
  /// Alias the edge uses for placeholder substitution.
  pub alias: String,
  /// The input block's content, rendered as JSON.
  pub content: Value,
}

/// Failure of an edge body. Carries a machine-readable kind for the
/// `EDGE_ERROR` event.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
  pub kind: String,
  pub message: String,
}

impl ExecutorError {
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
    }
  }
}

/// Executes edge bodies. Implementations dispatch on `edge.edge_type` and
/// return raw output values keyed by output block id; the runtime owns
/// normalization, tiering, and persistence of those values.
#[async_trait]
pub trait EdgeExecutor: Send + Sync {
  async fn execute(
    &self,
    edge: &Edge,
    inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError>;
}
