//! Edges: units of computation between blocks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of computation consuming named input blocks and producing named
/// output blocks.
///
/// Edges are immutable once loaded and reference blocks by id only; the
/// runtime owns the blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub id: String,
  /// Executor-facing kind, e.g. "llm" or "search". Opaque to the engine.
  pub edge_type: String,
  /// Input block id -> alias used inside the edge body.
  pub inputs: HashMap<String, String>,
  /// Output block id -> alias.
  pub outputs: HashMap<String, String>,
  /// Type-specific configuration, passed through to the executor.
  #[serde(default)]
  pub config: Value,
}

impl Edge {
  pub fn new(id: impl Into<String>, edge_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      edge_type: edge_type.into(),
      inputs: HashMap::new(),
      outputs: HashMap::new(),
      config: Value::Null,
    }
  }

  pub fn with_input(mut self, block_id: impl Into<String>, alias: impl Into<String>) -> Self {
    self.inputs.insert(block_id.into(), alias.into());
    self
  }

  pub fn with_output(mut self, block_id: impl Into<String>, alias: impl Into<String>) -> Self {
    self.outputs.insert(block_id.into(), alias.into());
    self
  }
}
