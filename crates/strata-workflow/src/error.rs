//! Workflow model and planning errors.

/// Errors raised while parsing a workflow submission.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
  /// The submission document is not valid JSON or has the wrong shape.
  #[error("invalid workflow document: {0}")]
  Parse(#[from] serde_json::Error),

  /// The submission declares a version this engine does not understand.
  #[error("unsupported workflow version '{version}'")]
  UnsupportedVersion { version: String },
}

/// Errors raised by pre-flight graph validation.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
  /// An edge input references a block that does not exist.
  #[error("edge '{edge_id}' input references unknown block '{block_id}'")]
  UnknownInputBlock { edge_id: String, block_id: String },

  /// An edge output references a block that does not exist.
  #[error("edge '{edge_id}' output references unknown block '{block_id}'")]
  UnknownOutputBlock { edge_id: String, block_id: String },

  /// An edge lists the same block as both input and output.
  #[error("edge '{edge_id}' uses block '{block_id}' as both input and output")]
  SelfLoop { edge_id: String, block_id: String },

  /// The dependency graph contains a cycle through the named block.
  #[error("dependency cycle detected through block '{block_id}'")]
  Cycle { block_id: String },
}
