//! Runtime errors.

use strata_storage::StorageError;
use strata_workflow::PlanError;

/// Errors that terminate a workflow run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The graph failed pre-flight validation.
  #[error("workflow validation failed: {0}")]
  Validation(#[from] PlanError),

  /// No ready batch, nothing processing, nothing to prefetch. A missing
  /// producer or an undetected structural problem.
  #[error("execution stuck: {message}")]
  Stuck { message: String },

  /// An edge body failed; the run aborts without retry.
  #[error("edge '{edge_id}' failed: {message}")]
  EdgeFailed {
    edge_id: String,
    error_type: String,
    message: String,
  },

  /// Persistence or prefetch failed.
  #[error("storage operation failed")]
  Storage(#[from] StorageError),

  /// Edge output could not be coerced to the target block's declared type.
  #[error("cannot normalize output for block '{block_id}': {message}")]
  Normalization { block_id: String, message: String },

  /// Scratch directory or file I/O failed during resolve.
  #[error("scratch io error: {0}")]
  Io(#[from] std::io::Error),

  /// A spawned task panicked or was aborted.
  #[error("task join error: {message}")]
  Join { message: String },

  /// The run's cancellation token fired.
  #[error("execution cancelled")]
  Cancelled,

  /// The run exceeded its configured wall-clock budget.
  #[error("execution timed out after {seconds}s")]
  Timeout { seconds: u64 },
}

impl RuntimeError {
  /// Stable machine-readable tag used in terminal events.
  pub fn error_type(&self) -> &'static str {
    match self {
      RuntimeError::Validation(_) => "validation",
      RuntimeError::Stuck { .. } => "stuck",
      RuntimeError::EdgeFailed { .. } => "edge_error",
      RuntimeError::Storage(_) => "storage",
      RuntimeError::Normalization { .. } => "normalization",
      RuntimeError::Io(_) => "io",
      RuntimeError::Join { .. } => "join",
      RuntimeError::Cancelled => "cancelled",
      RuntimeError::Timeout { .. } => "timeout",
    }
  }
}
