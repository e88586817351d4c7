//! Runtime configuration.
//!
//! Explicit configuration passed into constructors; nothing reads ambient
//! global state at run time. `from_env` exists so binaries can pick up
//! overrides once, at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one [`crate::Env`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Content at or above this size (characters/bytes) tiers external.
  pub tiering_threshold: usize,
  /// Root under which per-run scratch directories are created.
  pub scratch_root: PathBuf,
  /// Capacity of the bounded event channel between persistence and the
  /// notifier drain task.
  pub event_buffer: usize,
  /// Optional wall-clock budget for an entire run.
  pub run_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      tiering_threshold: 1024,
      scratch_root: std::env::temp_dir().join("strata"),
      event_buffer: 64,
      run_timeout: None,
    }
  }
}

impl RuntimeConfig {
  /// Defaults with environment overrides applied:
  /// `STRATA_EXTERNAL_THRESHOLD`, `STRATA_SCRATCH_ROOT`,
  /// `STRATA_RUN_TIMEOUT_SECS`.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Ok(raw) = std::env::var("STRATA_EXTERNAL_THRESHOLD") {
      if let Ok(threshold) = raw.parse() {
        config.tiering_threshold = threshold;
      }
    }
    if let Ok(root) = std::env::var("STRATA_SCRATCH_ROOT") {
      config.scratch_root = PathBuf::from(root);
    }
    if let Ok(raw) = std::env::var("STRATA_RUN_TIMEOUT_SECS") {
      if let Ok(secs) = raw.parse() {
        config.run_timeout = Some(Duration::from_secs(secs));
      }
    }
    config
  }
}
