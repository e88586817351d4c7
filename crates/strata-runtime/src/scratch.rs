//! Scratch directories for file-type prefetch.
//!
//! File chunks resolve into process-local directories. The run owns those
//! directories through this registry and removes them, best-effort, on
//! every exit path; removal failures are logged and swallowed so they
//! never mask the run's outcome.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

/// Registry of scratch directories created during one run.
#[derive(Debug)]
pub struct ScratchSpace {
  root: PathBuf,
  dirs: Mutex<Vec<PathBuf>>,
}

impl ScratchSpace {
  pub fn new(root: PathBuf) -> Self {
    Self {
      root,
      dirs: Mutex::new(Vec::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Create (and register for cleanup) the scratch directory for one
  /// block-version.
  pub fn dir_for(&self, block_id: &str, version_id: &str) -> std::io::Result<PathBuf> {
    let name = format!(
      "{}_{}",
      block_id.replace('/', "_"),
      version_id.replace('/', "_")
    );
    let dir = self.root.join(name);
    std::fs::create_dir_all(&dir)?;
    self.dirs.lock().unwrap().push(dir.clone());
    Ok(dir)
  }

  /// Remove every registered directory. Safe to call more than once.
  pub fn cleanup(&self) {
    let dirs: Vec<PathBuf> = self.dirs.lock().unwrap().drain(..).collect();
    for dir in dirs {
      if let Err(err) = std::fs::remove_dir_all(&dir) {
        if err.kind() != std::io::ErrorKind::NotFound {
          warn!(dir = %dir.display(), error = %err, "failed to remove scratch directory");
        }
      }
    }
    // The per-run root itself is empty once the per-block dirs are gone.
    let _ = std::fs::remove_dir(&self.root);
  }
}

impl Drop for ScratchSpace {
  fn drop(&mut self) {
    self.cleanup();
  }
}
