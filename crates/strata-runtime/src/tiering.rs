//! Storage-tiering policy.
//!
//! Pure and deterministic: given content, decide whether it lives
//! in-process or in the external chunked store. No I/O, so tiering
//! decisions are reproducible and testable in isolation.

use serde::{Deserialize, Serialize};

use strata_workflow::{Content, StorageClass};

/// Tiering decision plus the numbers behind it, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetadata {
  pub use_external: bool,
  pub storage_class: StorageClass,
  pub content_size: usize,
  pub threshold: usize,
}

/// Size-threshold tiering policy.
#[derive(Debug, Clone, Copy)]
pub struct TieringPolicy {
  threshold: usize,
}

impl TieringPolicy {
  pub fn new(threshold: usize) -> Self {
    Self { threshold }
  }

  /// `force_external` short-circuits; otherwise content at or above the
  /// threshold tiers external.
  pub fn should_use_external(&self, content: &Content, force_external: bool) -> bool {
    force_external || content.size() >= self.threshold
  }

  pub fn storage_metadata(&self, content: &Content) -> StorageMetadata {
    let content_size = content.size();
    let use_external = content_size >= self.threshold;
    StorageMetadata {
      use_external,
      storage_class: if use_external {
        StorageClass::External
      } else {
        StorageClass::Internal
      },
      content_size,
      threshold: self.threshold,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn threshold_boundary() {
    let policy = TieringPolicy::new(4);
    assert!(!policy.should_use_external(&Content::Text("abc".to_string()), false));
    assert!(policy.should_use_external(&Content::Text("abcd".to_string()), false));
  }

  #[test]
  fn force_external_ignores_size() {
    let policy = TieringPolicy::new(1024);
    assert!(policy.should_use_external(&Content::Text("x".to_string()), true));
    assert!(policy.should_use_external(&Content::Null, true));
  }

  #[test]
  fn metadata_reports_decision() {
    let policy = TieringPolicy::new(3);
    let metadata = policy.storage_metadata(&Content::Binary(vec![0u8; 5]));
    assert!(metadata.use_external);
    assert_eq!(metadata.storage_class, StorageClass::External);
    assert_eq!(metadata.content_size, 5);
    assert_eq!(metadata.threshold, 3);
  }
}
