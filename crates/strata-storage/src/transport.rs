//! Storage transport seam.
//!
//! The manifest client speaks to the storage service through this trait so
//! the protocol logic (etag chaining, conflict retries) is independent of
//! the wire. [`crate::HttpTransport`] implements the real HTTP contract;
//! [`crate::MemoryTransport`] is an in-process backend for tests and
//! development.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::manifest::{ChunkEntry, Manifest, ManifestStatus};

/// Result of a direct upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
  /// Full storage key of the uploaded object.
  pub key: String,
  /// Version this object belongs to; allocated by the service on the first
  /// upload of a version.
  pub version_id: String,
  /// Etag of the uploaded object. For manifests this is the optimistic-lock
  /// token for the next update.
  pub etag: String,
}

/// One manifest mutation under an expected-etag precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestUpdate {
  pub user_id: String,
  pub block_id: String,
  pub version_id: String,
  pub expected_etag: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_chunk: Option<ChunkEntry>,
  pub status: ManifestStatus,
}

/// Raw operations against the storage service.
#[async_trait]
pub trait StorageTransport: Send + Sync {
  /// Upload raw bytes. `version_id = None` starts a new version: the
  /// service allocates the id and creates the object under it.
  async fn upload_direct(
    &self,
    block_id: &str,
    file_name: &str,
    content_type: &str,
    version_id: Option<&str>,
    body: Bytes,
  ) -> Result<UploadReceipt, StorageError>;

  /// Apply one manifest mutation. Returns the new etag, or
  /// [`StorageError::Conflict`] when `expected_etag` is stale.
  async fn update_manifest(&self, update: &ManifestUpdate) -> Result<String, StorageError>;

  /// Read a manifest together with its current etag.
  async fn get_manifest(&self, key: &str) -> Result<(Manifest, String), StorageError>;

  /// Resolve a storage key to a direct download URL.
  async fn download_url(&self, key: &str) -> Result<String, StorageError>;

  /// Fetch an object's bytes.
  async fn download(&self, key: &str) -> Result<Bytes, StorageError>;
}
