//! Versioned, append-only chunk manifests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest format version written by this engine.
pub const MANIFEST_VERSION: &str = "1.0";

/// File name of the manifest within a version's key prefix.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Lifecycle status of one block-version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
  Generating,
  Completed,
  Failed,
}

/// Upload state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
  Pending,
  Done,
}

/// Descriptor of one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
  pub name: String,
  pub size: u64,
  pub etag: String,
  pub uploaded_at: DateTime<Utc>,
  pub state: ChunkState,
}

/// Aggregate totals over a manifest's chunk list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
  pub total_size: u64,
  pub chunk_count: usize,
}

/// Record of a persisted block-version's chunks.
///
/// Owned by the storage service; clients read it whole or append one chunk
/// descriptor under an expected-etag precondition. History is never
/// rewritten — a new persist always creates a brand-new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub version: String,
  pub block_id: String,
  pub status: ManifestStatus,
  pub created_at: DateTime<Utc>,
  pub chunks: Vec<ChunkEntry>,
  pub metadata: ManifestMetadata,
}

impl Manifest {
  /// A fresh, empty manifest in `generating` state.
  pub fn new(block_id: impl Into<String>) -> Self {
    Self {
      version: MANIFEST_VERSION.to_string(),
      block_id: block_id.into(),
      status: ManifestStatus::Generating,
      created_at: Utc::now(),
      chunks: Vec::new(),
      metadata: ManifestMetadata::default(),
    }
  }

  /// Append one chunk descriptor and update totals.
  pub fn append_chunk(&mut self, chunk: ChunkEntry) {
    self.metadata.total_size += chunk.size;
    self.chunks.push(chunk);
    self.metadata.chunk_count = self.chunks.len();
  }

  /// Merge a re-fetched remote manifest into this view after a conflict.
  ///
  /// Chunk lists are append-only: the union keeps remote order and adds any
  /// local entries the remote does not know yet. Scalar fields take the
  /// remote value (the remote writer won the etag race).
  pub fn merge_remote(&mut self, remote: Manifest) {
    let mut chunks = remote.chunks;
    for local in self.chunks.drain(..) {
      if !chunks.iter().any(|c| c.name == local.name) {
        chunks.push(local);
      }
    }
    self.version = remote.version;
    self.block_id = remote.block_id;
    self.status = remote.status;
    self.created_at = remote.created_at;
    self.chunks = chunks;
    self.metadata = ManifestMetadata {
      total_size: self.chunks.iter().map(|c| c.size).sum(),
      chunk_count: self.chunks.len(),
    };
  }

  /// Chunks whose upload finished, in manifest order.
  pub fn done_chunks(&self) -> impl Iterator<Item = &ChunkEntry> {
    self
      .chunks
      .iter()
      .filter(|chunk| chunk.state == ChunkState::Done)
  }
}

/// Manifest key for a version's resource key prefix.
pub fn manifest_key_for(resource_key: &str) -> String {
  format!("{}/{}", resource_key.trim_end_matches('/'), MANIFEST_FILE)
}
