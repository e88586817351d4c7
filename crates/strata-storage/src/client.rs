//! Manifest storage client.
//!
//! Drives the chunked, versioned upload protocol: one fresh manifest per
//! version, chunk payloads uploaded as raw bytes, and manifest mutations
//! serialized per version under an etag chain with bounded conflict
//! retries.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::manifest::{ChunkEntry, ChunkState, Manifest, ManifestStatus, manifest_key_for};
use crate::transport::{ManifestUpdate, StorageTransport};

/// Client configuration, passed in explicitly (no ambient globals).
#[derive(Debug, Clone)]
pub struct StorageConfig {
  /// Base URL of the storage service (HTTP transport only).
  pub base_url: String,
  /// User on whose behalf manifests are written.
  pub user_id: String,
  /// Byte window used when slicing content into chunks.
  pub chunk_size: usize,
  /// Manifest-update attempts before a conflict becomes fatal.
  pub max_update_retries: u32,
  /// Base delay between conflict retries; grows linearly per attempt.
  pub retry_backoff: Duration,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080".to_string(),
      user_id: "local".to_string(),
      chunk_size: 256 * 1024,
      max_update_retries: 3,
      retry_backoff: Duration::from_millis(200),
    }
  }
}

/// Coordinates of a freshly initialized stream version.
#[derive(Debug, Clone)]
pub struct StreamVersion {
  /// Key prefix under which the version's objects live.
  pub version_base: String,
  pub version_id: String,
  pub manifest_key: String,
  /// Optimistic-lock token for the first manifest update.
  pub etag: String,
}

/// Chunked-manifest storage client.
pub struct ManifestClient {
  transport: Arc<dyn StorageTransport>,
  config: StorageConfig,
}

impl ManifestClient {
  pub fn new(transport: Arc<dyn StorageTransport>, config: StorageConfig) -> Self {
    Self { transport, config }
  }

  pub fn config(&self) -> &StorageConfig {
    &self.config
  }

  /// Direct-upload a fresh `generating` manifest; the service allocates the
  /// version id and returns the manifest key and its etag.
  pub async fn init_stream_version(&self, block_id: &str) -> Result<StreamVersion, StorageError> {
    let manifest = Manifest::new(block_id);
    let body = Bytes::from(serde_json::to_vec(&manifest)?);
    let receipt = self
      .transport
      .upload_direct(block_id, crate::manifest::MANIFEST_FILE, "application/json", None, body)
      .await?;

    let version_base = receipt
      .key
      .strip_suffix("/manifest.json")
      .unwrap_or(&receipt.key)
      .to_string();
    debug!(block_id, version_id = %receipt.version_id, "initialized stream version");

    Ok(StreamVersion {
      version_base,
      version_id: receipt.version_id,
      manifest_key: receipt.key,
      etag: receipt.etag,
    })
  }

  /// Upload chunks and append each to the manifest, re-chaining the etag
  /// between updates. Updates for one version are strictly sequential even
  /// though payload uploads could in principle be pipelined.
  ///
  /// Returns the etag after the last update.
  pub async fn upload_chunks_and_update_manifest<I>(
    &self,
    block_id: &str,
    version_id: &str,
    chunks: I,
    manifest_key: &str,
    etag: String,
  ) -> Result<String, StorageError>
  where
    I: IntoIterator<Item = (String, Bytes)>,
  {
    let mut etag = etag;
    for (name, body) in chunks {
      let size = body.len() as u64;
      let receipt = self
        .transport
        .upload_direct(
          block_id,
          &name,
          "application/octet-stream",
          Some(version_id),
          body,
        )
        .await?;

      let chunk = ChunkEntry {
        name,
        size,
        etag: receipt.etag,
        uploaded_at: Utc::now(),
        state: ChunkState::Done,
      };
      etag = self
        .update_with_retry(
          block_id,
          version_id,
          manifest_key,
          etag,
          Some(chunk),
          ManifestStatus::Generating,
        )
        .await?;
    }
    Ok(etag)
  }

  /// Set the version's terminal status (`completed` or `failed`).
  pub async fn set_version_status(
    &self,
    block_id: &str,
    version_id: &str,
    manifest_key: &str,
    etag: String,
    status: ManifestStatus,
  ) -> Result<String, StorageError> {
    self
      .update_with_retry(block_id, version_id, manifest_key, etag, None, status)
      .await
  }

  /// Fetch the manifest stored under a version's resource key.
  pub async fn get_manifest(&self, resource_key: &str) -> Result<Manifest, StorageError> {
    let (manifest, _) = self.transport.get_manifest(&manifest_key_for(resource_key)).await?;
    Ok(manifest)
  }

  /// Download one chunk of a version.
  pub async fn download_chunk(
    &self,
    resource_key: &str,
    chunk_name: &str,
  ) -> Result<Bytes, StorageError> {
    self
      .transport
      .download(&format!("{}/{}", resource_key.trim_end_matches('/'), chunk_name))
      .await
  }

  /// Fetch an object's bytes ahead of need. The transport resolves any
  /// download URL internally; no separate resolution round trip.
  pub async fn prefetch_resource(&self, key: &str) -> Result<Bytes, StorageError> {
    debug!(key, "prefetching resource");
    self.transport.download(key).await
  }

  /// One manifest mutation with bounded conflict retries.
  ///
  /// On a stale etag the client refetches the manifest (whose chunk list is
  /// append-only, so previously committed chunks survive any concurrent
  /// writer), drops its chunk if the remote already has it, and retries
  /// against the fresh etag.
  async fn update_with_retry(
    &self,
    block_id: &str,
    version_id: &str,
    manifest_key: &str,
    etag: String,
    new_chunk: Option<ChunkEntry>,
    status: ManifestStatus,
  ) -> Result<String, StorageError> {
    let mut expected_etag = etag;
    let mut new_chunk = new_chunk;
    let attempts = self.config.max_update_retries.max(1);

    for attempt in 0..attempts {
      let update = ManifestUpdate {
        user_id: self.config.user_id.clone(),
        block_id: block_id.to_string(),
        version_id: version_id.to_string(),
        expected_etag: expected_etag.clone(),
        new_chunk: new_chunk.clone(),
        status,
      };

      match self.transport.update_manifest(&update).await {
        Ok(new_etag) => return Ok(new_etag),
        Err(StorageError::Conflict { .. }) => {
          if attempt + 1 == attempts {
            break;
          }
          warn!(
            block_id,
            version_id,
            attempt,
            "manifest update conflict, refetching and retrying"
          );
          tokio::time::sleep(self.config.retry_backoff * (attempt + 1)).await;

          let (remote, current_etag) = self.transport.get_manifest(manifest_key).await?;
          if let Some(chunk) = &new_chunk {
            if remote.chunks.iter().any(|c| c.name == chunk.name) {
              new_chunk = None;
            }
          }
          expected_etag = current_etag;
        }
        Err(err) => return Err(err),
      }
    }

    Err(StorageError::RetriesExhausted {
      key: manifest_key.to_string(),
      attempts,
    })
  }
}
