//! In-process storage backend.
//!
//! Implements the full transport contract, including version allocation and
//! etag conflict semantics, against process memory. Used by tests and the
//! dev CLI.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::manifest::{Manifest, manifest_key_for};
use crate::transport::{ManifestUpdate, StorageTransport, UploadReceipt};

#[derive(Debug, Default)]
struct MemoryState {
  objects: HashMap<String, Bytes>,
  /// Manifest key -> (manifest, current etag).
  manifests: HashMap<String, (Manifest, String)>,
  etag_counter: u64,
}

impl MemoryState {
  fn next_etag(&mut self) -> String {
    self.etag_counter += 1;
    format!("etag-{:06}", self.etag_counter)
  }
}

/// In-memory [`StorageTransport`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
  state: Mutex<MemoryState>,
}

impl MemoryTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored objects, manifests included.
  pub fn object_count(&self) -> usize {
    self.state.lock().unwrap().objects.len()
  }
}

#[async_trait]
impl StorageTransport for MemoryTransport {
  async fn upload_direct(
    &self,
    block_id: &str,
    file_name: &str,
    _content_type: &str,
    version_id: Option<&str>,
    body: Bytes,
  ) -> Result<UploadReceipt, StorageError> {
    let mut state = self.state.lock().unwrap();

    let version_id = version_id
      .map(|id| id.to_string())
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let key = format!("{block_id}/{version_id}/{file_name}");
    let etag = state.next_etag();

    if file_name == crate::manifest::MANIFEST_FILE {
      let manifest: Manifest = serde_json::from_slice(&body)?;
      state.manifests.insert(key.clone(), (manifest, etag.clone()));
    }
    state.objects.insert(key.clone(), body);

    Ok(UploadReceipt {
      key,
      version_id,
      etag,
    })
  }

  async fn update_manifest(&self, update: &ManifestUpdate) -> Result<String, StorageError> {
    let mut state = self.state.lock().unwrap();

    let key = manifest_key_for(&format!("{}/{}", update.block_id, update.version_id));
    let current_etag = match state.manifests.get(&key) {
      Some((_, etag)) => etag.clone(),
      None => return Err(StorageError::NotFound(key)),
    };
    if current_etag != update.expected_etag {
      return Err(StorageError::Conflict {
        key,
        expected_etag: update.expected_etag.clone(),
      });
    }

    let new_etag = state.next_etag();
    let Some((manifest, etag)) = state.manifests.get_mut(&key) else {
      return Err(StorageError::NotFound(key));
    };
    if let Some(chunk) = &update.new_chunk {
      manifest.append_chunk(chunk.clone());
    }
    manifest.status = update.status;
    *etag = new_etag.clone();

    let body = Bytes::from(serde_json::to_vec(&*manifest)?);
    state.objects.insert(key, body);
    Ok(new_etag)
  }

  async fn get_manifest(&self, key: &str) -> Result<(Manifest, String), StorageError> {
    let state = self.state.lock().unwrap();
    state
      .manifests
      .get(key)
      .cloned()
      .ok_or_else(|| StorageError::NotFound(key.to_string()))
  }

  async fn download_url(&self, key: &str) -> Result<String, StorageError> {
    let state = self.state.lock().unwrap();
    if !state.objects.contains_key(key) {
      return Err(StorageError::NotFound(key.to_string()));
    }
    Ok(format!("memory://{key}"))
  }

  async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
    let state = self.state.lock().unwrap();
    state
      .objects
      .get(key)
      .cloned()
      .ok_or_else(|| StorageError::NotFound(key.to_string()))
  }
}
