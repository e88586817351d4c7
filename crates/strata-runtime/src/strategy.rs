//! Persistence strategies.
//!
//! A block persists either in process memory or in the external chunked
//! store. Exactly two variants exist, so this is a closed enum rather than
//! an open plugin trait; both share the resolve/persist contract.

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument};

use strata_storage::{
  ManifestClient, ManifestStatus, StorageError, aggregate_jsonl, chunk_binary, chunk_structured,
  chunk_text, is_chunk_name,
};
use strata_workflow::{Block, Content, ExternalMetadata, FileRef, StorageClass};

use crate::error::RuntimeError;
use crate::event::{EventSender, ExecutionEvent};
use crate::scratch::ScratchSpace;

/// How a block's content is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStrategy {
  /// Content lives in the block; both operations are flag bookkeeping.
  Memory,
  /// Content lives in the external chunked store.
  External,
}

impl PersistenceStrategy {
  pub fn for_class(storage_class: StorageClass) -> Self {
    match storage_class {
      StorageClass::Internal => PersistenceStrategy::Memory,
      StorageClass::External => PersistenceStrategy::External,
    }
  }

  /// Populate `block.content` from its external metadata. Idempotent:
  /// resolving an already-resolved block is a no-op.
  pub async fn resolve(
    &self,
    client: &ManifestClient,
    block: &mut Block,
    scratch: &ScratchSpace,
  ) -> Result<(), RuntimeError> {
    if block.is_resolved {
      return Ok(());
    }
    match self {
      PersistenceStrategy::Memory => {
        block.is_resolved = true;
        Ok(())
      }
      PersistenceStrategy::External => resolve_external(client, block, scratch).await,
    }
  }

  /// Write the block's current content to storage if this strategy requires
  /// it, emitting `STREAM_*` lifecycle events along the way.
  pub async fn persist(
    &self,
    client: &ManifestClient,
    block: &mut Block,
    events: &EventSender,
  ) -> Result<(), RuntimeError> {
    match self {
      PersistenceStrategy::Memory => {
        block.is_persisted = true;
        Ok(())
      }
      PersistenceStrategy::External => persist_external(client, block, events).await,
    }
  }
}

/// Wire classification of content being persisted.
fn content_kind(content: &Content) -> &'static str {
  match content {
    Content::Structured(_) | Content::Files(_) => "structured",
    Content::Text(_) | Content::Null => "text",
    Content::Binary(_) => "binary",
  }
}

fn generate_chunks(content: &Content, chunk_size: usize) -> Vec<(String, Bytes)> {
  match content {
    Content::Null => Vec::new(),
    Content::Text(text) => chunk_text(text, chunk_size),
    Content::Structured(value) => chunk_structured(value, chunk_size),
    Content::Files(refs) => {
      let value = serde_json::to_value(refs).unwrap_or(Value::Null);
      chunk_structured(&value, chunk_size)
    }
    Content::Binary(data) => chunk_binary(data, chunk_size),
  }
}

#[instrument(skip(client, block, events), fields(block_id = %block.id))]
async fn persist_external(
  client: &ManifestClient,
  block: &mut Block,
  events: &EventSender,
) -> Result<(), RuntimeError> {
  // A failed persist abandons the new version; callers keep seeing this.
  let previous_metadata = block.external_metadata.clone();

  let version = match client.init_stream_version(&block.id).await {
    Ok(version) => version,
    Err(err) => {
      events
        .emit(ExecutionEvent::StreamError {
          timestamp: Utc::now(),
          block_id: block.id.clone(),
          resource_key: None,
          error_message: err.to_string(),
        })
        .await;
      return Err(err.into());
    }
  };

  block.external_metadata = Some(ExternalMetadata {
    resource_key: version.version_base.clone(),
    content_type: Some(content_kind(&block.content).to_string()),
    version_id: Some(version.version_id.clone()),
    chunked: true,
    uploaded_at: Some(Utc::now()),
    file_name: None,
    local_dir: None,
  });
  events
    .emit(ExecutionEvent::StreamStarted {
      timestamp: Utc::now(),
      block_id: block.id.clone(),
      resource_key: version.version_base.clone(),
      version_id: version.version_id.clone(),
    })
    .await;

  let chunks = generate_chunks(&block.content, client.config().chunk_size);
  let chunk_count = chunks.len();
  let total_size: u64 = chunks.iter().map(|(_, body)| body.len() as u64).sum();
  debug!(chunk_count, total_size, "uploading chunks");

  let upload = async {
    let etag = client
      .upload_chunks_and_update_manifest(
        &block.id,
        &version.version_id,
        chunks,
        &version.manifest_key,
        version.etag.clone(),
      )
      .await?;
    client
      .set_version_status(
        &block.id,
        &version.version_id,
        &version.manifest_key,
        etag,
        ManifestStatus::Completed,
      )
      .await?;
    Ok::<_, StorageError>(())
  };

  match upload.await {
    Ok(()) => {
      block.is_persisted = true;
      events
        .emit(ExecutionEvent::StreamEnded {
          timestamp: Utc::now(),
          block_id: block.id.clone(),
          resource_key: version.version_base.clone(),
          chunk_count,
          total_size,
        })
        .await;
      Ok(())
    }
    Err(err) => {
      block.external_metadata = previous_metadata;
      events
        .emit(ExecutionEvent::StreamError {
          timestamp: Utc::now(),
          block_id: block.id.clone(),
          resource_key: Some(version.version_base.clone()),
          error_message: err.to_string(),
        })
        .await;
      Err(err.into())
    }
  }
}

enum ResolvedKind {
  Files,
  Structured,
  Text,
  Binary,
}

/// Decide how to materialize a manifest's chunks.
///
/// End-user uploads win over whatever `content_type` claims: an explicit
/// file name, or chunk names the engine would never generate, mean files.
fn classify_manifest(
  manifest: &strata_storage::Manifest,
  metadata: &ExternalMetadata,
) -> ResolvedKind {
  if metadata.file_name.is_some() || manifest.chunks.iter().any(|c| !is_chunk_name(&c.name)) {
    return ResolvedKind::Files;
  }
  match metadata.content_type.as_deref() {
    Some("structured") => ResolvedKind::Structured,
    Some("text") => ResolvedKind::Text,
    Some("binary") => ResolvedKind::Binary,
    Some("files") => ResolvedKind::Files,
    _ => match manifest.chunks.first() {
      Some(chunk) if chunk.name.ends_with(".jsonl") => ResolvedKind::Structured,
      Some(chunk) if chunk.name.ends_with(".txt") => ResolvedKind::Text,
      _ => ResolvedKind::Binary,
    },
  }
}

async fn resolve_external(
  client: &ManifestClient,
  block: &mut Block,
  scratch: &ScratchSpace,
) -> Result<(), RuntimeError> {
  let Some(metadata) = block.external_metadata.clone() else {
    // Nothing external to fetch; the content is whatever the block holds.
    block.is_resolved = true;
    return Ok(());
  };

  let manifest = client.get_manifest(&metadata.resource_key).await?;
  match classify_manifest(&manifest, &metadata) {
    ResolvedKind::Files => {
      let version_id = metadata.version_id.as_deref().unwrap_or("v0");
      let dir = scratch.dir_for(&block.id, version_id)?;
      let mut refs = Vec::new();
      for chunk in manifest.done_chunks() {
        match client.download_chunk(&metadata.resource_key, &chunk.name).await {
          Ok(bytes) => {
            let path = dir.join(&chunk.name);
            tokio::fs::write(&path, &bytes).await?;
            refs.push(FileRef {
              file_name: chunk.name.clone(),
              local_path: Some(path),
              mime_type: None,
              file_type: file_extension(&chunk.name),
              size: chunk.size,
              etag: Some(chunk.etag.clone()),
              error: None,
            });
          }
          Err(err) => {
            refs.push(FileRef {
              file_name: chunk.name.clone(),
              local_path: None,
              mime_type: None,
              file_type: file_extension(&chunk.name),
              size: chunk.size,
              etag: Some(chunk.etag.clone()),
              error: Some(err.to_string()),
            });
          }
        }
      }
      block.content = Content::Files(refs);
      if let Some(meta) = &mut block.external_metadata {
        meta.local_dir = Some(dir);
      }
    }
    ResolvedKind::Structured => {
      let mut parts = Vec::new();
      for chunk in manifest.done_chunks() {
        parts.push(client.download_chunk(&metadata.resource_key, &chunk.name).await?);
      }
      let values = aggregate_jsonl(parts).map_err(StorageError::Decode)?;
      block.content = Content::Structured(Value::Array(values));
    }
    ResolvedKind::Text => {
      let buffer = concat_chunks(client, &metadata.resource_key, &manifest).await?;
      block.content = Content::Text(String::from_utf8_lossy(&buffer).into_owned());
    }
    ResolvedKind::Binary => {
      let buffer = concat_chunks(client, &metadata.resource_key, &manifest).await?;
      block.content = Content::Binary(buffer);
    }
  }

  block.is_resolved = true;
  Ok(())
}

async fn concat_chunks(
  client: &ManifestClient,
  resource_key: &str,
  manifest: &strata_storage::Manifest,
) -> Result<Vec<u8>, RuntimeError> {
  let mut buffer = Vec::new();
  for chunk in manifest.done_chunks() {
    let bytes = client.download_chunk(resource_key, &chunk.name).await?;
    buffer.extend_from_slice(&bytes);
  }
  Ok(buffer)
}

fn file_extension(name: &str) -> Option<String> {
  std::path::Path::new(name)
    .extension()
    .map(|ext| ext.to_string_lossy().into_owned())
}
