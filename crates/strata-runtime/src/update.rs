//! Block update service.
//!
//! Applies an edge's raw output to its target block: normalize to the
//! block's declared semantic type, tier, persist or inline, and emit
//! exactly one `BLOCK_UPDATED` event. External content is referenced by
//! metadata in events and results, never inlined.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use strata_storage::ManifestClient;
use strata_workflow::{Block, Content, SemanticType, StorageClass};

use crate::error::RuntimeError;
use crate::event::{EventSender, ExecutionEvent};
use crate::strategy::PersistenceStrategy;
use crate::tiering::TieringPolicy;

/// Tiers and persists edge outputs into their target blocks.
pub struct BlockUpdateService {
  tiering: TieringPolicy,
  client: Arc<ManifestClient>,
}

impl BlockUpdateService {
  pub fn new(tiering: TieringPolicy, client: Arc<ManifestClient>) -> Self {
    Self { tiering, client }
  }

  /// Apply one raw output value to `block`.
  ///
  /// Returns the block's entry for the legacy-compatibility result map:
  /// the inlined content when internal, the external metadata when not.
  pub async fn apply_output(
    &self,
    block: &mut Block,
    raw: Value,
    events: &EventSender,
  ) -> Result<Value, RuntimeError> {
    block.content = normalize(block, raw)?;
    block.is_resolved = true;

    // A block already declared external stays external regardless of size.
    let force_external = block.storage_class == StorageClass::External;
    let use_external = self
      .tiering
      .should_use_external(&block.content, force_external);
    debug!(
      block_id = %block.id,
      use_external,
      content_size = block.content.size(),
      "tiering decision"
    );

    if use_external {
      block.storage_class = StorageClass::External;
      PersistenceStrategy::External
        .persist(&self.client, block, events)
        .await?;

      events
        .emit(ExecutionEvent::BlockUpdated {
          timestamp: Utc::now(),
          block_id: block.id.clone(),
          storage_class: StorageClass::External,
          content: None,
          external_metadata: block.external_metadata.clone(),
        })
        .await;
      Ok(json!({ "external_metadata": block.external_metadata }))
    } else {
      block.storage_class = StorageClass::Internal;
      // Persist supersedes: the old external version, if any, no longer
      // describes this block's content.
      block.external_metadata = None;
      block.is_persisted = true;

      let content = block.content.to_value();
      events
        .emit(ExecutionEvent::BlockUpdated {
          timestamp: Utc::now(),
          block_id: block.id.clone(),
          storage_class: StorageClass::Internal,
          content: Some(content.clone()),
          external_metadata: None,
        })
        .await;
      Ok(content)
    }
  }
}

/// Coerce a raw edge output to the block's declared semantic type.
fn normalize(block: &Block, raw: Value) -> Result<Content, RuntimeError> {
  match (block.semantic_type, raw) {
    // A JSON string destined for a structured block is parsed; a plain
    // string that is not JSON is still a valid structured value.
    (SemanticType::Structured, Value::String(s)) if !s.is_empty() => {
      match serde_json::from_str(&s) {
        Ok(parsed) => Ok(Content::Structured(parsed)),
        Err(_) => Ok(Content::Structured(Value::String(s))),
      }
    }
    (SemanticType::File, raw) => {
      if raw.is_null() {
        return Ok(Content::Null);
      }
      let content = Content::from_value(SemanticType::File, raw);
      if content.is_null() {
        return Err(RuntimeError::Normalization {
          block_id: block.id.clone(),
          message: "file block output is not a list of file descriptors".to_string(),
        });
      }
      Ok(content)
    }
    (semantic_type, raw) => Ok(Content::from_value(semantic_type, raw)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use serde_json::json;
  use tokio::sync::mpsc;

  use strata_storage::{MemoryTransport, StorageConfig};

  fn service(threshold: usize) -> BlockUpdateService {
    BlockUpdateService::new(
      TieringPolicy::new(threshold),
      Arc::new(ManifestClient::new(
        Arc::new(MemoryTransport::new()),
        StorageConfig::default(),
      )),
    )
  }

  fn events() -> (EventSender, mpsc::Receiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (EventSender::new(tx), rx)
  }

  #[tokio::test]
  async fn small_output_stays_internal() {
    let service = service(1024);
    let (sender, mut rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::Text);

    let compat = service
      .apply_output(&mut block, json!("small"), &sender)
      .await
      .unwrap();

    assert_eq!(block.storage_class, StorageClass::Internal);
    assert_eq!(block.content, Content::Text("small".to_string()));
    assert!(block.is_persisted);
    assert!(block.external_metadata.is_none());
    assert_eq!(compat, json!("small"));

    drop(sender);
    let event = rx.try_recv().unwrap();
    match event {
      ExecutionEvent::BlockUpdated {
        content,
        external_metadata,
        ..
      } => {
        assert_eq!(content, Some(json!("small")));
        assert!(external_metadata.is_none());
      }
      other => panic!("unexpected event {other:?}"),
    }
  }

  #[tokio::test]
  async fn large_output_tiers_external_without_inlining() {
    let service = service(16);
    let (sender, mut rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::Text);

    let long = "x".repeat(64);
    let compat = service
      .apply_output(&mut block, json!(long), &sender)
      .await
      .unwrap();

    assert_eq!(block.storage_class, StorageClass::External);
    assert!(block.is_persisted);
    let metadata = block.external_metadata.as_ref().unwrap();
    assert!(compat["external_metadata"]["resource_key"]
      .as_str()
      .unwrap()
      .contains(&metadata.version_id.clone().unwrap()));

    drop(sender);
    let mut saw_block_updated = false;
    while let Ok(event) = rx.try_recv() {
      if let ExecutionEvent::BlockUpdated { content, external_metadata, .. } = event {
        saw_block_updated = true;
        assert!(content.is_none());
        assert!(external_metadata.is_some());
      }
    }
    assert!(saw_block_updated);
  }

  #[tokio::test]
  async fn json_string_parses_for_structured_block() {
    let service = service(1024);
    let (sender, _rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::Structured);

    service
      .apply_output(&mut block, json!("{\"animal\":\"puppy\"}"), &sender)
      .await
      .unwrap();
    assert_eq!(block.content, Content::Structured(json!({"animal": "puppy"})));
  }

  #[tokio::test]
  async fn structure_serializes_for_text_block() {
    let service = service(1024);
    let (sender, _rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::Text);

    service
      .apply_output(&mut block, json!({"a": 1}), &sender)
      .await
      .unwrap();
    assert_eq!(block.content, Content::Text("{\"a\":1}".to_string()));
  }

  #[tokio::test]
  async fn declared_external_block_is_forced_external() {
    let service = service(1024 * 1024);
    let (sender, _rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::Text);
    block.storage_class = StorageClass::External;

    service
      .apply_output(&mut block, json!("tiny"), &sender)
      .await
      .unwrap();
    assert_eq!(block.storage_class, StorageClass::External);
    assert!(block.external_metadata.is_some());
  }

  #[tokio::test]
  async fn bad_file_output_is_a_normalization_error() {
    let service = service(1024);
    let (sender, _rx) = events();
    let mut block = Block::new("b1", "b1", SemanticType::File);

    let err = service
      .apply_output(&mut block, json!(42), &sender)
      .await
      .unwrap_err();
    assert!(matches!(err, RuntimeError::Normalization { .. }));
  }
}
