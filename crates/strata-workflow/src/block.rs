//! Blocks: named, typed content cells.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic type of a block's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
  Text,
  Structured,
  File,
}

/// Where a block's content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
  Internal,
  External,
}

/// Descriptor for one file held by a file-typed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
  pub file_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub local_path: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mime_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_type: Option<String>,
  #[serde(default)]
  pub size: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub etag: Option<String>,
  /// Set instead of `local_path` when this file failed to download.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Location of a block's externally persisted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetadata {
  /// Key prefix of the persisted version; the manifest lives at
  /// `{resource_key}/manifest.json`.
  pub resource_key: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version_id: Option<String>,
  #[serde(default)]
  pub chunked: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub uploaded_at: Option<DateTime<Utc>>,
  /// Original name for end-user file uploads.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_name: Option<String>,
  /// Scratch directory holding downloaded files, once resolved.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub local_dir: Option<PathBuf>,
}

/// Typed content payload of a block.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Content {
  #[default]
  Null,
  Text(String),
  Structured(Value),
  Files(Vec<FileRef>),
  Binary(Vec<u8>),
}

impl Content {
  /// Interpret a raw JSON value as content for a block of the given type.
  ///
  /// Null and the empty string both mean "no content yet".
  pub fn from_value(semantic_type: SemanticType, value: Value) -> Self {
    match value {
      Value::Null => Content::Null,
      Value::String(s) if s.is_empty() => Content::Null,
      value => match semantic_type {
        SemanticType::Text => match value {
          Value::String(s) => Content::Text(s),
          other => Content::Text(other.to_string()),
        },
        SemanticType::Structured => Content::Structured(value),
        SemanticType::File => serde_json::from_value(value)
          .map(Content::Files)
          .unwrap_or(Content::Null),
      },
    }
  }

  /// Render the content as a JSON value, e.g. for edge inputs or events.
  ///
  /// Binary content is base64-encoded since JSON has no byte type.
  pub fn to_value(&self) -> Value {
    match self {
      Content::Null => Value::Null,
      Content::Text(s) => Value::String(s.clone()),
      Content::Structured(v) => v.clone(),
      Content::Files(refs) => serde_json::to_value(refs).unwrap_or(Value::Null),
      Content::Binary(bytes) => Value::String(BASE64.encode(bytes)),
    }
  }

  /// Size used by the tiering policy: character count for text, canonical
  /// JSON serialization length for structured data, byte length for binary.
  pub fn size(&self) -> usize {
    match self {
      Content::Null => 0,
      Content::Text(s) => s.chars().count(),
      Content::Structured(v) => v.to_string().len(),
      Content::Files(refs) => serde_json::to_string(refs).map(|s| s.len()).unwrap_or(0),
      Content::Binary(bytes) => bytes.len(),
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Content::Null)
  }
}

/// A named content cell in a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub id: String,
  /// Display alias used by edges for placeholder substitution.
  pub label: String,
  pub semantic_type: SemanticType,
  pub storage_class: StorageClass,
  pub content: Content,
  pub external_metadata: Option<ExternalMetadata>,
  /// External content has been fetched into `content` or local files.
  pub is_resolved: bool,
  /// Current in-memory content is durably written (or never needed to be).
  pub is_persisted: bool,
}

impl Block {
  pub fn new(id: impl Into<String>, label: impl Into<String>, semantic_type: SemanticType) -> Self {
    Self {
      id: id.into(),
      label: label.into(),
      semantic_type,
      storage_class: StorageClass::Internal,
      content: Content::Null,
      external_metadata: None,
      is_resolved: false,
      is_persisted: false,
    }
  }

  /// Whether the block has data available at workflow start, either inline
  /// content or external metadata a prefetch task can resolve.
  pub fn has_initial_data(&self) -> bool {
    !self.content.is_null() || self.external_metadata.is_some()
  }

  /// Whether the block carries external data that has not been fetched yet.
  pub fn needs_prefetch(&self) -> bool {
    self.external_metadata.is_some() && !self.is_resolved
  }
}
