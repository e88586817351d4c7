//! Workflow submission parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::{Block, Content, ExternalMetadata, SemanticType, StorageClass};
use crate::edge::Edge;
use crate::error::WorkflowError;

/// Submission format version this engine understands.
pub const WORKFLOW_VERSION: &str = "0.2";

/// A parsed workflow: blocks and edges keyed by id.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub blocks: HashMap<String, Block>,
  pub edges: HashMap<String, Edge>,
}

impl Workflow {
  /// Parse a workflow submission document (see the `version: "0.2"` format).
  pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
    let doc: WorkflowDoc = serde_json::from_str(raw)?;
    Self::from_doc(doc)
  }

  /// Parse a workflow submission from an already-decoded JSON value.
  pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
    let doc: WorkflowDoc = serde_json::from_value(value)?;
    Self::from_doc(doc)
  }

  fn from_doc(doc: WorkflowDoc) -> Result<Self, WorkflowError> {
    if let Some(version) = &doc.version {
      if version != WORKFLOW_VERSION {
        return Err(WorkflowError::UnsupportedVersion {
          version: version.clone(),
        });
      }
    }

    let blocks = doc
      .blocks
      .into_iter()
      .map(|(id, def)| {
        let content = Content::from_value(def.semantic_type, def.data.content);
        let is_resolved = !content.is_null();
        let block = Block {
          label: def.label.unwrap_or_else(|| id.clone()),
          id: id.clone(),
          semantic_type: def.semantic_type,
          storage_class: def.storage_class.unwrap_or(StorageClass::Internal),
          content,
          external_metadata: def.data.external_metadata,
          is_resolved,
          // Submitted content is the persisted record until an edge replaces it.
          is_persisted: true,
        };
        (id, block)
      })
      .collect();

    let edges = doc
      .edges
      .into_iter()
      .map(|(id, def)| {
        let edge = Edge {
          id: id.clone(),
          edge_type: def.edge_type,
          inputs: def.data.inputs,
          outputs: def.data.outputs,
          config: Value::Object(def.data.config),
        };
        (id, edge)
      })
      .collect();

    Ok(Self { blocks, edges })
  }

  pub fn get_block(&self, block_id: &str) -> Option<&Block> {
    self.blocks.get(block_id)
  }

  pub fn get_edge(&self, edge_id: &str) -> Option<&Edge> {
    self.edges.get(edge_id)
  }
}

#[derive(Debug, Deserialize)]
struct WorkflowDoc {
  #[serde(default)]
  version: Option<String>,
  #[serde(default)]
  blocks: HashMap<String, BlockDef>,
  #[serde(default)]
  edges: HashMap<String, EdgeDef>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockDef {
  #[serde(default)]
  label: Option<String>,
  #[serde(rename = "type")]
  semantic_type: SemanticType,
  #[serde(default)]
  storage_class: Option<StorageClass>,
  #[serde(default)]
  data: BlockData,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockData {
  #[serde(default)]
  content: Value,
  #[serde(default)]
  external_metadata: Option<ExternalMetadata>,
}

#[derive(Debug, Deserialize)]
struct EdgeDef {
  #[serde(rename = "type")]
  edge_type: String,
  data: EdgeData,
}

#[derive(Debug, Deserialize)]
struct EdgeData {
  #[serde(default)]
  inputs: HashMap<String, String>,
  #[serde(default)]
  outputs: HashMap<String, String>,
  #[serde(flatten)]
  config: serde_json::Map<String, Value>,
}
