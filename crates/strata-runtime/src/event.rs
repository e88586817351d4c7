//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run so consumers can observe progress,
//! persist state, or stream to UIs. Persistence pushes its events onto a
//! bounded channel the runtime drains; backpressure is explicit rather than
//! hidden in generator semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use strata_workflow::{ExternalMetadata, Progress, StorageClass};

/// Events emitted during workflow execution.
///
/// Serializes with an `event_type` tag (`TASK_STARTED`, `EDGE_COMPLETED`,
/// ...); every event carries its emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEvent {
  TaskStarted {
    timestamp: DateTime<Utc>,
    execution_id: String,
    total_blocks: usize,
    total_edges: usize,
  },

  ProgressUpdate {
    timestamp: DateTime<Utc>,
    progress: Progress,
  },

  EdgeStarted {
    timestamp: DateTime<Utc>,
    edge_id: String,
    edge_type: String,
  },

  EdgeCompleted {
    timestamp: DateTime<Utc>,
    edge_id: String,
    output_blocks: Vec<String>,
  },

  EdgeError {
    timestamp: DateTime<Utc>,
    edge_id: String,
    error_message: String,
    error_type: String,
  },

  /// A block's content was replaced. Internal content is inlined; external
  /// content is referenced by metadata only, never inlined.
  BlockUpdated {
    timestamp: DateTime<Utc>,
    block_id: String,
    storage_class: StorageClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_metadata: Option<ExternalMetadata>,
  },

  /// Emitted before the bulk of an external persist so observers see
  /// progress early.
  StreamStarted {
    timestamp: DateTime<Utc>,
    block_id: String,
    resource_key: String,
    version_id: String,
  },

  StreamEnded {
    timestamp: DateTime<Utc>,
    block_id: String,
    resource_key: String,
    chunk_count: usize,
    total_size: u64,
  },

  StreamError {
    timestamp: DateTime<Utc>,
    block_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_key: Option<String>,
    error_message: String,
  },

  BatchCompleted {
    timestamp: DateTime<Utc>,
    edge_ids: Vec<String>,
    output_blocks: Vec<String>,
  },

  TaskCompleted {
    timestamp: DateTime<Utc>,
    /// Wall-clock run duration in milliseconds; `duration` on the wire.
    #[serde(rename = "duration")]
    duration_ms: u64,
    total_blocks_processed: usize,
    total_edges_completed: usize,
  },

  TaskFailed {
    timestamp: DateTime<Utc>,
    error_message: String,
    error_type: String,
  },
}

/// Trait for receiving execution events.
///
/// The runtime calls `notify` for each drained event - implementations
/// decide what to do with them (persist, broadcast, log, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that forwards events to an unbounded channel, for consumers
/// that want to process events asynchronously.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped; that is the consumer's choice.
    let _ = self.sender.send(event);
  }
}

/// Bounded sending half of the run's event channel.
///
/// Shared by the run loop and the persistence path. Sends await channel
/// capacity, which is what makes backpressure visible.
#[derive(Debug, Clone)]
pub struct EventSender {
  sender: mpsc::Sender<ExecutionEvent>,
}

impl EventSender {
  pub fn new(sender: mpsc::Sender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  pub async fn emit(&self, event: ExecutionEvent) {
    // A closed channel means the drain task is gone; events are observability,
    // not state, so the run keeps going.
    let _ = self.sender.send(event).await;
  }
}
