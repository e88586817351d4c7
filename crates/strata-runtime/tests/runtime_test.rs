//! Integration tests for Env::run using the in-memory storage transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Barrier, mpsc};
use tokio_util::sync::CancellationToken;

use strata_runtime::{
  ChannelNotifier, EdgeExecutor, EdgeInput, Env, ExecutionEvent, ExecutorError, RuntimeConfig,
  RuntimeError,
};
use strata_storage::{ManifestClient, ManifestStatus, MemoryTransport, StorageConfig};
use strata_workflow::{Content, Edge, StorageClass, Workflow};

/// Resolves each output block from the edge's `results` config entry.
struct MappingExecutor;

#[async_trait]
impl EdgeExecutor for MappingExecutor {
  async fn execute(
    &self,
    edge: &Edge,
    _inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError> {
    let results = edge.config.get("results").cloned().unwrap_or(Value::Null);
    let mut outputs = HashMap::new();
    for block_id in edge.outputs.keys() {
      outputs.insert(
        block_id.clone(),
        results.get(block_id).cloned().unwrap_or(Value::Null),
      );
    }
    Ok(outputs)
  }
}

/// Copies the content of the edge's single input into every output block.
struct CopyExecutor;

#[async_trait]
impl EdgeExecutor for CopyExecutor {
  async fn execute(
    &self,
    edge: &Edge,
    inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError> {
    let source = inputs
      .values()
      .next()
      .map(|input| input.content.clone())
      .unwrap_or(Value::Null);
    Ok(
      edge
        .outputs
        .keys()
        .map(|block_id| (block_id.clone(), source.clone()))
        .collect(),
    )
  }
}

/// Records execution order. Edges configured with `"sync": true` rendezvous
/// on a barrier, which only passes if they run concurrently.
struct BarrierExecutor {
  barrier: Arc<Barrier>,
  log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EdgeExecutor for BarrierExecutor {
  async fn execute(
    &self,
    edge: &Edge,
    _inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError> {
    if edge.config.get("sync") == Some(&json!(true)) {
      self.barrier.wait().await;
    }
    self.log.lock().unwrap().push(edge.id.clone());
    Ok(
      edge
        .outputs
        .keys()
        .map(|block_id| (block_id.clone(), json!(edge.id)))
        .collect(),
    )
  }
}

/// Fails every edge with a fixed error.
struct FailingExecutor;

#[async_trait]
impl EdgeExecutor for FailingExecutor {
  async fn execute(
    &self,
    _edge: &Edge,
    _inputs: &HashMap<String, EdgeInput>,
  ) -> Result<HashMap<String, Value>, ExecutorError> {
    Err(ExecutorError::new("provider_error", "model unavailable"))
  }
}

struct TestHarness {
  env: Env,
  client: Arc<ManifestClient>,
  events: mpsc::UnboundedReceiver<ExecutionEvent>,
  _scratch: tempfile::TempDir,
}

fn harness(threshold: usize, executor: Arc<dyn EdgeExecutor>) -> TestHarness {
  let transport = Arc::new(MemoryTransport::new());
  let client = Arc::new(ManifestClient::new(
    transport,
    StorageConfig {
      chunk_size: 8,
      ..StorageConfig::default()
    },
  ));
  harness_with_client(threshold, executor, client)
}

fn harness_with_client(
  threshold: usize,
  executor: Arc<dyn EdgeExecutor>,
  client: Arc<ManifestClient>,
) -> TestHarness {
  let scratch = tempfile::tempdir().expect("failed to create scratch dir");
  let config = RuntimeConfig {
    tiering_threshold: threshold,
    scratch_root: scratch.path().to_path_buf(),
    run_timeout: Some(Duration::from_secs(10)),
    ..RuntimeConfig::default()
  };
  let (sender, events) = mpsc::unbounded_channel();
  let env = Env::new(
    config,
    client.clone(),
    executor,
    Arc::new(ChannelNotifier::new(sender)),
  );
  TestHarness {
    env,
    client,
    events,
    _scratch: scratch,
  }
}

/// All events are in the channel by the time `wait` returns.
fn drain_events(events: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut collected = Vec::new();
  while let Ok(event) = events.try_recv() {
    collected.push(event);
  }
  collected
}

fn puppy_workflow() -> Workflow {
  Workflow::from_value(json!({
    "version": "0.2",
    "blocks": {
      "1": { "label": "prompt", "type": "text", "data": { "content": "puppy" } },
      "2": { "label": "result", "type": "structured", "data": { "content": "" } }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": {
          "inputs": { "1": "context" },
          "outputs": { "2": "result" },
          "results": { "2": { "breed": "corgi" } }
        }
      }
    }
  }))
  .expect("failed to parse workflow")
}

#[tokio::test]
async fn completes_simple_workflow() {
  let mut h = harness(1024, Arc::new(MappingExecutor));
  let result = h
    .env
    .run(puppy_workflow(), CancellationToken::new())
    .wait()
    .await
    .expect("run failed");

  assert_eq!(result.block_results["2"], json!({ "breed": "corgi" }));

  let block = &result.blocks["2"];
  assert!(block.is_resolved);
  assert!(block.is_persisted);
  assert_eq!(block.storage_class, StorageClass::Internal);
  assert!(block.external_metadata.is_none());

  let events = drain_events(&mut h.events);
  assert!(matches!(events.first(), Some(ExecutionEvent::TaskStarted { .. })));
  assert!(matches!(events.last(), Some(ExecutionEvent::TaskCompleted { .. })));

  let completed: Vec<_> = events
    .iter()
    .filter_map(|event| match event {
      ExecutionEvent::EdgeCompleted { edge_id, .. } => Some(edge_id.as_str()),
      _ => None,
    })
    .collect();
  assert_eq!(completed, vec!["e1"]);

  let updated: Vec<_> = events
    .iter()
    .filter_map(|event| match event {
      ExecutionEvent::BlockUpdated {
        block_id, content, ..
      } => Some((block_id.as_str(), content.clone())),
      _ => None,
    })
    .collect();
  assert_eq!(updated.len(), 1);
  assert_eq!(updated[0].0, "2");
  assert_eq!(updated[0].1, Some(json!({ "breed": "corgi" })));
}

#[tokio::test]
async fn missing_producer_reports_stuck() {
  let workflow = Workflow::from_value(json!({
    "blocks": {
      "ghost": { "type": "text", "data": {} },
      "out": { "type": "text", "data": {} }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": { "inputs": { "ghost": "g" }, "outputs": { "out": "o" } }
      }
    }
  }))
  .expect("failed to parse workflow");

  let mut h = harness(1024, Arc::new(MappingExecutor));
  let err = h
    .env
    .run(workflow, CancellationToken::new())
    .wait()
    .await
    .expect_err("run should be stuck");

  assert!(matches!(err, RuntimeError::Stuck { .. }));
  assert!(err.to_string().contains("ghost"));

  let events = drain_events(&mut h.events);
  match events.last() {
    Some(ExecutionEvent::TaskFailed { error_type, .. }) => assert_eq!(error_type, "stuck"),
    other => panic!("expected TaskFailed, got {other:?}"),
  }
}

#[tokio::test]
async fn independent_edges_run_concurrently_before_downstream() {
  let workflow = Workflow::from_value(json!({
    "blocks": {
      "a": { "type": "text", "data": { "content": "left" } },
      "b": { "type": "text", "data": { "content": "right" } },
      "m1": { "type": "text", "data": {} },
      "m2": { "type": "text", "data": {} },
      "final": { "type": "text", "data": {} }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": { "inputs": { "a": "a" }, "outputs": { "m1": "m1" }, "sync": true }
      },
      "e2": {
        "type": "llm",
        "data": { "inputs": { "b": "b" }, "outputs": { "m2": "m2" }, "sync": true }
      },
      "e3": {
        "type": "merge",
        "data": { "inputs": { "m1": "m1", "m2": "m2" }, "outputs": { "final": "f" } }
      }
    }
  }))
  .expect("failed to parse workflow");

  let log = Arc::new(Mutex::new(Vec::new()));
  let executor = Arc::new(BarrierExecutor {
    barrier: Arc::new(Barrier::new(2)),
    log: log.clone(),
  });

  let mut h = harness(1024, executor);
  let result = h
    .env
    .run(workflow, CancellationToken::new())
    .wait()
    .await
    .expect("run failed");

  let order = log.lock().unwrap().clone();
  assert_eq!(order.len(), 3);
  assert_eq!(order[2], "e3");
  assert!(order[..2].contains(&"e1".to_string()));
  assert!(order[..2].contains(&"e2".to_string()));

  assert!(result.blocks.values().all(|block| block.is_resolved));

  // The two independent edges finish in one batch, the merge in a second.
  let batches: Vec<_> = drain_events(&mut h.events)
    .into_iter()
    .filter_map(|event| match event {
      ExecutionEvent::BatchCompleted { mut edge_ids, .. } => {
        edge_ids.sort();
        Some(edge_ids)
      }
      _ => None,
    })
    .collect();
  assert_eq!(batches, vec![vec!["e1", "e2"], vec!["e3"]]);
}

#[tokio::test]
async fn edge_failure_aborts_run() {
  let mut h = harness(1024, Arc::new(FailingExecutor));
  let err = h
    .env
    .run(puppy_workflow(), CancellationToken::new())
    .wait()
    .await
    .expect_err("run should fail");

  match err {
    RuntimeError::EdgeFailed {
      edge_id,
      error_type,
      ..
    } => {
      assert_eq!(edge_id, "e1");
      assert_eq!(error_type, "provider_error");
    }
    other => panic!("expected EdgeFailed, got {other:?}"),
  }

  let events = drain_events(&mut h.events);
  assert!(
    events
      .iter()
      .any(|event| matches!(event, ExecutionEvent::EdgeError { edge_id, .. } if edge_id == "e1"))
  );
  assert!(matches!(events.last(), Some(ExecutionEvent::TaskFailed { .. })));
}

#[tokio::test]
async fn pre_cancelled_run_does_not_execute() {
  let mut h = harness(1024, Arc::new(MappingExecutor));
  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = h
    .env
    .run(puppy_workflow(), cancel)
    .wait()
    .await
    .expect_err("run should be cancelled");
  assert!(matches!(err, RuntimeError::Cancelled));

  let events = drain_events(&mut h.events);
  assert!(
    !events
      .iter()
      .any(|event| matches!(event, ExecutionEvent::EdgeCompleted { .. }))
  );
}

/// Persist one completed text version for `block_id` and return its
/// external metadata.
async fn seed_external_version(
  client: &ManifestClient,
  block_id: &str,
  content: &[u8],
) -> serde_json::Value {
  let version = client
    .init_stream_version(block_id)
    .await
    .expect("init failed");
  let etag = client
    .upload_chunks_and_update_manifest(
      block_id,
      &version.version_id,
      vec![("chunk_000000.txt".to_string(), bytes::Bytes::copy_from_slice(content))],
      &version.manifest_key,
      version.etag.clone(),
    )
    .await
    .expect("upload failed");
  client
    .set_version_status(
      block_id,
      &version.version_id,
      &version.manifest_key,
      etag,
      ManifestStatus::Completed,
    )
    .await
    .expect("status update failed");

  json!({
    "resource_key": version.version_base,
    "content_type": "text",
    "version_id": version.version_id,
    "chunked": true
  })
}

#[tokio::test]
async fn edge_output_supersedes_in_flight_prefetch() {
  let transport = Arc::new(MemoryTransport::new());
  let client = Arc::new(ManifestClient::new(
    transport,
    StorageConfig {
      chunk_size: 8,
      ..StorageConfig::default()
    },
  ));

  // `target` starts with a persisted old version and is also the output of
  // an edge in the same run.
  let metadata = seed_external_version(&client, "target", b"old stale").await;
  let workflow = Workflow::from_value(json!({
    "blocks": {
      "seed": { "type": "text", "data": { "content": "go" } },
      "target": { "type": "text", "data": { "external_metadata": metadata } }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": {
          "inputs": { "seed": "s" },
          "outputs": { "target": "t" },
          "results": { "target": "fresh output" }
        }
      }
    }
  }))
  .expect("failed to parse workflow");

  let mut h = harness_with_client(1024, Arc::new(MappingExecutor), client);
  let result = h
    .env
    .run(workflow, CancellationToken::new())
    .wait()
    .await
    .expect("run failed");

  let target = &result.blocks["target"];
  assert_eq!(target.content, Content::Text("fresh output".to_string()));
  assert!(target.external_metadata.is_none());
  assert_eq!(result.block_results["target"], json!("fresh output"));

  let events = drain_events(&mut h.events);
  assert!(
    events
      .iter()
      .any(|event| matches!(event, ExecutionEvent::BlockUpdated { block_id, .. } if block_id == "target"))
  );
}

#[tokio::test]
async fn large_output_tiers_external_and_prefetches_back() {
  let big_text = "x".repeat(100);
  let workflow = Workflow::from_value(json!({
    "blocks": {
      "seed": { "type": "text", "data": { "content": "go" } },
      "big": { "type": "text", "data": {} }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": {
          "inputs": { "seed": "s" },
          "outputs": { "big": "b" },
          "results": { "big": big_text }
        }
      }
    }
  }))
  .expect("failed to parse workflow");

  // Threshold of 16 with chunk_size 8 forces a multi-chunk external write.
  let mut h = harness(16, Arc::new(MappingExecutor));
  let result = h
    .env
    .run(workflow, CancellationToken::new())
    .wait()
    .await
    .expect("run failed");

  let big = &result.blocks["big"];
  assert_eq!(big.storage_class, StorageClass::External);
  assert!(big.is_persisted);
  let metadata = big.external_metadata.clone().expect("external metadata");
  assert_eq!(result.block_results["big"]["external_metadata"]["resource_key"],
    json!(metadata.resource_key));

  let events = drain_events(&mut h.events);
  assert!(
    events
      .iter()
      .any(|event| matches!(event, ExecutionEvent::StreamStarted { block_id, .. } if block_id == "big"))
  );
  match events
    .iter()
    .find(|event| matches!(event, ExecutionEvent::StreamEnded { .. }))
  {
    Some(ExecutionEvent::StreamEnded {
      chunk_count,
      total_size,
      ..
    }) => {
      assert!(*chunk_count > 1);
      assert_eq!(*total_size, 100);
    }
    other => panic!("expected StreamEnded, got {other:?}"),
  }
  // External content is never inlined into the event stream.
  assert!(events.iter().all(|event| !matches!(
    event,
    ExecutionEvent::BlockUpdated {
      content: Some(_), block_id, ..
    } if block_id == "big"
  )));

  // Second run against the same store: the block comes back in by prefetch
  // and an edge reads its resolved content.
  let downstream = Workflow::from_value(json!({
    "blocks": {
      "big": {
        "type": "text",
        "storage_class": "external",
        "data": { "external_metadata": serde_json::to_value(&metadata).unwrap() }
      },
      "copy": { "type": "text", "data": {} }
    },
    "edges": {
      "e1": {
        "type": "llm",
        "data": { "inputs": { "big": "b" }, "outputs": { "copy": "c" } }
      }
    }
  }))
  .expect("failed to parse workflow");

  let mut h2 = harness_with_client(1024, Arc::new(CopyExecutor), h.client.clone());
  let result = h2
    .env
    .run(downstream, CancellationToken::new())
    .wait()
    .await
    .expect("second run failed");

  assert_eq!(result.block_results["copy"], json!(big_text));
  assert!(result.blocks["big"].is_resolved);
}
