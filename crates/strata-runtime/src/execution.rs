//! Workflow run execution.
//!
//! Drives the planner loop: prefetch fan-out, batched concurrent edge
//! execution, tiered persistence of outputs, and the event stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use strata_workflow::{Block, BlockState, Edge, EdgeState, Planner, Workflow};

use crate::error::RuntimeError;
use crate::event::{EventSender, ExecutionEvent};
use crate::executor::EdgeInput;
use crate::runtime::{Env, RunResult};
use crate::scratch::ScratchSpace;
use crate::strategy::PersistenceStrategy;
use crate::tiering::TieringPolicy;
use crate::update::BlockUpdateService;

/// A handle to one workflow run.
///
/// Call `.wait()` to drive the run and get the result.
pub struct WorkflowRun<'a> {
  env: &'a Env,
  execution_id: String,
  workflow: Workflow,
  cancel: CancellationToken,
}

impl<'a> WorkflowRun<'a> {
  pub(crate) fn new(
    env: &'a Env,
    execution_id: String,
    workflow: Workflow,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      env,
      execution_id,
      workflow,
      cancel,
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Drive the run to completion.
  ///
  /// Scratch directories are removed on every exit path; the terminal
  /// `TASK_COMPLETED` / `TASK_FAILED` event is always emitted.
  #[instrument(name = "workflow_run", skip(self), fields(execution_id = %self.execution_id))]
  pub async fn wait(mut self) -> Result<RunResult, RuntimeError> {
    let started = Instant::now();

    let (sender, mut receiver) = mpsc::channel(self.env.config.event_buffer.max(1));
    let events = EventSender::new(sender);
    let notifier = self.env.notifier.clone();
    let drain = tokio::spawn(async move {
      while let Some(event) = receiver.recv().await {
        notifier.notify(event);
      }
    });

    let scratch = Arc::new(ScratchSpace::new(
      self.env.config.scratch_root.join(&self.execution_id),
    ));

    let result = match self.env.config.run_timeout {
      Some(budget) => {
        match tokio::time::timeout(budget, self.run_inner(started, &events, &scratch)).await {
          Ok(result) => result,
          Err(_) => Err(RuntimeError::Timeout {
            seconds: budget.as_secs(),
          }),
        }
      }
      None => self.run_inner(started, &events, &scratch).await,
    };

    match &result {
      Ok(_) => {
        info!(execution_id = %self.execution_id, "workflow run completed");
      }
      Err(err) => {
        error!(execution_id = %self.execution_id, error = %err, "workflow run failed");
        events
          .emit(ExecutionEvent::TaskFailed {
            timestamp: Utc::now(),
            error_message: err.to_string(),
            error_type: err.error_type().to_string(),
          })
          .await;
      }
    }

    // Cleanup runs regardless of outcome and never masks it.
    scratch.cleanup();

    drop(events);
    let _ = drain.await;
    result
  }

  async fn run_inner(
    &mut self,
    started: Instant,
    events: &EventSender,
    scratch: &Arc<ScratchSpace>,
  ) -> Result<RunResult, RuntimeError> {
    let mut planner = Planner::build(&self.workflow.blocks, &self.workflow.edges);
    planner.validate()?;

    let mut blocks = std::mem::take(&mut self.workflow.blocks);
    let edges = std::mem::take(&mut self.workflow.edges);

    info!(
      execution_id = %self.execution_id,
      total_blocks = blocks.len(),
      total_edges = edges.len(),
      "workflow run started"
    );
    events
      .emit(ExecutionEvent::TaskStarted {
        timestamp: Utc::now(),
        execution_id: self.execution_id.clone(),
        total_blocks: blocks.len(),
        total_edges: edges.len(),
      })
      .await;

    // Prefetch fan-out: every block with unresolved external data gets its
    // own task immediately. Each block moves into its task and is rejoined
    // lazily, the first time a batch needs it. The task hands the block
    // back whether or not the resolve succeeded; whether a failure matters
    // depends on how the block gets used.
    let mut prefetches: HashMap<String, JoinHandle<(Block, Result<(), RuntimeError>)>> =
      HashMap::new();
    let prefetch_ids: Vec<String> = blocks
      .values()
      .filter(|block| block.needs_prefetch())
      .map(|block| block.id.clone())
      .collect();
    for block_id in prefetch_ids {
      if let Some(mut block) = blocks.remove(&block_id) {
        let client = self.env.client.clone();
        let scratch = scratch.clone();
        prefetches.insert(
          block_id,
          tokio::spawn(async move {
            let resolved = PersistenceStrategy::External
              .resolve(&client, &mut block, &scratch)
              .await;
            (block, resolved)
          }),
        );
      }
    }

    let update_service = BlockUpdateService::new(
      TieringPolicy::new(self.env.config.tiering_threshold),
      self.env.client.clone(),
    );
    let mut block_results: HashMap<String, Value> = HashMap::new();

    loop {
      if self.cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
      }

      let batch = planner.next_ready_batch();
      if batch.is_empty() {
        if planner.is_complete() {
          break;
        }
        // Batches join synchronously and prefetch never gates readiness, so
        // empty-but-incomplete is a definitive stall.
        return Err(RuntimeError::Stuck {
          message: stuck_message(&planner, &edges),
        });
      }

      info!(execution_id = %self.execution_id, batch = ?batch, "executing ready batch");
      planner.mark_processing(&batch);
      for edge_id in &batch {
        if let Some(edge) = edges.get(edge_id) {
          events
            .emit(ExecutionEvent::EdgeStarted {
              timestamp: Utc::now(),
              edge_id: edge_id.clone(),
              edge_type: edge.edge_type.clone(),
            })
            .await;
        }
      }
      events
        .emit(ExecutionEvent::ProgressUpdate {
          timestamp: Utc::now(),
          progress: planner.progress(),
        })
        .await;

      // Granular join: await only the prefetches this batch needs; the rest
      // keep running in the background.
      for block_id in planner.inputs_for_batch(&batch) {
        if let Some(handle) = prefetches.remove(&block_id) {
          let (block, resolved) = handle.await.map_err(|err| RuntimeError::Join {
            message: err.to_string(),
          })?;
          resolved?;
          blocks.insert(block_id, block);
        }
      }

      // A prefetch racing a producing edge loses: this batch is about to
      // overwrite the block, so rejoin it now and let the fresh output
      // supersede whatever the prefetch resolved. A failed resolve is moot
      // for the same reason.
      for block_id in planner.outputs_for_batch(&batch) {
        if let Some(handle) = prefetches.remove(&block_id) {
          let (block, resolved) = handle.await.map_err(|err| RuntimeError::Join {
            message: err.to_string(),
          })?;
          if let Err(err) = resolved {
            warn!(
              block_id = %block.id,
              error = %err,
              "prefetch failed for a block this batch produces, output supersedes"
            );
          }
          blocks.insert(block_id, block);
        }
      }

      // All edges in the batch execute concurrently; the batch is the
      // synchronization point.
      let mut handles = Vec::with_capacity(batch.len());
      for edge_id in &batch {
        let edge = edges
          .get(edge_id)
          .cloned()
          .ok_or_else(|| RuntimeError::Stuck {
            message: format!("edge '{edge_id}' disappeared from the workflow"),
          })?;
        let mut inputs = HashMap::with_capacity(edge.inputs.len());
        for (block_id, alias) in &edge.inputs {
          let content = blocks
            .get(block_id)
            .map(|block| block.content.to_value())
            .unwrap_or(Value::Null);
          inputs.insert(
            block_id.clone(),
            EdgeInput {
              alias: alias.clone(),
              content,
            },
          );
        }

        let executor = self.env.executor.clone();
        handles.push(tokio::spawn(async move {
          let result = executor.execute(&edge, &inputs).await;
          (edge, result)
        }));
      }

      let joined = tokio::select! {
        joined = futures::future::join_all(handles) => joined,
        _ = self.cancel.cancelled() => {
          warn!(execution_id = %self.execution_id, "run cancelled during batch execution");
          return Err(RuntimeError::Cancelled);
        }
      };

      let mut batch_outputs: Vec<(String, HashMap<String, Value>)> = Vec::new();
      for join_result in joined {
        let (edge, result) = join_result.map_err(|err| RuntimeError::Join {
          message: err.to_string(),
        })?;
        match result {
          Ok(outputs) => {
            let mut output_blocks: Vec<String> = outputs.keys().cloned().collect();
            output_blocks.sort();
            events
              .emit(ExecutionEvent::EdgeCompleted {
                timestamp: Utc::now(),
                edge_id: edge.id.clone(),
                output_blocks,
              })
              .await;
            batch_outputs.push((edge.id.clone(), outputs));
          }
          Err(err) => {
            error!(
              execution_id = %self.execution_id,
              edge_id = %edge.id,
              error = %err,
              "edge execution failed"
            );
            events
              .emit(ExecutionEvent::EdgeError {
                timestamp: Utc::now(),
                edge_id: edge.id.clone(),
                error_message: err.message.clone(),
                error_type: err.kind.clone(),
              })
              .await;
            // One failure aborts the whole run; events already emitted for
            // other edges in this batch stand.
            return Err(RuntimeError::EdgeFailed {
              edge_id: edge.id.clone(),
              error_type: err.kind,
              message: err.message,
            });
          }
        }
      }

      for (edge_id, outputs) in batch_outputs {
        for (block_id, raw) in outputs {
          let Some(block) = blocks.get_mut(&block_id) else {
            warn!(edge_id, block_id, "edge produced output for unknown block, ignoring");
            continue;
          };
          let compat = update_service
            .apply_output(block, raw, events)
            .await?;
          block_results.insert(block_id, compat);
        }
      }

      let produced = planner.outputs_for_batch(&batch);
      planner.mark_blocks_processed(&produced);
      planner.mark_completed(&batch);

      let mut produced_sorted: Vec<String> = produced.into_iter().collect();
      produced_sorted.sort();
      events
        .emit(ExecutionEvent::BatchCompleted {
          timestamp: Utc::now(),
          edge_ids: batch.clone(),
          output_blocks: produced_sorted,
        })
        .await;
      events
        .emit(ExecutionEvent::ProgressUpdate {
          timestamp: Utc::now(),
          progress: planner.progress(),
        })
        .await;
    }

    // Rejoin whatever prefetch work is still in flight so the result holds
    // every block. A failure here cannot change the run's outcome.
    for (block_id, handle) in prefetches.drain() {
      match handle.await {
        Ok((block, resolved)) => {
          if let Err(err) = resolved {
            warn!(block_id, error = %err, "unneeded prefetch failed");
          }
          blocks.insert(block_id, block);
        }
        Err(err) => warn!(block_id, error = %err, "prefetch task join failed"),
      }
    }

    let progress = planner.progress();
    events
      .emit(ExecutionEvent::TaskCompleted {
        timestamp: Utc::now(),
        duration_ms: started.elapsed().as_millis() as u64,
        total_blocks_processed: progress.processed_blocks,
        total_edges_completed: progress.completed_edges,
      })
      .await;

    Ok(RunResult {
      execution_id: self.execution_id.clone(),
      blocks,
      block_results,
    })
  }
}

fn stuck_message(planner: &Planner, edges: &HashMap<String, Edge>) -> String {
  let mut waiting = Vec::new();
  for (edge_id, edge) in edges {
    if planner.edge_state(edge_id) == Some(EdgeState::Pending) {
      let mut missing: Vec<&str> = edge
        .inputs
        .keys()
        .filter(|block_id| planner.block_state(block_id) != Some(BlockState::Processed))
        .map(|block_id| block_id.as_str())
        .collect();
      missing.sort();
      waiting.push(format!(
        "edge '{}' waiting on blocks [{}]",
        edge_id,
        missing.join(", ")
      ));
    }
  }
  waiting.sort();
  format!("no ready batch and nothing in flight; {}", waiting.join("; "))
}
