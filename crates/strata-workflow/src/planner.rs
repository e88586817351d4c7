//! Pure, synchronous dependency planner.
//!
//! The planner is a state machine over block and edge states. It performs no
//! I/O and never raises mid-run; the runtime decides what an empty ready
//! batch means (done vs. stuck).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::edge::Edge;
use crate::error::PlanError;

/// State of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
  Pending,
  Processed,
}

/// State of one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
  Pending,
  Processing,
  Completed,
}

/// Execution progress counters, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  pub pending_edges: usize,
  pub processing_edges: usize,
  pub completed_edges: usize,
  pub processed_blocks: usize,
  pub total_blocks: usize,
}

/// DAG state machine over blocks and edges.
#[derive(Debug, Clone)]
pub struct Planner {
  block_state: HashMap<String, BlockState>,
  edge_state: HashMap<String, EdgeState>,
  edge_inputs: HashMap<String, HashSet<String>>,
  edge_outputs: HashMap<String, HashSet<String>>,
}

impl Planner {
  /// Build planner state from a workflow's blocks and edges.
  ///
  /// A block starts `processed` when it has data available at submission:
  /// inline content, or external metadata a prefetch task can resolve. The
  /// runtime joins outstanding prefetches before a batch actually runs.
  pub fn build(blocks: &HashMap<String, Block>, edges: &HashMap<String, Edge>) -> Self {
    let block_state = blocks
      .iter()
      .map(|(id, block)| {
        let state = if block.has_initial_data() {
          BlockState::Processed
        } else {
          BlockState::Pending
        };
        (id.clone(), state)
      })
      .collect();

    let edge_state = edges
      .keys()
      .map(|id| (id.clone(), EdgeState::Pending))
      .collect();

    let edge_inputs = edges
      .iter()
      .map(|(id, edge)| (id.clone(), edge.inputs.keys().cloned().collect()))
      .collect();
    let edge_outputs = edges
      .iter()
      .map(|(id, edge)| (id.clone(), edge.outputs.keys().cloned().collect()))
      .collect();

    Self {
      block_state,
      edge_state,
      edge_inputs,
      edge_outputs,
    }
  }

  /// Pre-flight validation: every referenced block exists, no edge lists a
  /// block as both input and output, and the block dependency graph is
  /// acyclic.
  pub fn validate(&self) -> Result<(), PlanError> {
    for (edge_id, inputs) in &self.edge_inputs {
      for block_id in inputs {
        if !self.block_state.contains_key(block_id) {
          return Err(PlanError::UnknownInputBlock {
            edge_id: edge_id.clone(),
            block_id: block_id.clone(),
          });
        }
      }
      let outputs = &self.edge_outputs[edge_id];
      for block_id in outputs {
        if !self.block_state.contains_key(block_id) {
          return Err(PlanError::UnknownOutputBlock {
            edge_id: edge_id.clone(),
            block_id: block_id.clone(),
          });
        }
        if inputs.contains(block_id) {
          return Err(PlanError::SelfLoop {
            edge_id: edge_id.clone(),
            block_id: block_id.clone(),
          });
        }
      }
    }

    self.detect_cycle()
  }

  /// All pending edges whose entire input set is processed.
  ///
  /// Returned sorted for stable logs and tests. Empty means either done or
  /// stalled; the caller distinguishes via [`Planner::is_complete`].
  pub fn next_ready_batch(&self) -> Vec<String> {
    let mut ready: Vec<String> = self
      .edge_state
      .iter()
      .filter(|(_, state)| **state == EdgeState::Pending)
      .filter(|(id, _)| {
        self.edge_inputs[*id]
          .iter()
          .all(|block_id| self.block_state.get(block_id) == Some(&BlockState::Processed))
      })
      .map(|(id, _)| id.clone())
      .collect();
    ready.sort();
    ready
  }

  /// Union of input block ids across a batch of edges.
  pub fn inputs_for_batch<I, S>(&self, batch: I) -> HashSet<String>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    batch
      .into_iter()
      .filter_map(|id| self.edge_inputs.get(id.as_ref()))
      .flatten()
      .cloned()
      .collect()
  }

  /// Union of output block ids across a batch of edges.
  pub fn outputs_for_batch<I, S>(&self, batch: I) -> HashSet<String>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    batch
      .into_iter()
      .filter_map(|id| self.edge_outputs.get(id.as_ref()))
      .flatten()
      .cloned()
      .collect()
  }

  /// Mark edges as processing. Unknown ids are ignored.
  pub fn mark_processing<I, S>(&mut self, ids: I)
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for id in ids {
      if let Some(state) = self.edge_state.get_mut(id.as_ref()) {
        *state = EdgeState::Processing;
      }
    }
  }

  /// Mark edges as completed. Unknown ids are ignored.
  pub fn mark_completed<I, S>(&mut self, ids: I)
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for id in ids {
      if let Some(state) = self.edge_state.get_mut(id.as_ref()) {
        *state = EdgeState::Completed;
      }
    }
  }

  /// Mark blocks as processed. Unknown ids are ignored.
  pub fn mark_blocks_processed<I, S>(&mut self, ids: I)
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for id in ids {
      if let Some(state) = self.block_state.get_mut(id.as_ref()) {
        *state = BlockState::Processed;
      }
    }
  }

  /// Whether every edge has completed.
  pub fn is_complete(&self) -> bool {
    self
      .edge_state
      .values()
      .all(|state| *state == EdgeState::Completed)
  }

  /// Number of edges currently processing.
  pub fn processing_count(&self) -> usize {
    self
      .edge_state
      .values()
      .filter(|state| **state == EdgeState::Processing)
      .count()
  }

  pub fn block_state(&self, block_id: &str) -> Option<BlockState> {
    self.block_state.get(block_id).copied()
  }

  pub fn edge_state(&self, edge_id: &str) -> Option<EdgeState> {
    self.edge_state.get(edge_id).copied()
  }

  /// Progress counters across all blocks and edges.
  pub fn progress(&self) -> Progress {
    let mut progress = Progress {
      pending_edges: 0,
      processing_edges: 0,
      completed_edges: 0,
      processed_blocks: 0,
      total_blocks: self.block_state.len(),
    };
    for state in self.edge_state.values() {
      match state {
        EdgeState::Pending => progress.pending_edges += 1,
        EdgeState::Processing => progress.processing_edges += 1,
        EdgeState::Completed => progress.completed_edges += 1,
      }
    }
    progress.processed_blocks = self
      .block_state
      .values()
      .filter(|state| **state == BlockState::Processed)
      .count();
    progress
  }

  /// DFS three-coloring over the block dependency graph: block `u` precedes
  /// block `v` when some edge consumes `u` and produces `v`.
  fn detect_cycle(&self) -> Result<(), PlanError> {
    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    for (edge_id, inputs) in &self.edge_inputs {
      for input in inputs {
        for output in &self.edge_outputs[edge_id] {
          downstream
            .entry(input.as_str())
            .or_default()
            .push(output.as_str());
        }
      }
    }

    // 0 = unvisited, 1 = in progress, 2 = done
    let mut color: HashMap<&str, u8> = self
      .block_state
      .keys()
      .map(|id| (id.as_str(), 0u8))
      .collect();

    fn dfs<'a>(
      node: &'a str,
      downstream: &HashMap<&'a str, Vec<&'a str>>,
      color: &mut HashMap<&'a str, u8>,
    ) -> Option<&'a str> {
      color.insert(node, 1);
      for next in downstream.get(node).into_iter().flatten() {
        match color.get(next).copied().unwrap_or(0) {
          1 => return Some(next),
          0 => {
            if let Some(found) = dfs(next, downstream, color) {
              return Some(found);
            }
          }
          _ => {}
        }
      }
      color.insert(node, 2);
      None
    }

    let ids: Vec<&str> = color.keys().copied().collect();
    for id in ids {
      if color[id] == 0 {
        if let Some(block_id) = dfs(id, &downstream, &mut color) {
          return Err(PlanError::Cycle {
            block_id: block_id.to_string(),
          });
        }
      }
    }
    Ok(())
  }
}
