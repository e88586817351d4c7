//! Data model and pure execution planner for strata workflows.
//!
//! A workflow is a set of typed content [`Block`]s connected by computation
//! [`Edge`]s. The [`Planner`] is a pure DAG state machine over those blocks
//! and edges: it computes ready batches, tracks per-edge/per-block state,
//! and validates graph structure. All I/O lives in the runtime and storage
//! crates.

mod block;
mod edge;
mod error;
mod planner;
mod workflow;

pub use block::{Block, Content, ExternalMetadata, FileRef, SemanticType, StorageClass};
pub use edge::Edge;
pub use error::{PlanError, WorkflowError};
pub use planner::{BlockState, EdgeState, Planner, Progress};
pub use workflow::{WORKFLOW_VERSION, Workflow};
