//! Concurrent workflow orchestration.
//!
//! [`Env`] ties a workflow planner to an [`EdgeExecutor`], a storage
//! [`ManifestClient`](strata_storage::ManifestClient), and an event
//! notifier. Each [`Env::run`] yields a [`WorkflowRun`] handle that drives
//! the run: ready edges execute concurrently in batches, block outputs are
//! tiered between inline and external storage, and typed
//! [`ExecutionEvent`]s stream to the notifier throughout.

mod config;
mod error;
mod event;
mod execution;
mod executor;
mod runtime;
mod scratch;
mod strategy;
mod tiering;
mod update;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use event::{ChannelNotifier, EventSender, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use execution::WorkflowRun;
pub use executor::{EdgeExecutor, EdgeInput, ExecutorError};
pub use runtime::{Env, RunResult};
pub use scratch::ScratchSpace;
pub use strategy::PersistenceStrategy;
pub use tiering::{StorageMetadata, TieringPolicy};
pub use update::BlockUpdateService;
