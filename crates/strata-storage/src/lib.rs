//! Chunked-manifest object storage client for strata.
//!
//! A persisted block-version is a set of named chunks plus a versioned
//! [`Manifest`] describing them. The manifest is append-only and protected
//! by optimistic concurrency: every mutation carries the etag it believes
//! is current, and conflicts are resolved by refetch + merge + bounded
//! retry.
//!
//! # Architecture
//!
//! ```text
//! ManifestClient
//! ├── init_stream_version(block_id) -> StreamVersion
//! ├── upload_chunks_and_update_manifest(..) - etag-chained appends
//! ├── set_version_status(..) - completed | failed
//! └── get_manifest / download_chunk / prefetch_resource
//!
//! StorageTransport (trait)
//! ├── HttpTransport   - real storage service
//! └── MemoryTransport - in-process, for tests and development
//! ```

mod chunk;
mod client;
mod error;
mod http;
mod manifest;
mod memory;
mod transport;

pub use chunk::{
  CHUNK_PREFIX, aggregate_jsonl, chunk_binary, chunk_name, chunk_structured, chunk_text,
  is_chunk_name,
};
pub use client::{ManifestClient, StorageConfig, StreamVersion};
pub use error::StorageError;
pub use http::HttpTransport;
pub use manifest::{
  ChunkEntry, ChunkState, MANIFEST_FILE, MANIFEST_VERSION, Manifest, ManifestMetadata,
  ManifestStatus, manifest_key_for,
};
pub use memory::MemoryTransport;
pub use transport::{ManifestUpdate, StorageTransport, UploadReceipt};
