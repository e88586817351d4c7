//! Storage errors.

/// Errors from the storage transport and manifest client.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  /// Network-level request failure.
  #[error("storage request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// The storage service answered with an unexpected status code.
  #[error("storage service returned {status} for {context}: {body}")]
  UnexpectedStatus {
    status: u16,
    context: String,
    body: String,
  },

  /// A manifest update carried a stale etag; a concurrent writer moved it.
  #[error("manifest update conflict for '{key}' (expected etag '{expected_etag}')")]
  Conflict { key: String, expected_etag: String },

  /// Conflict retries were exhausted without a successful update.
  #[error("manifest update for '{key}' still conflicting after {attempts} attempts")]
  RetriesExhausted { key: String, attempts: u32 },

  /// A stored object could not be decoded.
  #[error("failed to decode stored object: {0}")]
  Decode(#[from] serde_json::Error),

  /// The requested object does not exist.
  #[error("object not found: {0}")]
  NotFound(String),

  /// The configured base URL is invalid.
  #[error("invalid storage url: {0}")]
  Url(#[from] url::ParseError),
}
