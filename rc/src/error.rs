//! Cache error types

use thiserror::Error;

/// Errors raised by the response store
///
/// Callers on the request path treat every variant as a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
