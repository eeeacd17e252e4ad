//! ResponseCache - durable store for inference responses
//!
//! Responses are keyed by a SHA-256 digest of the canonical JSON form of the
//! full request, so semantically identical requests share one entry and any
//! difference in content or parameters produces a different key.
//!
//! # Storage
//!
//! ```text
//! responses.db            # SQLite, WAL mode
//! └── responses
//!     ├── key TEXT PRIMARY KEY
//!     ├── value TEXT          # serialized response
//!     └── inserted_at INTEGER # unix ms
//! ```
//!
//! # Example
//!
//! ```ignore
//! use responsecache::{ResponseStore, request_key};
//!
//! let store = ResponseStore::open("responses.db")?;
//! let key = request_key(&request)?;
//! if store.get(&key)?.is_none() {
//!     store.set(&key, &serde_json::to_string(&response)?)?;
//! }
//! ```

pub mod cli;
mod error;
mod key;
mod store;

pub use error::CacheError;
pub use key::{canonical_json, request_key};
pub use store::{CacheEntry, CacheStats, EntrySummary, ResponseStore};

/// Default database file name
pub const DEFAULT_DB_NAME: &str = "responses.db";

/// Default store location: `<data_local_dir>/protoforge/responses.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("protoforge")
        .join(DEFAULT_DB_NAME)
}

/// Current time as unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
