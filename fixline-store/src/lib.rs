/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline Store
//!
//! Durable, sequence-keyed message storage for the fixline engine.
//!
//! This crate provides:
//! - **MessageStore trait**: the storage contract the engine consumes
//! - **MemoryStore**: in-memory backend, mandatory for the test suite
//! - **FileStore**: JSON-lines journal backend for development
//! - **SqliteStore**: embedded SQLite backend for production
//! - **Factory**: [`open_store`] selecting a backend by configuration name
//!
//! Every backend keys live records by `(session, direction, seq)` and moves
//! displaced records into an append-only archive on overwrite, preserving
//! the audit trail when sequence numbers are reused.

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ArchivedRecord, MessageStore, StoredRecord};

use fixline_core::error::StoreError;
use std::path::Path;
use std::sync::Arc;

/// Opens a message store backend by its configuration name.
///
/// Recognized kinds: `memory`, `file`, `sqlite`. The `file` and `sqlite`
/// backends require a path.
///
/// # Errors
/// Returns `StoreError` for unknown kinds, a missing path, or a backend
/// that fails to open.
pub fn open_store(kind: &str, path: Option<&Path>) -> Result<Arc<dyn MessageStore>, StoreError> {
    match kind {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "file" => {
            let path = path.ok_or_else(|| {
                StoreError::Io("file store requires a StorePath".to_string())
            })?;
            Ok(Arc::new(FileStore::open(path)?))
        }
        "sqlite" => {
            let path = path.ok_or_else(|| {
                StoreError::Io("sqlite store requires a StorePath".to_string())
            })?;
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        other => Err(StoreError::Io(format!("unknown store kind: {other}"))),
    }
}
