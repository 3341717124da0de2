/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! File-backed message store.
//!
//! Development backend: a JSON-lines journal of store and counter
//! operations, replayed into memory at open. Each operation is appended
//! and flushed before the call returns, so the on-disk journal always
//! reflects every acknowledged write. Overwrites are reconstructed during
//! replay, which keeps the archive deterministic across restarts.

use crate::memory::SessionSlot;
use crate::traits::{ArchivedRecord, MessageStore, StoredRecord};
use async_trait::async_trait;
use bytes::Bytes;
use fixline_core::error::StoreError;
use fixline_core::{CompId, Direction, SessionId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct SessionKey {
    begin_string: String,
    sender: String,
    target: String,
}

impl SessionKey {
    fn of(session: &SessionId) -> Self {
        Self {
            begin_string: session.begin_string.clone(),
            sender: session.sender_comp_id.as_str().to_string(),
            target: session.target_comp_id.as_str().to_string(),
        }
    }

    fn to_session_id(&self) -> Result<SessionId, StoreError> {
        Ok(SessionId {
            begin_string: self.begin_string.clone(),
            sender_comp_id: CompId::new(&self.sender).ok_or_else(|| StoreError::Corrupted {
                reason: format!("invalid sender comp id in journal: {}", self.sender),
            })?,
            target_comp_id: CompId::new(&self.target).ok_or_else(|| StoreError::Corrupted {
                reason: format!("invalid target comp id in journal: {}", self.target),
            })?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalOp {
    Store {
        session: SessionKey,
        seq_num: u64,
        direction: char,
        raw: Vec<u8>,
        timestamp_ms: i64,
    },
    SetIncoming {
        session: SessionKey,
        seq: u64,
    },
    SetOutgoing {
        session: SessionKey,
        seq: u64,
    },
    Reset {
        session: SessionKey,
    },
}

#[derive(Debug)]
struct FileInner {
    slots: HashMap<SessionId, SessionSlot>,
    writer: BufWriter<File>,
}

impl FileInner {
    fn slot(&mut self, session: &SessionId) -> &mut SessionSlot {
        self.slots.entry(session.clone()).or_default()
    }

    fn apply(&mut self, op: &JournalOp) -> Result<(), StoreError> {
        match op {
            JournalOp::Store {
                session,
                seq_num,
                direction,
                raw,
                timestamp_ms,
            } => {
                let session_id = session.to_session_id()?;
                let direction =
                    Direction::from_char(*direction).ok_or_else(|| StoreError::Corrupted {
                        reason: format!("invalid direction in journal: {direction}"),
                    })?;
                self.slot(&session_id).apply_store(StoredRecord {
                    session_id: session_id.clone(),
                    seq_num: *seq_num,
                    direction,
                    raw: Bytes::from(raw.clone()),
                    timestamp: Timestamp::from_millis(*timestamp_ms),
                });
            }
            JournalOp::SetIncoming { session, seq } => {
                let session_id = session.to_session_id()?;
                self.slot(&session_id).next_incoming = *seq;
            }
            JournalOp::SetOutgoing { session, seq } => {
                let session_id = session.to_session_id()?;
                self.slot(&session_id).next_outgoing = *seq;
            }
            JournalOp::Reset { session } => {
                let session_id = session.to_session_id()?;
                let slot = self.slot(&session_id);
                slot.next_incoming = 1;
                slot.next_outgoing = 1;
            }
        }
        Ok(())
    }

    fn append(&mut self, op: &JournalOp) -> Result<(), StoreError> {
        let line = serde_json::to_string(op).map_err(|e| StoreError::Io(e.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    fn record(&mut self, op: JournalOp) -> Result<(), StoreError> {
        self.apply(&op)?;
        self.append(&op)
    }
}

/// JSON-lines journal store.
pub struct FileStore {
    inner: Mutex<FileInner>,
}

impl FileStore {
    /// Opens the journal at `path`, replaying any existing operations.
    ///
    /// # Errors
    /// Returns `StoreError` if the journal cannot be opened or contains a
    /// line that does not parse.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut slots = FileInner {
            slots: HashMap::new(),
            // Placeholder writer; replaced after replay below.
            writer: BufWriter::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| StoreError::Io(e.to_string()))?,
            ),
        };

        let reader = File::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(|e| StoreError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let op: JournalOp =
                serde_json::from_str(&line).map_err(|e| StoreError::Corrupted {
                    reason: format!("bad journal line: {e}"),
                })?;
            slots.apply(&op)?;
        }

        Ok(Self {
            inner: Mutex::new(slots),
        })
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn store(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
        raw: &[u8],
    ) -> Result<(), StoreError> {
        self.inner.lock().record(JournalOp::Store {
            session: SessionKey::of(session),
            seq_num,
            direction: direction.as_char(),
            raw: raw.to_vec(),
            timestamp_ms: Timestamp::now().as_millis(),
        })
    }

    async fn get(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.slot(session).get(seq_num, direction).cloned())
    }

    async fn range(
        &self,
        session: &SessionId,
        begin: u64,
        end: u64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.slot(session).range(begin, end))
    }

    async fn find_by_field(
        &self,
        session: &SessionId,
        tag: u32,
        value: &[u8],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.slot(session).find_by_field(tag, value))
    }

    async fn archived(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Vec<ArchivedRecord>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.slot(session).archived(seq_num, direction))
    }

    async fn next_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        Ok(self.inner.lock().slot(session).next_incoming)
    }

    async fn next_outgoing(&self, session: &SessionId) -> Result<u64, StoreError> {
        Ok(self.inner.lock().slot(session).next_outgoing)
    }

    async fn set_incoming(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        self.inner.lock().record(JournalOp::SetIncoming {
            session: SessionKey::of(session),
            seq,
        })
    }

    async fn set_outgoing(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        self.inner.lock().record(JournalOp::SetOutgoing {
            session: SessionKey::of(session),
            seq,
        })
    }

    async fn increment_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let next = inner.slot(session).next_incoming + 1;
        inner.record(JournalOp::SetIncoming {
            session: SessionKey::of(session),
            seq: next,
        })?;
        Ok(next)
    }

    async fn reset(&self, session: &SessionId) -> Result<(), StoreError> {
        self.inner.lock().record(JournalOp::Reset {
            session: SessionKey::of(session),
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner
            .lock()
            .writer
            .flush()
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}
