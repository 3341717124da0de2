/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! In-memory message store.
//!
//! Backs the engine test suite and sessions that do not need durability.
//! Each session gets its own slot behind its own mutex, so writers for
//! different sessions never contend.

use crate::traits::{raw_has_field, ArchivedRecord, MessageStore, StoredRecord};
use async_trait::async_trait;
use bytes::Bytes;
use fixline_core::error::StoreError;
use fixline_core::{Direction, SessionId, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Per-session record tables and counters.
///
/// Shared by the memory and file backends; the file backend replays its
/// journal into slots at open.
#[derive(Debug)]
pub(crate) struct SessionSlot {
    pub(crate) inbound: BTreeMap<u64, StoredRecord>,
    pub(crate) outbound: BTreeMap<u64, StoredRecord>,
    pub(crate) archive: Vec<ArchivedRecord>,
    pub(crate) next_incoming: u64,
    pub(crate) next_outgoing: u64,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        Self {
            inbound: BTreeMap::new(),
            outbound: BTreeMap::new(),
            archive: Vec::new(),
            next_incoming: 1,
            next_outgoing: 1,
        }
    }

    fn table(&mut self, direction: Direction) -> &mut BTreeMap<u64, StoredRecord> {
        match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        }
    }

    /// Inserts a record, archiving any displaced one.
    ///
    /// The displaced record's `archived_at` is the incoming record's
    /// timestamp, which is the overwrite time.
    pub(crate) fn apply_store(&mut self, record: StoredRecord) {
        let archived_at = record.timestamp;
        let direction = record.direction;
        let seq_num = record.seq_num;
        if let Some(displaced) = self.table(direction).insert(seq_num, record) {
            self.archive.push(ArchivedRecord {
                record: displaced,
                archived_at,
            });
        }
        if direction == Direction::Outbound && seq_num >= self.next_outgoing {
            self.next_outgoing = seq_num + 1;
        }
    }

    pub(crate) fn get(&self, seq_num: u64, direction: Direction) -> Option<&StoredRecord> {
        match direction {
            Direction::Inbound => self.inbound.get(&seq_num),
            Direction::Outbound => self.outbound.get(&seq_num),
        }
    }

    pub(crate) fn range(&self, begin: u64, end: u64) -> Vec<StoredRecord> {
        let end = if end == 0 {
            self.next_outgoing.saturating_sub(1)
        } else {
            end
        };
        if begin > end {
            return Vec::new();
        }
        self.outbound
            .range(begin..=end)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub(crate) fn find_by_field(&self, tag: u32, value: &[u8]) -> Vec<StoredRecord> {
        self.inbound
            .values()
            .chain(self.outbound.values())
            .filter(|record| raw_has_field(&record.raw, tag, value))
            .cloned()
            .collect()
    }

    pub(crate) fn archived(&self, seq_num: u64, direction: Direction) -> Vec<ArchivedRecord> {
        self.archive
            .iter()
            .filter(|a| a.record.seq_num == seq_num && a.record.direction == direction)
            .cloned()
            .collect()
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory message store.
///
/// Mandatory backend for the test suite; all data is lost when the process
/// exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionSlot>>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session: &SessionId) -> Arc<Mutex<SessionSlot>> {
        if let Some(slot) = self.sessions.read().get(session) {
            return Arc::clone(slot);
        }
        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(session.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::new()))),
        )
    }

    /// Number of live records stored for a session, both directions.
    #[must_use]
    pub fn message_count(&self, session: &SessionId) -> usize {
        let slot = self.slot(session);
        let slot = slot.lock();
        slot.inbound.len() + slot.outbound.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn store(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
        raw: &[u8],
    ) -> Result<(), StoreError> {
        let slot = self.slot(session);
        slot.lock().apply_store(StoredRecord {
            session_id: session.clone(),
            seq_num,
            direction,
            raw: Bytes::copy_from_slice(raw),
            timestamp: Timestamp::now(),
        });
        Ok(())
    }

    async fn get(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let slot = self.slot(session);
        let slot = slot.lock();
        Ok(slot.get(seq_num, direction).cloned())
    }

    async fn range(
        &self,
        session: &SessionId,
        begin: u64,
        end: u64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let slot = self.slot(session);
        let slot = slot.lock();
        Ok(slot.range(begin, end))
    }

    async fn find_by_field(
        &self,
        session: &SessionId,
        tag: u32,
        value: &[u8],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let slot = self.slot(session);
        let slot = slot.lock();
        Ok(slot.find_by_field(tag, value))
    }

    async fn archived(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Vec<ArchivedRecord>, StoreError> {
        let slot = self.slot(session);
        let slot = slot.lock();
        Ok(slot.archived(seq_num, direction))
    }

    async fn next_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        Ok(self.slot(session).lock().next_incoming)
    }

    async fn next_outgoing(&self, session: &SessionId) -> Result<u64, StoreError> {
        Ok(self.slot(session).lock().next_outgoing)
    }

    async fn set_incoming(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        self.slot(session).lock().next_incoming = seq;
        Ok(())
    }

    async fn set_outgoing(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        self.slot(session).lock().next_outgoing = seq;
        Ok(())
    }

    async fn increment_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        let slot = self.slot(session);
        let mut slot = slot.lock();
        slot.next_incoming += 1;
        Ok(slot.next_incoming)
    }

    async fn reset(&self, session: &SessionId) -> Result<(), StoreError> {
        let slot = self.slot(session);
        let mut slot = slot.lock();
        slot.next_incoming = 1;
        slot.next_outgoing = 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
