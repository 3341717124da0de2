/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Message store contract.
//!
//! The store is the only resource shared across sessions in one process.
//! Implementations serialize writes per session; reads may run concurrently
//! with writes, and a completed `store` call is visible to every later
//! `get` in the same process.

use async_trait::async_trait;
use bytes::Bytes;
use fixline_core::error::StoreError;
use fixline_core::{Direction, SessionId, Timestamp};

/// A live stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// The session the message belongs to.
    pub session_id: SessionId,
    /// The MsgSeqNum the message carried.
    pub seq_num: u64,
    /// Whether the message was received or sent.
    pub direction: Direction,
    /// The complete framed wire bytes.
    pub raw: Bytes,
    /// When the record was stored.
    pub timestamp: Timestamp,
}

/// A record displaced by an overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRecord {
    /// The displaced record.
    pub record: StoredRecord,
    /// When the overwrite happened.
    pub archived_at: Timestamp,
}

/// Abstract interface for FIX message persistence.
///
/// Live records are keyed by `(session, direction, seq)`; `store` is
/// idempotent on that key, and an overwrite moves the displaced record into
/// the archive before replacing it — archive-then-replace is atomic.
///
/// Sequence counters are durable and per session. Storing an outbound
/// record at or past the outbound counter advances the counter to one past
/// the stored sequence number, so the counter always names the next unused
/// outbound number. The inbound counter only moves through the explicit
/// setters: the engine must not let a gap message advance it.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores a message, archiving any record already at the same key.
    ///
    /// # Errors
    /// Returns `StoreError` if the backend cannot persist the message; the
    /// engine treats this as fatal for the session.
    async fn store(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
        raw: &[u8],
    ) -> Result<(), StoreError>;

    /// Retrieves the live record at a key, if any.
    async fn get(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Retrieves outbound records in `[begin, end]`, ordered by sequence
    /// number. `end = 0` means through the latest outbound message.
    async fn range(
        &self,
        session: &SessionId,
        begin: u64,
        end: u64,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Finds live records whose body carries `tag=value`.
    ///
    /// Inspection tooling only; not on the hot path.
    async fn find_by_field(
        &self,
        session: &SessionId,
        tag: u32,
        value: &[u8],
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Returns the archive rows for a key, oldest first.
    async fn archived(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Vec<ArchivedRecord>, StoreError>;

    /// The next expected inbound sequence number.
    async fn next_incoming(&self, session: &SessionId) -> Result<u64, StoreError>;

    /// The next unused outbound sequence number.
    async fn next_outgoing(&self, session: &SessionId) -> Result<u64, StoreError>;

    /// Sets the next expected inbound sequence number.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidSequence` for values below 1.
    async fn set_incoming(&self, session: &SessionId, seq: u64) -> Result<(), StoreError>;

    /// Sets the next outbound sequence number.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidSequence` for values below 1.
    async fn set_outgoing(&self, session: &SessionId, seq: u64) -> Result<(), StoreError>;

    /// Advances the inbound counter by one; returns the new value.
    async fn increment_incoming(&self, session: &SessionId) -> Result<u64, StoreError>;

    /// Resets both counters to 1, leaving stored messages in place.
    async fn reset(&self, session: &SessionId) -> Result<(), StoreError>;

    /// Flushes and releases backend resources.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Byte-level `tag=value` membership test on a framed message.
///
/// Matches the pair at the start of the buffer or directly after an SOH, so
/// `34=1` never matches inside `134=1` or `34=12`.
#[must_use]
pub fn raw_has_field(raw: &[u8], tag: u32, value: &[u8]) -> bool {
    let mut pattern = Vec::with_capacity(12 + value.len());
    pattern.extend_from_slice(tag.to_string().as_bytes());
    pattern.push(b'=');
    pattern.extend_from_slice(value);
    pattern.push(0x01);

    let mut offset = 0;
    while offset + pattern.len() <= raw.len() {
        let at_boundary = offset == 0 || raw[offset - 1] == 0x01;
        if at_boundary && raw[offset..].starts_with(&pattern) {
            return true;
        }
        offset += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_has_field_at_start() {
        assert!(raw_has_field(b"8=FIX.4.4\x019=5\x01", 8, b"FIX.4.4"));
    }

    #[test]
    fn test_raw_has_field_mid_message() {
        let raw = b"8=FIX.4.4\x0135=D\x0111=ORD1\x01";
        assert!(raw_has_field(raw, 35, b"D"));
        assert!(raw_has_field(raw, 11, b"ORD1"));
    }

    #[test]
    fn test_raw_has_field_no_partial_tag_match() {
        let raw = b"8=FIX.4.4\x01134=1\x01";
        assert!(!raw_has_field(raw, 34, b"1"));
    }

    #[test]
    fn test_raw_has_field_no_partial_value_match() {
        let raw = b"8=FIX.4.4\x0134=12\x01";
        assert!(!raw_has_field(raw, 34, b"1"));
        assert!(raw_has_field(raw, 34, b"12"));
    }

    #[test]
    fn test_raw_has_field_absent() {
        assert!(!raw_has_field(b"8=FIX.4.4\x0135=D\x01", 55, b"MSFT"));
    }
}
