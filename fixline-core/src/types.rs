/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Core types for FIX session operations.
//!
//! This module provides the fundamental types used throughout the fixline
//! engine:
//! - [`SeqNum`]: message sequence number
//! - [`Timestamp`]: FIX-formatted UTC timestamp
//! - [`CompId`]: component identifier (SenderCompID, TargetCompID)
//! - [`SessionId`]: the (BeginString, SenderCompID, TargetCompID) triple
//! - [`Direction`]: inbound/outbound marker for stored messages

use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for CompID strings in bytes.
pub const COMP_ID_MAX_LEN: usize = 32;

/// FIX message sequence number.
///
/// Sequence numbers are per-direction, start at 1, and increment for each
/// message sent or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SeqNum(u64);

impl SeqNum {
    /// Creates a new sequence number.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Checks if this sequence number is valid (>= 1).
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 1
    }
}

impl Default for SeqNum {
    fn default() -> Self {
        Self(1)
    }
}

impl From<u64> for SeqNum {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SeqNum> for u64 {
    fn from(seq: SeqNum) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a stored message relative to this engine.
///
/// Stored records are keyed by direction so that an inbound and an outbound
/// message with the same sequence number never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Message received from the counterparty.
    Inbound,
    /// Message sent by this engine.
    Outbound,
}

impl Direction {
    /// Single-character code used by persistent backends.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Inbound => 'I',
            Self::Outbound => 'O',
        }
    }

    /// Parses the single-character backend code.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(Self::Inbound),
            'O' => Some(Self::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// FIX UTC timestamp with millisecond precision.
///
/// Formatted on the wire as `YYYYMMDD-HH:MM:SS.sss` (SendingTime, tag 52).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    millis_since_epoch: i64,
}

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            millis_since_epoch: millis,
        }
    }

    /// Returns the current UTC timestamp.
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        Self {
            millis_since_epoch: Utc::now().timestamp_millis(),
        }
    }

    /// Returns milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.millis_since_epoch
    }

    /// Converts to a chrono `DateTime<Utc>`.
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch).unwrap_or_default()
    }

    /// Formats the timestamp as a FIX SendingTime value.
    ///
    /// Format: `YYYYMMDD-HH:MM:SS.sss`
    #[must_use]
    pub fn format_fix(self) -> ArrayString<21> {
        let dt = self.to_datetime();
        let mut buf = ArrayString::new();
        let _ = std::fmt::write(
            &mut buf,
            format_args!("{}", dt.format("%Y%m%d-%H:%M:%S%.3f")),
        );
        buf
    }

    /// Parses a FIX SendingTime value.
    #[must_use]
    pub fn parse_fix(s: &str) -> Option<Self> {
        let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y%m%d-%H:%M:%S%.3f").ok()?;
        Some(Self {
            millis_since_epoch: naive.and_utc().timestamp_millis(),
        })
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: dt.timestamp_millis(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_fix())
    }
}

/// Component identifier for FIX sessions.
///
/// Used for SenderCompID (tag 49) and TargetCompID (tag 56).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CompId(ArrayString<COMP_ID_MAX_LEN>);

impl CompId {
    /// Creates a new CompId.
    ///
    /// Returns `None` if the string exceeds [`COMP_ID_MAX_LEN`] bytes.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the CompId as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns true if the CompId is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for CompId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CompId {
    type Err = arrayvec::CapacityError<()>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArrayString::try_from(s)
            .map(Self)
            .map_err(|_| arrayvec::CapacityError::new(()))
    }
}

/// Identity of a logical FIX session.
///
/// The (BeginString, SenderCompID, TargetCompID) triple identifies a session
/// independently of any network connection. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    /// FIX version literal (e.g. "FIX.4.4").
    pub begin_string: String,
    /// Our CompID (tag 49 on outbound messages).
    pub sender_comp_id: CompId,
    /// The counterparty CompID (tag 56 on outbound messages).
    pub target_comp_id: CompId,
}

impl SessionId {
    /// Creates a new session identity.
    ///
    /// Returns `None` if either CompID exceeds the maximum length.
    #[must_use]
    pub fn new(begin_string: impl Into<String>, sender: &str, target: &str) -> Option<Self> {
        Some(Self {
            begin_string: begin_string.into(),
            sender_comp_id: CompId::new(sender)?,
            target_comp_id: CompId::new(target)?,
        })
    }

    /// Returns the identity of the reverse direction (peer's point of view).
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            begin_string: self.begin_string.clone(),
            sender_comp_id: self.target_comp_id.clone(),
            target_comp_id: self.sender_comp_id.clone(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.begin_string, self.sender_comp_id, self.target_comp_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_num_operations() {
        let seq = SeqNum::new(5);
        assert_eq!(seq.value(), 5);
        assert_eq!(seq.next().value(), 6);
        assert!(seq.is_valid());
        assert!(!SeqNum::new(0).is_valid());
    }

    #[test]
    fn test_seq_num_default() {
        assert_eq!(SeqNum::default().value(), 1);
    }

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::from_char('I'), Some(Direction::Inbound));
        assert_eq!(Direction::from_char('O'), Some(Direction::Outbound));
        assert_eq!(Direction::from_char('X'), None);
        assert_eq!(Direction::Outbound.as_char(), 'O');
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Timestamp::from_millis(0);
        assert_eq!(ts.format_fix().as_str(), "19700101-00:00:00.000");
    }

    #[test]
    fn test_timestamp_parse_roundtrip() {
        let ts = Timestamp::from_millis(1_700_000_123_456);
        let formatted = ts.format_fix();
        let parsed = Timestamp::parse_fix(&formatted).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_comp_id() {
        let id = CompId::new("BANZAI").unwrap();
        assert_eq!(id.as_str(), "BANZAI");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_comp_id_too_long() {
        let long = "A".repeat(COMP_ID_MAX_LEN + 1);
        assert!(CompId::new(&long).is_none());
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("FIX.4.4", "BANZAI", "EXEC").unwrap();
        assert_eq!(id.to_string(), "FIX.4.4:BANZAI->EXEC");
    }

    #[test]
    fn test_session_id_reversed() {
        let id = SessionId::new("FIX.4.4", "BANZAI", "EXEC").unwrap();
        let rev = id.reversed();
        assert_eq!(rev.sender_comp_id.as_str(), "EXEC");
        assert_eq!(rev.target_comp_id.as_str(), "BANZAI");
        assert_eq!(rev.begin_string, "FIX.4.4");
    }
}
