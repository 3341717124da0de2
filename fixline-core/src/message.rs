/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message representation.
//!
//! This module provides:
//! - [`MsgType`]: message type enumeration (tag 35)
//! - [`Field`]: a single tag=value pair
//! - [`Message`]: an insertion-ordered field map, the unit the session
//!   engine validates, stamps, persists, and dispatches
//!
//! A [`Message`] holds body fields only; BeginString (8), BodyLength (9)
//! and CheckSum (10) belong to the wire framing and are produced and
//! consumed by the codec.

use crate::tags;
use smallvec::SmallVec;
use std::fmt;

/// FIX message type (tag 35).
///
/// Administrative types are modeled explicitly; application types the
/// session layer routinely sees get variants of their own, everything else
/// is `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MsgType {
    /// Heartbeat (0).
    #[default]
    Heartbeat,
    /// Test Request (1).
    TestRequest,
    /// Resend Request (2).
    ResendRequest,
    /// Reject (3).
    Reject,
    /// Sequence Reset (4).
    SequenceReset,
    /// Logout (5).
    Logout,
    /// Logon (A).
    Logon,
    /// Execution Report (8).
    ExecutionReport,
    /// Order Cancel Reject (9).
    OrderCancelReject,
    /// News (B).
    News,
    /// New Order Single (D).
    NewOrderSingle,
    /// Order Cancel Request (F).
    OrderCancelRequest,
    /// Order Cancel/Replace Request (G).
    OrderCancelReplaceRequest,
    /// Business Message Reject (j).
    BusinessMessageReject,
    /// Any other message type.
    Custom(String),
}

impl std::str::FromStr for MsgType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "0" => Self::Heartbeat,
            "1" => Self::TestRequest,
            "2" => Self::ResendRequest,
            "3" => Self::Reject,
            "4" => Self::SequenceReset,
            "5" => Self::Logout,
            "A" => Self::Logon,
            "8" => Self::ExecutionReport,
            "9" => Self::OrderCancelReject,
            "B" => Self::News,
            "D" => Self::NewOrderSingle,
            "F" => Self::OrderCancelRequest,
            "G" => Self::OrderCancelReplaceRequest,
            "j" => Self::BusinessMessageReject,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl MsgType {
    /// Returns the wire representation of this message type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "0",
            Self::TestRequest => "1",
            Self::ResendRequest => "2",
            Self::Reject => "3",
            Self::SequenceReset => "4",
            Self::Logout => "5",
            Self::Logon => "A",
            Self::ExecutionReport => "8",
            Self::OrderCancelReject => "9",
            Self::News => "B",
            Self::NewOrderSingle => "D",
            Self::OrderCancelRequest => "F",
            Self::OrderCancelReplaceRequest => "G",
            Self::BusinessMessageReject => "j",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns true if this is a session-level administrative message.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::TestRequest
                | Self::ResendRequest
                | Self::Reject
                | Self::SequenceReset
                | Self::Logout
                | Self::Logon
        )
    }

    /// Returns true if this is an application-level message.
    #[must_use]
    pub fn is_app(&self) -> bool {
        !self.is_admin()
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single tag=value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The field tag number.
    pub tag: u32,
    /// The field value bytes, without delimiters.
    pub value: Vec<u8>,
}

impl Field {
    /// Creates a new field.
    #[inline]
    #[must_use]
    pub fn new(tag: u32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Returns the value as a string slice, if valid UTF-8.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// An ordered FIX message body.
///
/// Fields preserve insertion order, which the codec relies on when encoding
/// repeating groups (a count tag followed by its member fields). Setting an
/// existing tag replaces the value in place; setting a new tag appends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    msg_type: MsgType,
    fields: SmallVec<[Field; 16]>,
}

impl Message {
    /// Creates a new message of the given type with no body fields.
    #[must_use]
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            fields: SmallVec::new(),
        }
    }

    /// Creates a message from a parsed field list.
    ///
    /// Used by the codec; the field list must not contain tags 8, 9, 10
    /// or 35.
    #[must_use]
    pub fn from_parts(msg_type: MsgType, fields: SmallVec<[Field; 16]>) -> Self {
        Self { msg_type, fields }
    }

    /// Returns the message type.
    #[inline]
    #[must_use]
    pub fn msg_type(&self) -> &MsgType {
        &self.msg_type
    }

    /// Returns an iterator over the body fields in insertion order.
    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Returns the number of body fields.
    #[inline]
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Gets the first value for a tag.
    #[must_use]
    pub fn get(&self, tag: u32) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value.as_slice())
    }

    /// Gets the first value for a tag as a string slice.
    #[must_use]
    pub fn get_str(&self, tag: u32) -> Option<&str> {
        self.get(tag).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Gets the first value for a tag parsed as an unsigned integer.
    #[must_use]
    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        self.get_str(tag).and_then(|s| s.parse().ok())
    }

    /// Returns true if the tag is present with the value `Y`.
    #[must_use]
    pub fn get_flag(&self, tag: u32) -> bool {
        self.get(tag) == Some(b"Y")
    }

    /// Returns true if the tag is present.
    #[must_use]
    pub fn contains(&self, tag: u32) -> bool {
        self.fields.iter().any(|f| f.tag == tag)
    }

    /// Sets a raw field value, replacing in place or appending.
    pub fn set_raw(&mut self, tag: u32, value: impl Into<Vec<u8>>) {
        let value = value.into();
        if let Some(field) = self.fields.iter_mut().find(|f| f.tag == tag) {
            field.value = value;
        } else {
            self.fields.push(Field { tag, value });
        }
    }

    /// Sets a string field value.
    pub fn set_str(&mut self, tag: u32, value: &str) {
        self.set_raw(tag, value.as_bytes().to_vec());
    }

    /// Sets an unsigned integer field value.
    pub fn set_u64(&mut self, tag: u32, value: u64) {
        self.set_raw(tag, value.to_string().into_bytes());
    }

    /// Sets a boolean field value (`Y`/`N`).
    pub fn set_flag(&mut self, tag: u32, value: bool) {
        self.set_raw(tag, if value { b"Y".to_vec() } else { b"N".to_vec() });
    }

    /// Removes all occurrences of a tag. Returns true if any were removed.
    pub fn remove(&mut self, tag: u32) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.tag != tag);
        self.fields.len() != before
    }

    /// The MsgSeqNum (tag 34), if present and numeric.
    #[inline]
    #[must_use]
    pub fn seq_num(&self) -> Option<u64> {
        self.get_u64(tags::MSG_SEQ_NUM)
    }

    /// True if PossDupFlag (tag 43) is `Y`.
    #[inline]
    #[must_use]
    pub fn poss_dup(&self) -> bool {
        self.get_flag(tags::POSS_DUP_FLAG)
    }

    /// The SenderCompID (tag 49), if present.
    #[inline]
    #[must_use]
    pub fn sender_comp_id(&self) -> Option<&str> {
        self.get_str(tags::SENDER_COMP_ID)
    }

    /// The TargetCompID (tag 56), if present.
    #[inline]
    #[must_use]
    pub fn target_comp_id(&self) -> Option<&str> {
        self.get_str(tags::TARGET_COMP_ID)
    }

    /// The SendingTime (tag 52), if present.
    #[inline]
    #[must_use]
    pub fn sending_time(&self) -> Option<&str> {
        self.get_str(tags::SENDING_TIME)
    }
}

impl fmt::Display for Message {
    /// Renders the message as `35=X|34=1|...` with `|` for SOH, for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "35={}", self.msg_type)?;
        for field in &self.fields {
            write!(
                f,
                "|{}={}",
                field.tag,
                field.as_str().unwrap_or("<binary>")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_from_str() {
        assert_eq!("0".parse::<MsgType>().unwrap(), MsgType::Heartbeat);
        assert_eq!("A".parse::<MsgType>().unwrap(), MsgType::Logon);
        assert_eq!("D".parse::<MsgType>().unwrap(), MsgType::NewOrderSingle);
        assert!(matches!(
            "AB".parse::<MsgType>().unwrap(),
            MsgType::Custom(_)
        ));
    }

    #[test]
    fn test_msg_type_is_admin() {
        assert!(MsgType::Heartbeat.is_admin());
        assert!(MsgType::Logon.is_admin());
        assert!(MsgType::SequenceReset.is_admin());
        assert!(!MsgType::NewOrderSingle.is_admin());
        assert!(!MsgType::Custom("AB".into()).is_admin());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut msg = Message::new(MsgType::Logon);
        msg.set_u64(tags::HEART_BT_INT, 30);
        msg.set_flag(tags::RESET_SEQ_NUM_FLAG, true);
        msg.set_u64(tags::HEART_BT_INT, 60);

        assert_eq!(msg.get_u64(tags::HEART_BT_INT), Some(60));
        // Position preserved: 108 still before 141.
        let tags_in_order: Vec<u32> = msg.fields().map(|f| f.tag).collect();
        assert_eq!(tags_in_order, vec![tags::HEART_BT_INT, tags::RESET_SEQ_NUM_FLAG]);
    }

    #[test]
    fn test_flags_and_removal() {
        let mut msg = Message::new(MsgType::SequenceReset);
        msg.set_flag(tags::GAP_FILL_FLAG, true);
        assert!(msg.get_flag(tags::GAP_FILL_FLAG));

        msg.set_flag(tags::GAP_FILL_FLAG, false);
        assert!(!msg.get_flag(tags::GAP_FILL_FLAG));
        assert!(msg.contains(tags::GAP_FILL_FLAG));

        assert!(msg.remove(tags::GAP_FILL_FLAG));
        assert!(!msg.contains(tags::GAP_FILL_FLAG));
        assert!(!msg.remove(tags::GAP_FILL_FLAG));
    }

    #[test]
    fn test_header_helpers() {
        let mut msg = Message::new(MsgType::Heartbeat);
        msg.set_u64(tags::MSG_SEQ_NUM, 7);
        msg.set_str(tags::SENDER_COMP_ID, "BANZAI");
        msg.set_str(tags::TARGET_COMP_ID, "EXEC");
        msg.set_flag(tags::POSS_DUP_FLAG, true);

        assert_eq!(msg.seq_num(), Some(7));
        assert_eq!(msg.sender_comp_id(), Some("BANZAI"));
        assert_eq!(msg.target_comp_id(), Some("EXEC"));
        assert!(msg.poss_dup());
    }

    #[test]
    fn test_display() {
        let mut msg = Message::new(MsgType::TestRequest);
        msg.set_str(tags::TEST_REQ_ID, "TEST1");
        assert_eq!(msg.to_string(), "35=1|112=TEST1");
    }
}
