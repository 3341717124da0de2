/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message encoder.
//!
//! [`encode`] turns a [`Message`] into a complete wire message: BeginString
//! and BodyLength are prepended, the checksum trailer is appended, and the
//! standard header fields (34, 43, 49, 56, 52, 122) are emitted in canonical
//! order ahead of the remaining body fields.

use crate::checksum::{checksum_of, format_checksum};
use bytes::{BufMut, BytesMut};
use fixline_core::error::EncodeError;
use fixline_core::{tags, Message};

/// SOH (Start of Header) delimiter used in FIX messages.
pub const SOH: u8 = 0x01;

/// Header tags emitted in canonical order directly after MsgType.
const HEADER_TAGS: [u32; 6] = [
    tags::MSG_SEQ_NUM,
    tags::POSS_DUP_FLAG,
    tags::SENDER_COMP_ID,
    tags::TARGET_COMP_ID,
    tags::SENDING_TIME,
    tags::ORIG_SENDING_TIME,
];

/// Low-level field writer used by [`encode`].
///
/// Accumulates the body (everything between BodyLength and CheckSum), then
/// [`finish`](Encoder::finish) wraps it with the framing fields.
#[derive(Debug)]
pub struct Encoder {
    body: BytesMut,
    begin_string: String,
}

impl Encoder {
    /// Creates a new encoder for the given BeginString.
    #[must_use]
    pub fn new(begin_string: impl Into<String>) -> Self {
        Self {
            body: BytesMut::with_capacity(256),
            begin_string: begin_string.into(),
        }
    }

    /// Appends a field with raw bytes.
    ///
    /// # Errors
    /// Returns `EncodeError::InvalidFieldValue` if the value contains SOH.
    pub fn put_raw(&mut self, tag: u32, value: &[u8]) -> Result<(), EncodeError> {
        if value.contains(&SOH) {
            return Err(EncodeError::InvalidFieldValue {
                tag,
                reason: "value contains SOH delimiter".to_string(),
            });
        }
        let mut tag_buf = itoa::Buffer::new();
        self.body.put_slice(tag_buf.format(tag).as_bytes());
        self.body.put_u8(b'=');
        self.body.put_slice(value);
        self.body.put_u8(SOH);
        Ok(())
    }

    /// Appends a field with a string value.
    ///
    /// # Errors
    /// Returns `EncodeError::InvalidFieldValue` if the value contains SOH.
    #[inline]
    pub fn put_str(&mut self, tag: u32, value: &str) -> Result<(), EncodeError> {
        self.put_raw(tag, value.as_bytes())
    }

    /// Appends a field with an unsigned integer value.
    #[inline]
    pub fn put_uint(&mut self, tag: u32, value: u64) -> Result<(), EncodeError> {
        let mut buf = itoa::Buffer::new();
        self.put_raw(tag, buf.format(value).as_bytes())
    }

    /// Returns the current body length in bytes.
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Finalizes the message: prepends `8=…|9=…|`, appends `10=NNN|`.
    #[must_use]
    pub fn finish(self) -> BytesMut {
        let mut message =
            BytesMut::with_capacity(self.begin_string.len() + self.body.len() + 32);

        message.put_slice(b"8=");
        message.put_slice(self.begin_string.as_bytes());
        message.put_u8(SOH);
        message.put_slice(b"9=");
        let mut len_buf = itoa::Buffer::new();
        message.put_slice(len_buf.format(self.body.len()).as_bytes());
        message.put_u8(SOH);
        message.put_slice(&self.body);

        let checksum = checksum_of(&message);
        message.put_slice(b"10=");
        message.put_slice(&format_checksum(checksum));
        message.put_u8(SOH);

        message
    }
}

/// Encodes a message into a complete framed wire message.
///
/// Emission order: `35`, then the canonical header tags present on the
/// message, then every remaining field in insertion order.
///
/// # Errors
/// Returns `EncodeError` if any field value contains the SOH delimiter.
pub fn encode(begin_string: &str, message: &Message) -> Result<BytesMut, EncodeError> {
    let mut encoder = Encoder::new(begin_string);
    encoder.put_str(tags::MSG_TYPE, message.msg_type().as_str())?;

    for &tag in &HEADER_TAGS {
        if let Some(value) = message.get(tag) {
            encoder.put_raw(tag, value)?;
        }
    }
    for field in message.fields() {
        if HEADER_TAGS.contains(&field.tag) {
            continue;
        }
        encoder.put_raw(field.tag, &field.value)?;
    }

    Ok(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixline_core::MsgType;

    fn soh_to_pipe(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).replace('\x01', "|")
    }

    #[test]
    fn test_encode_heartbeat() {
        let mut msg = Message::new(MsgType::Heartbeat);
        msg.set_u64(tags::MSG_SEQ_NUM, 2);
        msg.set_str(tags::SENDER_COMP_ID, "BANZAI");
        msg.set_str(tags::TARGET_COMP_ID, "EXEC");

        let wire = encode("FIX.4.4", &msg).unwrap();
        let text = soh_to_pipe(&wire);

        assert!(text.starts_with("8=FIX.4.4|9="));
        assert!(text.contains("|35=0|34=2|49=BANZAI|56=EXEC|"));
        assert!(text.ends_with('|'));
    }

    #[test]
    fn test_encode_header_order() {
        // Fields inserted out of canonical order still encode canonically.
        let mut msg = Message::new(MsgType::Logon);
        msg.set_u64(tags::HEART_BT_INT, 30);
        msg.set_str(tags::TARGET_COMP_ID, "EXEC");
        msg.set_u64(tags::MSG_SEQ_NUM, 1);
        msg.set_str(tags::SENDER_COMP_ID, "BANZAI");
        msg.set_u64(tags::ENCRYPT_METHOD, 0);
        msg.set_flag(tags::RESET_SEQ_NUM_FLAG, true);

        let wire = encode("FIX.4.4", &msg).unwrap();
        let text = soh_to_pipe(&wire);

        let body = &text[text.find("35=").unwrap()..];
        assert!(body.starts_with("35=A|34=1|49=BANZAI|56=EXEC|"));
        // Non-header fields keep insertion order: 108 before 98 here.
        assert!(body.contains("108=30|98=0|141=Y|"));
    }

    #[test]
    fn test_encode_body_length_counts_body_only() {
        let mut msg = Message::new(MsgType::Heartbeat);
        msg.set_u64(tags::MSG_SEQ_NUM, 1);

        let wire = encode("FIX.4.4", &msg).unwrap();
        let text = String::from_utf8_lossy(&wire).to_string();

        let after_nine = text.find("9=").unwrap() + 2;
        let soh_after = text[after_nine..].find('\x01').unwrap() + after_nine;
        let declared: usize = text[after_nine..soh_after].parse().unwrap();

        let body_start = soh_after + 1;
        let trailer_start = text.rfind("10=").unwrap();
        assert_eq!(declared, trailer_start - body_start);
    }

    #[test]
    fn test_encode_checksum_is_valid() {
        let mut msg = Message::new(MsgType::TestRequest);
        msg.set_u64(tags::MSG_SEQ_NUM, 5);
        msg.set_str(tags::TEST_REQ_ID, "TEST1");

        let wire = encode("FIX.4.4", &msg).unwrap();
        let trailer_start = wire.len() - 7;
        let declared = crate::checksum::parse_checksum(&wire[trailer_start + 3..trailer_start + 6])
            .unwrap();
        assert_eq!(checksum_of(&wire[..trailer_start]), declared);
    }

    #[test]
    fn test_encode_rejects_embedded_soh() {
        let mut msg = Message::new(MsgType::News);
        msg.set_u64(tags::MSG_SEQ_NUM, 1);
        msg.set_raw(tags::TEXT, b"bad\x01value".to_vec());

        let err = encode("FIX.4.4", &msg).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFieldValue { tag: 58, .. }));
    }
}
