/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message framing.
//!
//! [`FrameCodec`] recognizes `8=FIX…|9=<len>|` at the head of the buffer
//! and consumes `len` body bytes plus the 7-byte checksum trailer,
//! delivering exactly one complete message per inbound event. Partial
//! reads stay buffered; over-reads split across events.
//!
//! Recovery rules for a dirty stream:
//! - bytes ahead of the next `8=FIX` are discarded with a warning
//! - a malformed BodyLength drops one byte and rescans from the next
//!   `8=FIX` candidate
//! - an unframeable buffer beyond the size limit is an error, which tears
//!   the connection down
//!
//! Checksum and field validation belong to the tag=value decoder; a bad
//! checksum is a message-level problem (Reject), not a connection-level
//! one.

use bytes::{BufMut, Bytes, BytesMut};
use fixline_core::error::TransportError;
use memchr::memchr;
use memchr::memmem;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// SOH delimiter.
const SOH: u8 = 0x01;

/// Length of the `10=NNN|` trailer.
const TRAILER_LEN: usize = 7;

/// Longest tail kept while hunting for a message head, so a split
/// `8=FIX…` prefix is never thrown away.
const HEAD_KEEP: usize = 8;

/// Framing codec for FIX byte streams.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum accepted message size in bytes.
    max_message_size: usize,
}

impl FrameCodec {
    /// Creates a codec with the default 1 MiB size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: 1024 * 1024,
        }
    }

    /// Sets the maximum accepted message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Discards leading bytes that cannot start a message.
    ///
    /// Returns true when the buffer now starts with `8=FIX`, false when
    /// more data is needed.
    fn resync(src: &mut BytesMut) -> bool {
        match memmem::find(src, b"8=FIX") {
            Some(0) => true,
            Some(index) => {
                warn!(discarded = index, "discarding garbage ahead of message head");
                let _ = src.split_to(index);
                true
            }
            None => {
                if src.len() > HEAD_KEEP {
                    let keep = src.len() - HEAD_KEEP;
                    warn!(discarded = keep, "no message head in buffer, trimming");
                    let _ = src.split_to(keep);
                }
                false
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if !Self::resync(src) {
                return Ok(None);
            }

            // BeginString field: 8=FIX…|
            let Some(begin_soh) = memchr(SOH, src) else {
                return Ok(None);
            };

            // BodyLength field: 9=<len>|
            let len_field_start = begin_soh + 1;
            if src.len() < len_field_start + 2 {
                return Ok(None);
            }
            if &src[len_field_start..len_field_start + 2] != b"9=" {
                warn!("missing BodyLength after BeginString, resynchronizing");
                let _ = src.split_to(1);
                continue;
            }
            let Some(len_soh) = memchr(SOH, &src[len_field_start..]) else {
                return Ok(None);
            };
            let len_soh = len_field_start + len_soh;
            let len_digits = &src[len_field_start + 2..len_soh];
            let Some(body_length) = parse_decimal(len_digits) else {
                warn!("unparseable BodyLength, resynchronizing");
                let _ = src.split_to(1);
                continue;
            };

            let total = len_soh + 1 + body_length + TRAILER_LEN;
            if total > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    size: total,
                    max_size: self.max_message_size,
                });
            }
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            // The trailer must be a checksum field ending in SOH.
            let trailer = &src[total - TRAILER_LEN..total];
            if !trailer.starts_with(b"10=") || trailer[TRAILER_LEN - 1] != SOH {
                warn!("frame does not end in a checksum trailer, resynchronizing");
                let _ = src.split_to(1);
                continue;
            }

            return Ok(Some(src.split_to(total).freeze()));
        }
    }
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || digits.len() > 7 {
        return None;
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + usize::from(b - b'0');
    }
    Some(value)
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        let body = body.replace('|', "\x01");
        let head = format!("8=FIX.4.4\x019={}\x01", body.len());
        let mut wire = head.into_bytes();
        wire.extend_from_slice(body.as_bytes());
        let checksum: u8 = wire.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        wire.extend_from_slice(format!("10={checksum:03}\x01").as_bytes());
        wire
    }

    #[test]
    fn test_decode_single_message() {
        let mut codec = FrameCodec::new();
        let wire = frame("35=0|34=1|");
        let mut buf = BytesMut::from(&wire[..]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &wire[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = FrameCodec::new();
        let wire = frame("35=0|34=1|");
        let mut buf = BytesMut::from(&wire[..wire.len() - 5]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[wire.len() - 5..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_messages_in_one_read() {
        let mut codec = FrameCodec::new();
        let first = frame("35=0|34=1|");
        let second = frame("35=1|34=2|112=T1|");
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &first[..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &second[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_discards_leading_garbage() {
        let mut codec = FrameCodec::new();
        let wire = frame("35=0|34=1|");
        let mut buf = BytesMut::from(&b"GARBAGE"[..]);
        buf.extend_from_slice(&wire);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &wire[..]);
    }

    #[test]
    fn test_decode_resyncs_past_bad_body_length() {
        let mut codec = FrameCodec::new();
        let good = frame("35=0|34=1|");
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x019=xx\x01"[..]);
        buf.extend_from_slice(&good);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &good[..]);
    }

    #[test]
    fn test_decode_rejects_oversize() {
        let mut codec = FrameCodec::new().with_max_message_size(64);
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x019=99999\x01"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_keeps_split_head() {
        let mut codec = FrameCodec::new();
        // A head split across reads must not be trimmed away.
        let mut buf = BytesMut::from(&b"NOISE-NOISE-8=FI"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let wire = frame("35=0|34=1|");
        buf.extend_from_slice(&wire[4..]); // complete "8=FI" + "X.4.4|…"
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &wire[..]);
    }

    #[test]
    fn test_encode_passthrough() {
        let mut codec = FrameCodec::new();
        let wire = Bytes::from(frame("35=0|34=1|"));
        let mut dst = BytesMut::new();
        codec.encode(wire.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &wire[..]);
    }
}
