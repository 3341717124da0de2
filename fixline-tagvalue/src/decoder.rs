/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message decoder.
//!
//! [`decode`] parses one complete framed message into a [`Message`]. The
//! framing fields (8, 9, 10) are validated and stripped; everything else,
//! including repeating-group members, lands in the ordered field list.

use crate::checksum::{checksum_of, parse_checksum};
use crate::encoder::SOH;
use fixline_core::error::DecodeError;
use fixline_core::{tags, Field, Message, MsgType};
use memchr::memchr;
use smallvec::SmallVec;

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The BeginString (tag 8) value, e.g. "FIX.4.4".
    pub begin_string: String,
    /// The message body.
    pub message: Message,
}

/// Splits the next `tag=value` pair off the front of `input`.
///
/// Returns `(tag, value, rest)` or a decode error for malformed pairs.
fn split_field(input: &[u8]) -> Result<(u32, &[u8], &[u8]), DecodeError> {
    let soh = memchr(SOH, input).ok_or(DecodeError::Incomplete)?;
    let pair = &input[..soh];
    let eq = memchr(b'=', pair).ok_or_else(|| {
        DecodeError::InvalidTag(String::from_utf8_lossy(pair).into_owned())
    })?;
    let tag_str = std::str::from_utf8(&pair[..eq])
        .map_err(|_| DecodeError::InvalidTag(String::from_utf8_lossy(&pair[..eq]).into_owned()))?;
    let tag: u32 = tag_str
        .parse()
        .map_err(|_| DecodeError::InvalidTag(tag_str.to_string()))?;
    Ok((tag, &pair[eq + 1..], &input[soh + 1..]))
}

/// Decodes a complete framed FIX message, verifying the checksum.
///
/// # Errors
/// Returns `DecodeError` if the framing fields are missing or malformed,
/// or the declared checksum does not match.
pub fn decode(input: &[u8]) -> Result<Decoded, DecodeError> {
    decode_with(input, true)
}

/// Decodes a complete framed FIX message.
///
/// # Arguments
/// * `input` - Exactly one framed message, as delivered by the transport
/// * `validate_checksum` - Whether to verify the CheckSum trailer
///
/// # Errors
/// Returns `DecodeError` on malformed framing or a checksum mismatch.
pub fn decode_with(input: &[u8], validate_checksum: bool) -> Result<Decoded, DecodeError> {
    // BeginString (tag 8).
    let (tag, begin_string, rest) = split_field(input)?;
    if tag != tags::BEGIN_STRING || !begin_string.starts_with(b"FIX") {
        return Err(DecodeError::InvalidBeginString);
    }
    let begin_string = std::str::from_utf8(begin_string)
        .map_err(|_| DecodeError::InvalidBeginString)?
        .to_string();

    // BodyLength (tag 9).
    let (tag, body_len, rest) = split_field(rest)?;
    if tag != tags::BODY_LENGTH {
        return Err(DecodeError::InvalidBodyLength);
    }
    let body_len: usize = std::str::from_utf8(body_len)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(DecodeError::InvalidBodyLength)?;
    if rest.len() < body_len {
        return Err(DecodeError::Incomplete);
    }

    // MsgType (tag 35) leads the body.
    let (tag, msg_type, mut remaining) = split_field(rest)?;
    if tag != tags::MSG_TYPE {
        return Err(DecodeError::MissingMsgType);
    }
    let msg_type: MsgType = std::str::from_utf8(msg_type)
        .map_err(|_| DecodeError::MissingMsgType)?
        .parse()
        .unwrap_or_default();

    let mut fields: SmallVec<[Field; 16]> = SmallVec::new();
    let mut declared_checksum = None;
    while !remaining.is_empty() {
        let (tag, value, rest) = split_field(remaining)?;
        remaining = rest;
        if tag == tags::CHECK_SUM {
            declared_checksum =
                Some(parse_checksum(value).ok_or(DecodeError::InvalidFieldValue {
                    tag: tags::CHECK_SUM,
                    reason: "expected three decimal digits".to_string(),
                })?);
            break;
        }
        fields.push(Field::new(tag, value.to_vec()));
    }

    if validate_checksum {
        let declared = declared_checksum.ok_or(DecodeError::Incomplete)?;
        // Everything up to and including the SOH before "10=".
        let trailer_len = 7;
        let covered = input
            .len()
            .checked_sub(trailer_len + remaining.len())
            .ok_or(DecodeError::Incomplete)?;
        let calculated = checksum_of(&input[..covered]);
        if calculated != declared {
            return Err(DecodeError::ChecksumMismatch {
                calculated,
                declared,
            });
        }
    }

    Ok(Decoded {
        begin_string,
        message: Message::from_parts(msg_type, fields),
    })
}
