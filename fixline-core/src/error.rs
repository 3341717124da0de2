/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Error types for the fixline FIX session engine.
//!
//! One `thiserror` enum per layer, folded into the top-level [`FixError`].
//! Handlers and the engine communicate outcomes through typed results; an
//! error aborts the session, never the process.

use thiserror::Error;

/// Result type alias using [`FixError`] as the error type.
pub type Result<T> = std::result::Result<T, FixError>;

/// Top-level error type for all fixline operations.
#[derive(Debug, Error)]
pub enum FixError {
    /// Error during message decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during message encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error in message store operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error in the network transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error from the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while decoding a framed FIX message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Message buffer is incomplete, need more data.
    #[error("incomplete message, need more data")]
    Incomplete,

    /// Message does not start with a valid BeginString field.
    #[error("invalid begin string: expected 8=FIX.x.y")]
    InvalidBeginString,

    /// Missing or malformed BodyLength field (tag 9).
    #[error("invalid body length field (tag 9)")]
    InvalidBodyLength,

    /// Missing MsgType field (tag 35).
    #[error("missing msg type field (tag 35)")]
    MissingMsgType,

    /// Checksum mismatch between calculated and declared values.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum value.
        calculated: u8,
        /// Declared checksum value in the message.
        declared: u8,
    },

    /// A tag was not a valid positive integer.
    #[error("invalid tag format: {0}")]
    InvalidTag(String),

    /// A required header field was absent.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// A field value could not be interpreted.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Errors that occur while encoding a FIX message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A required header field was absent at encode time.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// A field value cannot be represented on the wire.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Errors in FIX session layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is not in the correct state for the operation.
    #[error("invalid session state: expected {expected}, current {current}")]
    InvalidState {
        /// Expected state for the operation.
        expected: String,
        /// Current session state.
        current: String,
    },

    /// Logon was rejected by the counterparty or timed out.
    #[error("logon failed: {reason}")]
    LogonFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// No response to an outstanding TestRequest.
    #[error("heartbeat timeout after {elapsed_ms} milliseconds")]
    HeartbeatTimeout {
        /// Milliseconds since the last message was received.
        elapsed_ms: u64,
    },

    /// Sequence number lower than expected without PossDupFlag.
    #[error("sequence too low: expected {expected}, received {received}")]
    SequenceTooLow {
        /// Expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },

    /// CompID on an inbound message does not match the session identity.
    #[error("comp id mismatch on tag {tag}: expected {expected}, received {received}")]
    CompIdMismatch {
        /// The offending header tag (49 or 56).
        tag: u32,
        /// Expected CompID.
        expected: String,
        /// Received CompID.
        received: String,
    },

    /// BeginString on an inbound message does not match the session.
    #[error("begin string mismatch: expected {expected}, received {received}")]
    BeginStringMismatch {
        /// Expected BeginString.
        expected: String,
        /// Received BeginString.
        received: String,
    },

    /// A required header field is missing or malformed.
    #[error("malformed header: {reason}")]
    MalformedHeader {
        /// Description of the problem.
        reason: String,
    },

    /// The logoff handshake did not complete within the timeout.
    #[error("logout timed out after {timeout_ms} milliseconds")]
    LogoutTimeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Session configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Errors in message store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to persist a message.
    #[error("failed to store message seq={seq_num}: {reason}")]
    StoreFailed {
        /// Sequence number of the message.
        seq_num: u64,
        /// Reason for the failure.
        reason: String,
    },

    /// Failed to read from the backing store.
    #[error("failed to retrieve: {reason}")]
    RetrieveFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// The backing store is corrupted.
    #[error("store corrupted: {reason}")]
    Corrupted {
        /// Description of the corruption.
        reason: String,
    },

    /// A sequence counter update was invalid.
    #[error("invalid sequence number {value}: must be >= 1")]
    InvalidSequence {
        /// The rejected value.
        value: u64,
    },

    /// I/O error in the persistent backend.
    #[error("store i/o error: {0}")]
    Io(String),
}

/// Errors in the network transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection was closed by the peer.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A framing error made the inbound stream unrecoverable.
    #[error("framing error: {0}")]
    Framing(String),

    /// Message exceeds the configured maximum size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },

    /// I/O error on the socket.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
