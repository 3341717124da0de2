/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline Tagvalue
//!
//! Tag=value wire codec for the fixline FIX session engine.
//!
//! This crate provides the pure `bytes ↔ Message` boundary the session
//! layer consumes:
//! - **Checksum**: sum-mod-256 calculation, formatting, and parsing
//! - **Encoder**: [`encode`] a [`fixline_core::Message`] into a complete
//!   framed message (8/9/10 fields included)
//! - **Decoder**: [`decode`] a complete framed message back into a
//!   [`fixline_core::Message`]

pub mod checksum;
pub mod decoder;
pub mod encoder;

pub use checksum::{checksum_of, format_checksum, parse_checksum};
pub use decoder::{decode, decode_with, Decoded};
pub use encoder::{encode, Encoder, SOH};
