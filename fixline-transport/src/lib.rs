/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline Transport
//!
//! Network transport for the fixline FIX session engine.
//!
//! This crate provides:
//! - **Framing codec**: [`FrameCodec`] delivering exactly one FIX message
//!   per inbound event, with resynchronization past garbage bytes
//! - **TCP endpoints**: [`Connector`] (initiator) and [`Listener`]
//!   (acceptor)
//! - **Retry policy**: [`Backoff`] — capped exponential with ±20% jitter
//!
//! The session engine is generic over `AsyncRead + AsyncWrite`, so a TLS
//! stream built by an external SSL layer plugs in the same way a plain
//! `TcpStream` does.

pub mod codec;
pub mod tcp;

pub use codec::FrameCodec;
pub use tcp::{Backoff, Connector, Listener};
