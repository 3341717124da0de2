/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline Session
//!
//! Session-layer protocol mechanics for the fixline engine.
//!
//! This crate provides:
//! - **State machine**: [`StateMachine`] with the session transition table
//!   and observable state-change notifications
//! - **Heartbeat handling**: [`HeartbeatMonitor`] for heartbeat scheduling,
//!   TestRequest challenges, and dead-peer detection
//! - **Sequence validation**: [`SequenceCheck`] verdicts for inbound
//!   sequence numbers
//! - **Configuration**: [`SessionConfig`] covering the full option set the
//!   engine recognizes

pub mod config;
pub mod heartbeat;
pub mod sequence;
pub mod state;

pub use config::{ConnectionType, SessionConfig, SessionConfigBuilder, StoreKind};
pub use heartbeat::{generate_test_req_id, HeartbeatMonitor};
pub use sequence::SequenceCheck;
pub use state::{SessionEvent, SessionRole, SessionState, StateMachine};
