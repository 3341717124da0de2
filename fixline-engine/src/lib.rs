/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline Engine
//!
//! Top-level session coordinator for the fixline FIX engine.
//!
//! This crate provides:
//! - **Application trait**: callback interface the engine invokes
//! - **Handlers**: per-message-type logic for the administrative messages,
//!   dispatched through a [`MessageProcessor`] registry
//! - **SessionEngine**: owns the store, state machine, heartbeat monitor,
//!   and transport; drives the session lifecycle
//! - **SessionHandle**: the application's way into a running session
//! - **Builder API**: fluent engine construction

pub mod application;
pub mod builder;
pub mod handlers;
pub mod session;

pub use application::{Application, NoOpApplication};
pub use builder::EngineBuilder;
pub use handlers::{HandlerAction, MessageHandler, MessageProcessor};
pub use session::{SessionEngine, SessionHandle};
