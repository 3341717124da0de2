/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Application callback interface.
//!
//! The engine owns the session protocol; everything business-level flows
//! through this trait. Callbacks run on the session task, so they must not
//! block.

use async_trait::async_trait;
use fixline_core::{Message, SessionId};

/// Callback sink for session events and application messages.
#[async_trait]
pub trait Application: Send + Sync {
    /// Called once when the session is created, before any I/O.
    async fn on_create(&self, session_id: &SessionId);

    /// Called when the session reaches Active.
    async fn on_logon(&self, session_id: &SessionId);

    /// Called on every terminal transition, with a human-readable reason.
    async fn on_logout(&self, session_id: &SessionId, reason: &str);

    /// Called for every inbound application message, in gapless sequence
    /// order.
    async fn on_message_from_app(&self, message: &Message, session_id: &SessionId);

    /// Pre-send hook for outbound application messages.
    ///
    /// The application may mutate the message before the engine stamps the
    /// header and transmits it. Not invoked for administrative messages or
    /// retransmissions.
    async fn to_app(&self, message: &mut Message, session_id: &SessionId);
}

/// Application that ignores every callback.
#[derive(Debug, Default)]
pub struct NoOpApplication;

#[async_trait]
impl Application for NoOpApplication {
    async fn on_create(&self, _session_id: &SessionId) {}

    async fn on_logon(&self, _session_id: &SessionId) {}

    async fn on_logout(&self, _session_id: &SessionId, _reason: &str) {}

    async fn on_message_from_app(&self, _message: &Message, _session_id: &SessionId) {}

    async fn to_app(&self, _message: &mut Message, _session_id: &SessionId) {}
}
