/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Administrative message handlers and the dispatch registry.
//!
//! One handler per administrative MsgType, registered in a
//! [`MessageProcessor`]. Unknown message types fall through to the
//! application relay. Handlers run after the engine has validated the
//! header and sequence number; they express their outcome as a
//! [`HandlerAction`], which the engine translates into continue, logout,
//! or disconnect.

use crate::session::SessionCore;
use async_trait::async_trait;
use fixline_core::error::FixError;
use fixline_core::{tags, Message, MsgType, Timestamp};
use fixline_session::{SessionEvent, SessionState};
use fixline_tagvalue::decode_with;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome a handler reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAction {
    /// Keep processing.
    Continue,
    /// Protocol violation: send Logout with the given text, then drop the
    /// connection without auto-reconnect.
    LogoutAndDisconnect {
        /// Text for tag 58 of the Logout.
        text: String,
    },
    /// Close the connection; the state machine has already been driven to
    /// its terminal state.
    Disconnect,
}

/// Per-message-type handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one validated inbound message.
    ///
    /// # Errors
    /// Returns `FixError` only for store or encode failures, which are
    /// fatal for the session.
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError>;
}

/// Registry from MsgType to handler.
///
/// Dispatch is a map lookup; anything unregistered is treated as an
/// application message.
pub struct MessageProcessor {
    handlers: HashMap<MsgType, Box<dyn MessageHandler>>,
    fallback: Box<dyn MessageHandler>,
}

impl MessageProcessor {
    /// Creates a processor with the standard administrative handlers
    /// registered.
    #[must_use]
    pub fn new() -> Self {
        let mut processor = Self {
            handlers: HashMap::new(),
            fallback: Box::new(ApplicationRelayHandler),
        };
        processor.register(MsgType::Logon, Box::new(LogonHandler));
        processor.register(MsgType::Logout, Box::new(LogoutHandler));
        processor.register(MsgType::Heartbeat, Box::new(HeartbeatHandler));
        processor.register(MsgType::TestRequest, Box::new(TestRequestHandler));
        processor.register(MsgType::ResendRequest, Box::new(ResendRequestHandler));
        processor.register(MsgType::SequenceReset, Box::new(SequenceResetHandler));
        processor.register(MsgType::Reject, Box::new(RejectHandler));
        processor
    }

    /// Registers (or replaces) the handler for a message type.
    pub fn register(&mut self, msg_type: MsgType, handler: Box<dyn MessageHandler>) {
        self.handlers.insert(msg_type, handler);
    }

    /// Dispatches a message to its handler.
    ///
    /// # Errors
    /// Propagates handler failures, which are fatal for the session.
    pub async fn dispatch(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        match self.handlers.get(message.msg_type()) {
            Some(handler) => handler.handle(core, message).await,
            None => self.fallback.handle(core, message).await,
        }
    }
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Logon (35=A).
struct LogonHandler;

#[async_trait]
impl MessageHandler for LogonHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        let reset = message.get_flag(tags::RESET_SEQ_NUM_FLAG);

        // Adopt the negotiated heartbeat interval.
        if let Some(interval) = message.get_u64(tags::HEART_BT_INT) {
            core.heartbeat.set_interval(Duration::from_secs(interval));
        }

        match core.state.state() {
            // Acceptor side: the peer's Logon request.
            SessionState::AwaitingLogon => {
                if reset {
                    info!(session = %core.session_id, "logon requests sequence reset");
                    core.store.reset(&core.session_id).await?;
                }
                core.state.on_event(SessionEvent::LogonReceived);

                let mut response = Message::new(MsgType::Logon);
                response.set_u64(tags::ENCRYPT_METHOD, 0);
                response.set_u64(
                    tags::HEART_BT_INT,
                    core.heartbeat.interval().as_secs(),
                );
                if reset {
                    response.set_flag(tags::RESET_SEQ_NUM_FLAG, true);
                    core.send_with_seq(response, 1).await?;
                } else {
                    core.send_next(response).await?;
                }

                core.heartbeat.reset();
                core.reached_active = true;
                info!(session = %core.session_id, "session active (acceptor)");
                core.application.on_logon(&core.session_id).await;
                Ok(HandlerAction::Continue)
            }
            // Initiator side: the Logon response.
            SessionState::LogonInProgress => {
                core.state.on_event(SessionEvent::LogonAccepted);
                core.heartbeat.reset();
                core.reached_active = true;
                info!(session = %core.session_id, "session active (initiator)");
                core.application.on_logon(&core.session_id).await;
                Ok(HandlerAction::Continue)
            }
            state => {
                warn!(%state, "unexpected Logon, ignoring");
                Ok(HandlerAction::Continue)
            }
        }
    }
}

/// Logout (35=5). Two-sided handshake.
struct LogoutHandler;

#[async_trait]
impl MessageHandler for LogoutHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        let text = message.get_str(tags::TEXT).unwrap_or("");
        match core.state.state() {
            SessionState::Active => {
                info!(session = %core.session_id, text, "peer initiated logout");
                core.state.on_event(SessionEvent::LogoutReceived);
                core.send_logout("Confirming logout").await?;
                core.complete_logoff(true);
                core.state.on_event(SessionEvent::LogoutConfirmed);
                Ok(HandlerAction::Disconnect)
            }
            SessionState::LogoutInProgress => {
                info!(session = %core.session_id, text, "logout confirmed by peer");
                core.complete_logoff(true);
                core.state.on_event(SessionEvent::LogoutConfirmed);
                Ok(HandlerAction::Disconnect)
            }
            state => {
                warn!(%state, "Logout received outside an active session, closing");
                core.complete_logoff(true);
                core.state.on_event(SessionEvent::NetworkError);
                Ok(HandlerAction::Disconnect)
            }
        }
    }
}

/// Heartbeat (35=0).
struct HeartbeatHandler;

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        if let Some(test_req_id) = message.get_str(tags::TEST_REQ_ID) {
            core.heartbeat.on_heartbeat_with_id(test_req_id);
        }
        Ok(HandlerAction::Continue)
    }
}

/// TestRequest (35=1): answer with a Heartbeat echoing tag 112.
struct TestRequestHandler;

#[async_trait]
impl MessageHandler for TestRequestHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        let test_req_id = message.get_str(tags::TEST_REQ_ID).map(str::to_string);
        core.send_heartbeat(test_req_id.as_deref()).await?;
        Ok(HandlerAction::Continue)
    }
}

/// ResendRequest (35=2): replay stored application messages, coalescing
/// administrative messages and holes into gap fills.
struct ResendRequestHandler;

#[async_trait]
impl MessageHandler for ResendRequestHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        let begin = message.get_u64(tags::BEGIN_SEQ_NO).unwrap_or(1);
        let mut end = message.get_u64(tags::END_SEQ_NO).unwrap_or(0);
        let latest = core
            .store
            .next_outgoing(&core.session_id)
            .await?
            .saturating_sub(1);
        if end == 0 || end > latest {
            end = latest;
        }
        info!(session = %core.session_id, begin, end, "processing resend request");
        if begin > end {
            return Ok(HandlerAction::Continue);
        }

        // A run of non-resendable sequence numbers collapses into one
        // gap fill covering the widest contiguous range.
        let mut gap_start: Option<u64> = None;
        for seq in begin..=end {
            let resendable = match core
                .store
                .get(&core.session_id, seq, fixline_core::Direction::Outbound)
                .await?
            {
                Some(record) => match decode_with(&record.raw, false) {
                    Ok(decoded) if decoded.message.msg_type().is_app() => {
                        Some(decoded.message)
                    }
                    _ => None,
                },
                None => None,
            };

            match resendable {
                Some(original) => {
                    if let Some(start) = gap_start.take() {
                        core.send_gap_fill(start, seq).await?;
                    }
                    let mut replay = original;
                    if let Some(orig_time) = replay.sending_time().map(str::to_string) {
                        replay.set_str(tags::ORIG_SENDING_TIME, &orig_time);
                    }
                    replay.set_flag(tags::POSS_DUP_FLAG, true);
                    replay.set_str(tags::SENDING_TIME, &Timestamp::now().format_fix());
                    debug!(seq, "retransmitting application message");
                    core.send_with_seq(replay, seq).await?;
                }
                None => {
                    if gap_start.is_none() {
                        gap_start = Some(seq);
                    }
                }
            }
        }
        if let Some(start) = gap_start {
            core.send_gap_fill(start, end + 1).await?;
        }
        Ok(HandlerAction::Continue)
    }
}

/// SequenceReset (35=4), both GapFill (123=Y) and admin reset forms.
struct SequenceResetHandler;

#[async_trait]
impl MessageHandler for SequenceResetHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        let Some(new_seq) = message.get_u64(tags::NEW_SEQ_NO) else {
            let expected = core.store.next_incoming(&core.session_id).await?;
            let ref_seq = message.seq_num().unwrap_or(0);
            core.send_reject(
                ref_seq,
                Some(tags::NEW_SEQ_NO),
                Some(tags::REJECT_REASON_INCORRECT_DATA_FORMAT),
                "SequenceReset without NewSeqNo",
            )
            .await?;
            if message.seq_num() == Some(expected) {
                core.store.increment_incoming(&core.session_id).await?;
            }
            return Ok(HandlerAction::Continue);
        };
        let expected = core.store.next_incoming(&core.session_id).await?;
        let gap_fill = message.get_flag(tags::GAP_FILL_FLAG);
        // The engine leaves the inbound counter to this handler; a reset
        // that does not move the counter forward must still consume its
        // own sequence number.
        let in_sequence = message.seq_num() == Some(expected);

        if new_seq < expected {
            if message.poss_dup() {
                debug!(new_seq, expected, "ignoring duplicate sequence reset");
            } else {
                warn!(new_seq, expected, "sequence reset attempted to decrease sequence number");
                let ref_seq = message.seq_num().unwrap_or(expected);
                core.send_reject(
                    ref_seq,
                    Some(tags::NEW_SEQ_NO),
                    Some(tags::REJECT_REASON_VALUE_INCORRECT),
                    "Sequence Reset attempted to decrease sequence number",
                )
                .await?;
            }
            if in_sequence {
                core.store.increment_incoming(&core.session_id).await?;
            }
            return Ok(HandlerAction::Continue);
        }

        info!(
            session = %core.session_id, new_seq, gap_fill,
            "applying sequence reset"
        );
        core.store.set_incoming(&core.session_id, new_seq).await?;
        Ok(HandlerAction::Continue)
    }
}

/// Reject (35=3): audit log only, never retransmit.
struct RejectHandler;

#[async_trait]
impl MessageHandler for RejectHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        warn!(
            session = %core.session_id,
            ref_seq = message.get_u64(tags::REF_SEQ_NUM).unwrap_or(0),
            reason = message.get_str(tags::SESSION_REJECT_REASON).unwrap_or(""),
            text = message.get_str(tags::TEXT).unwrap_or(""),
            "message rejected by peer"
        );
        Ok(HandlerAction::Continue)
    }
}

/// Fallback: every unregistered message type is an application message.
struct ApplicationRelayHandler;

#[async_trait]
impl MessageHandler for ApplicationRelayHandler {
    async fn handle(
        &self,
        core: &mut SessionCore,
        message: &Message,
    ) -> Result<HandlerAction, FixError> {
        core.application
            .on_message_from_app(message, &core.session_id)
            .await;
        Ok(HandlerAction::Continue)
    }
}
