/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session engine: the top-level coordinator.
//!
//! One [`SessionEngine`] drives one logical FIX session on a single task.
//! The engine owns the store handle, state machine, heartbeat monitor, and
//! the framed connection; the application reaches a running session
//! through a [`SessionHandle`], whose commands are serviced between
//! inbound frames. This keeps the whole session free of intra-session
//! races: the only suspension points are transport I/O, store I/O, timer
//! ticks, and the logoff waiter.
//!
//! Inbound pipeline, per message: decode, validate identity, check the
//! sequence number, persist, dispatch, advance the inbound counter.
//! Outbound pipeline: stamp header, assign the sequence number, encode,
//! persist, then write — a message that reached the peer but missed the
//! store would break resend, so persistence always comes first.

use crate::application::Application;
use crate::handlers::{HandlerAction, MessageProcessor};
use bytes::Bytes;
use fixline_core::error::{FixError, SessionError};
use fixline_core::{tags, Direction, Message, MsgType, SessionId, Timestamp};
use fixline_session::{
    generate_test_req_id, ConnectionType, HeartbeatMonitor, SequenceCheck, SessionConfig,
    SessionEvent, SessionState, StateMachine,
};
use fixline_store::{open_store, MessageStore};
use fixline_tagvalue::{decode_with, encode};
use fixline_transport::{Backoff, Connector, FrameCodec, Listener};
use futures::{SinkExt, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Byte stream the engine can drive: a plain `TcpStream`, a TLS stream
/// built by an external SSL layer, or an in-memory duplex in tests.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

type Connection = Framed<Box<dyn StreamIo>, FrameCodec>;

/// Commands a [`SessionHandle`] issues to the session task.
enum Command {
    Send(Message, oneshot::Sender<Result<(), FixError>>),
    RequestLogoff {
        timeout: Duration,
        done: oneshot::Sender<bool>,
    },
    Disconnect {
        graceful: bool,
    },
}

/// Cloneable handle into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// The session this handle belongs to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Sends an application message.
    ///
    /// The engine assigns the sequence number, stamps the session header
    /// fields, persists, and transmits.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` when the session is not Active
    /// or has terminated.
    pub async fn send(&self, message: Message) -> Result<(), FixError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Send(message, tx))
            .await
            .map_err(|_| Self::terminated())?;
        rx.await.map_err(|_| Self::terminated())?
    }

    /// Sends a Logout and waits up to `timeout` for the confirmation.
    ///
    /// Returns `true` if the peer confirmed, `false` if the wait timed
    /// out; the session disconnects either way.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if the session has terminated.
    pub async fn request_logoff(&self, timeout: Duration) -> Result<bool, FixError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::RequestLogoff { timeout, done })
            .await
            .map_err(|_| Self::terminated())?;
        rx.await.map_err(|_| Self::terminated())
    }

    /// Closes the session. With `graceful`, a Logout is sent first.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if the session has terminated.
    pub async fn disconnect(&self, graceful: bool) -> Result<(), FixError> {
        self.tx
            .send(Command::Disconnect { graceful })
            .await
            .map_err(|_| Self::terminated())
    }

    fn terminated() -> FixError {
        SessionError::InvalidState {
            expected: "running session".to_string(),
            current: "terminated".to_string(),
        }
        .into()
    }
}

/// Mutable session state shared with the message handlers.
pub struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) session_id: SessionId,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) state: StateMachine,
    pub(crate) heartbeat: HeartbeatMonitor,
    pub(crate) application: Arc<dyn Application>,
    /// Encoded messages persisted and awaiting transmission.
    outbox: VecDeque<Bytes>,
    /// Out-of-order inbound messages held until the gap closes.
    pending_gap: BTreeMap<u64, Message>,
    /// Expected sequence number a ResendRequest is outstanding for.
    resend_outstanding: Option<u64>,
    /// Logoff waiter: deadline plus the caller's completion channel.
    pending_logoff: Option<(Instant, oneshot::Sender<bool>)>,
    /// Set by a protocol violation; suppresses reconnection.
    pub(crate) fatal: bool,
    /// Set by an operator logoff or disconnect; ends the engine run.
    pub(crate) shutdown: bool,
    /// Whether this connection cycle reached Active.
    pub(crate) reached_active: bool,
    logout_sent: bool,
    close_reason: Option<String>,
}

impl SessionCore {
    fn new(
        config: SessionConfig,
        application: Arc<dyn Application>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let session_id = config.session_id();
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval);
        Self {
            config,
            session_id,
            store,
            state: StateMachine::new(),
            heartbeat,
            application,
            outbox: VecDeque::new(),
            pending_gap: BTreeMap::new(),
            resend_outstanding: None,
            pending_logoff: None,
            fatal: false,
            shutdown: false,
            reached_active: false,
            logout_sent: false,
            close_reason: None,
        }
    }

    /// Assigns the next outbound sequence number and transmits.
    pub(crate) async fn send_next(&mut self, message: Message) -> Result<u64, FixError> {
        let seq = self.store.next_outgoing(&self.session_id).await?;
        self.send_with_seq(message, seq).await
    }

    /// Public send path: application traffic, gated on Active.
    pub(crate) async fn send_app(&mut self, mut message: Message) -> Result<u64, FixError> {
        if !self.state.state().allows_app_traffic() {
            return Err(SessionError::InvalidState {
                expected: SessionState::Active.to_string(),
                current: self.state.state().to_string(),
            }
            .into());
        }
        if message.msg_type().is_app() {
            self.application
                .to_app(&mut message, &self.session_id)
                .await;
        }
        self.send_next(message).await
    }

    /// Stamps, encodes, persists, and queues a message for transmission.
    ///
    /// Persistence always precedes the write. Transmission is gated by
    /// session state; Logon and Logout are exempt because they drive the
    /// logon/logout transitions themselves.
    pub(crate) async fn send_with_seq(
        &mut self,
        mut message: Message,
        seq: u64,
    ) -> Result<u64, FixError> {
        let state = self.state.state();
        let drives_transition = matches!(message.msg_type(), MsgType::Logon | MsgType::Logout);
        if state == SessionState::Disconnected
            || !(state.allows_transmission() || drives_transition)
        {
            return Err(SessionError::InvalidState {
                expected: "a transmitting state".to_string(),
                current: state.to_string(),
            }
            .into());
        }

        message.set_u64(tags::MSG_SEQ_NUM, seq);
        message.set_str(tags::SENDER_COMP_ID, self.session_id.sender_comp_id.as_str());
        message.set_str(tags::TARGET_COMP_ID, self.session_id.target_comp_id.as_str());
        if !message.contains(tags::SENDING_TIME) {
            message.set_str(tags::SENDING_TIME, &Timestamp::now().format_fix());
        }

        let wire = encode(&self.session_id.begin_string, &message)?.freeze();
        self.store
            .store(&self.session_id, seq, Direction::Outbound, &wire)
            .await?;
        debug!(
            session = %self.session_id, msg_type = %message.msg_type(), seq,
            "outbound message persisted and queued"
        );
        self.outbox.push_back(wire);
        self.heartbeat.on_message_sent();
        Ok(seq)
    }

    /// Sends a Heartbeat, optionally echoing a TestReqID.
    pub(crate) async fn send_heartbeat(
        &mut self,
        test_req_id: Option<&str>,
    ) -> Result<(), FixError> {
        let mut message = Message::new(MsgType::Heartbeat);
        if let Some(id) = test_req_id {
            message.set_str(tags::TEST_REQ_ID, id);
        }
        self.send_next(message).await.map(|_| ())
    }

    /// Sends a TestRequest challenge and retains its id for correlation.
    pub(crate) async fn send_test_request(&mut self) -> Result<(), FixError> {
        let id = generate_test_req_id();
        let mut message = Message::new(MsgType::TestRequest);
        message.set_str(tags::TEST_REQ_ID, &id);
        self.send_next(message).await?;
        self.heartbeat.on_test_request_sent(id);
        Ok(())
    }

    /// Sends a session-level Reject.
    pub(crate) async fn send_reject(
        &mut self,
        ref_seq: u64,
        ref_tag: Option<u32>,
        reason: Option<u64>,
        text: &str,
    ) -> Result<(), FixError> {
        if !self.state.state().allows_transmission() {
            warn!(state = %self.state.state(), text, "suppressing Reject outside a transmitting state");
            return Ok(());
        }
        let mut message = Message::new(MsgType::Reject);
        message.set_u64(tags::REF_SEQ_NUM, ref_seq);
        if let Some(tag) = ref_tag {
            message.set_u64(tags::REF_TAG_ID, u64::from(tag));
        }
        if let Some(reason) = reason {
            message.set_u64(tags::SESSION_REJECT_REASON, reason);
        }
        message.set_str(tags::TEXT, text);
        self.send_next(message).await.map(|_| ())
    }

    /// Sends a ResendRequest for `[begin, end]`.
    pub(crate) async fn send_resend_request(
        &mut self,
        begin: u64,
        end: u64,
    ) -> Result<(), FixError> {
        let mut message = Message::new(MsgType::ResendRequest);
        message.set_u64(tags::BEGIN_SEQ_NO, begin);
        message.set_u64(tags::END_SEQ_NO, end);
        self.send_next(message).await.map(|_| ())
    }

    /// Sends a SequenceReset-GapFill occupying `at_seq`, pointing the peer
    /// at `new_seq`.
    pub(crate) async fn send_gap_fill(&mut self, at_seq: u64, new_seq: u64) -> Result<(), FixError> {
        let mut message = Message::new(MsgType::SequenceReset);
        message.set_flag(tags::GAP_FILL_FLAG, true);
        message.set_u64(tags::NEW_SEQ_NO, new_seq);
        message.set_flag(tags::POSS_DUP_FLAG, true);
        self.send_with_seq(message, at_seq).await.map(|_| ())
    }

    /// Sends a Logout once per connection cycle.
    ///
    /// From Active this also drives the state machine into
    /// LogoutInProgress.
    pub(crate) async fn send_logout(&mut self, text: &str) -> Result<(), FixError> {
        if self.state.state() == SessionState::Disconnected || self.logout_sent {
            return Ok(());
        }
        if self.state.state() == SessionState::Active {
            self.state.on_event(SessionEvent::LogoutRequested);
        }
        let mut message = Message::new(MsgType::Logout);
        message.set_str(tags::TEXT, text);
        self.send_next(message).await?;
        self.logout_sent = true;
        Ok(())
    }

    /// Completes the logoff waiter, if one is pending.
    pub(crate) fn complete_logoff(&mut self, confirmed: bool) {
        if let Some((_, done)) = self.pending_logoff.take() {
            let _ = done.send(confirmed);
        }
    }

    /// Records the reason reported to `on_logout` at cycle end.
    fn note_close_reason(&mut self, reason: &str) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason.to_string());
        }
    }

    /// Tears the session down over a protocol violation: Logout with the
    /// given text, no automatic reconnect.
    async fn fatal_violation(&mut self, text: &str) -> Result<(), FixError> {
        error!(session = %self.session_id, text, "fatal protocol violation");
        self.note_close_reason(text);
        self.fatal = true;
        let _ = self.send_logout(text).await;
        if self.state.state() != SessionState::Disconnected {
            self.state.on_event(SessionEvent::FatalError);
        }
        Ok(())
    }
}

/// Processes one framed inbound message through the full pipeline.
async fn process_inbound(
    core: &mut SessionCore,
    processor: &MessageProcessor,
    frame: &[u8],
) -> Result<(), FixError> {
    core.heartbeat.on_message_received();

    let decoded = match decode_with(frame, core.config.validate_checksum) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(session = %core.session_id, error = %err, "undecodable inbound message");
            let ref_seq = core.store.next_incoming(&core.session_id).await?;
            core.send_reject(
                ref_seq,
                None,
                Some(tags::REJECT_REASON_INCORRECT_DATA_FORMAT),
                &err.to_string(),
            )
            .await?;
            return Ok(());
        }
    };
    let message = decoded.message;

    // Identity checks: BeginString, then both CompIDs. Mismatches are
    // fatal protocol violations.
    if decoded.begin_string != core.session_id.begin_string {
        return core
            .fatal_violation(&format!(
                "BeginString mismatch: expected {}, received {}",
                core.session_id.begin_string, decoded.begin_string
            ))
            .await;
    }
    let expected_sender = core.session_id.target_comp_id.as_str();
    if message.sender_comp_id() != Some(expected_sender) {
        return core
            .fatal_violation(&format!(
                "SenderCompID mismatch: expected {}, received {}",
                expected_sender,
                message.sender_comp_id().unwrap_or("<missing>")
            ))
            .await;
    }
    let expected_target = core.session_id.sender_comp_id.as_str();
    if message.target_comp_id() != Some(expected_target) {
        return core
            .fatal_violation(&format!(
                "TargetCompID mismatch: expected {}, received {}",
                expected_target,
                message.target_comp_id().unwrap_or("<missing>")
            ))
            .await;
    }

    let Some(received) = message.seq_num() else {
        return core
            .fatal_violation("missing or invalid MsgSeqNum (34)")
            .await;
    };
    let expected = core.store.next_incoming(&core.session_id).await?;
    let msg_type = message.msg_type().clone();

    // A Logon carrying ResetSeqNumFlag is accepted regardless of its
    // sequence number; afterwards the next inbound is 2.
    if msg_type == MsgType::Logon && message.get_flag(tags::RESET_SEQ_NUM_FLAG) {
        core.store
            .store(&core.session_id, received, Direction::Inbound, frame)
            .await?;
        let action = processor.dispatch(core, &message).await?;
        apply_action(core, action).await?;
        core.store.set_incoming(&core.session_id, 2).await?;
        return Ok(());
    }

    match SequenceCheck::classify(expected, received) {
        SequenceCheck::Expected => {
            if core.resend_outstanding.take().is_some() {
                debug!(session = %core.session_id, seq = received, "sequence gap closed");
            }
            core.store
                .store(&core.session_id, received, Direction::Inbound, frame)
                .await?;
            dispatch_and_advance(core, processor, &message).await?;
            drain_pending(core, processor).await?;
        }
        SequenceCheck::TooLow { .. } => {
            if message.poss_dup() {
                debug!(
                    session = %core.session_id, seq = received, expected,
                    "ignoring possible duplicate"
                );
                return Ok(());
            }
            core.fatal_violation(&format!(
                "MsgSeqNum too low, expected {expected} but received {received}"
            ))
            .await?;
        }
        SequenceCheck::Gap { .. } => {
            warn!(
                session = %core.session_id, expected, received,
                "sequence gap detected"
            );
            core.store
                .store(&core.session_id, received, Direction::Inbound, frame)
                .await?;
            if core.resend_outstanding != Some(expected) {
                core.send_resend_request(expected, received - 1).await?;
                core.resend_outstanding = Some(expected);
            }
            // Logon, Logout, and SequenceReset bypass gap queueing.
            if matches!(
                msg_type,
                MsgType::Logon | MsgType::Logout | MsgType::SequenceReset
            ) {
                let action = processor.dispatch(core, &message).await?;
                apply_action(core, action).await?;
            } else {
                core.pending_gap.insert(received, message);
            }
        }
    }
    Ok(())
}

/// Dispatches an in-sequence message and advances the inbound counter.
///
/// SequenceReset manages the counter itself; everything else advances by
/// one after a successful dispatch.
async fn dispatch_and_advance(
    core: &mut SessionCore,
    processor: &MessageProcessor,
    message: &Message,
) -> Result<(), FixError> {
    let manages_counter = *message.msg_type() == MsgType::SequenceReset;
    let action = processor.dispatch(core, message).await?;
    apply_action(core, action).await?;
    if !manages_counter {
        core.store.increment_incoming(&core.session_id).await?;
    }
    Ok(())
}

/// Delivers queued out-of-order messages as the gap closes.
async fn drain_pending(
    core: &mut SessionCore,
    processor: &MessageProcessor,
) -> Result<(), FixError> {
    loop {
        let next = core.store.next_incoming(&core.session_id).await?;
        let Some(message) = core.pending_gap.remove(&next) else {
            return Ok(());
        };
        debug!(session = %core.session_id, seq = next, "delivering queued message after gap fill");
        dispatch_and_advance(core, processor, &message).await?;
    }
}

/// Translates a handler outcome into engine behavior.
async fn apply_action(core: &mut SessionCore, action: HandlerAction) -> Result<(), FixError> {
    match action {
        HandlerAction::Continue => Ok(()),
        HandlerAction::LogoutAndDisconnect { text } => core.fatal_violation(&text).await,
        HandlerAction::Disconnect => {
            core.note_close_reason("logout complete");
            if core.state.state() != SessionState::Disconnected {
                core.state.on_event(SessionEvent::NetworkError);
            }
            Ok(())
        }
    }
}

async fn handle_command(core: &mut SessionCore, command: Command) {
    match command {
        Command::Send(message, done) => {
            let result = core.send_app(message).await.map(|_| ());
            let _ = done.send(result);
        }
        Command::RequestLogoff { timeout, done } => {
            if !matches!(
                core.state.state(),
                SessionState::Active | SessionState::LogoutInProgress
            ) {
                let _ = done.send(false);
                return;
            }
            core.shutdown = true;
            if let Err(err) = core.send_logout("Operator requested logout").await {
                error!(session = %core.session_id, error = %err, "failed to send Logout");
                let _ = done.send(false);
                return;
            }
            core.pending_logoff = Some((Instant::now() + timeout, done));
        }
        Command::Disconnect { graceful } => {
            info!(session = %core.session_id, graceful, "disconnect requested");
            core.shutdown = true;
            core.note_close_reason("operator disconnect");
            if graceful && core.state.state() == SessionState::Active {
                let _ = core.send_logout("Operator requested disconnect").await;
            }
            match core.state.state() {
                SessionState::Disconnected => {}
                SessionState::LogoutInProgress => {
                    core.state.on_event(SessionEvent::Timeout);
                }
                _ => {
                    core.state.on_event(SessionEvent::NetworkError);
                }
            }
        }
    }
}

/// Periodic liveness and timeout work.
async fn on_tick(core: &mut SessionCore, cycle_start: Instant) -> Result<(), FixError> {
    let now = Instant::now();

    // Logoff waiter deadline: give up and force the disconnect.
    let logoff_expired = core
        .pending_logoff
        .as_ref()
        .is_some_and(|(deadline, _)| now >= *deadline);
    if logoff_expired {
        warn!(session = %core.session_id, "timed out waiting for Logout confirmation");
        core.complete_logoff(false);
        core.note_close_reason("logout timed out");
        if core.state.state() == SessionState::LogoutInProgress {
            core.state.on_event(SessionEvent::Timeout);
        } else if core.state.state() != SessionState::Disconnected {
            core.state.on_event(SessionEvent::NetworkError);
        }
        return Ok(());
    }

    // Logon must complete within the configured window.
    match core.state.state() {
        SessionState::LogonInProgress => {
            if now.duration_since(cycle_start) >= core.config.logon_timeout {
                warn!(session = %core.session_id, "logon timed out");
                core.note_close_reason("logon timed out");
                core.state.on_event(SessionEvent::Timeout);
            }
        }
        SessionState::AwaitingLogon => {
            if now.duration_since(cycle_start) >= core.config.logon_timeout {
                warn!(session = %core.session_id, "peer connected but never sent Logon");
                core.note_close_reason("logon timed out");
                core.state.on_event(SessionEvent::NetworkError);
            }
        }
        // Liveness timers run only while Active.
        SessionState::Active => {
            if core.heartbeat.peer_dead() {
                error!(
                    session = %core.session_id,
                    silence = ?core.heartbeat.silence(),
                    "no response to TestRequest, declaring peer dead"
                );
                core.note_close_reason("heartbeat timeout");
                core.state.on_event(SessionEvent::NetworkError);
            } else if core.heartbeat.test_request_due() {
                core.send_test_request().await?;
            } else if core.heartbeat.heartbeat_due() {
                core.send_heartbeat(None).await?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Sends the initiator's Logon, resetting counters when configured.
async fn send_logon(core: &mut SessionCore) -> Result<(), FixError> {
    let mut message = Message::new(MsgType::Logon);
    message.set_u64(tags::ENCRYPT_METHOD, 0);
    message.set_u64(tags::HEART_BT_INT, core.config.heartbeat_interval_secs());
    if core.config.reset_on_logon {
        info!(session = %core.session_id, "resetting sequence numbers for logon");
        core.store.reset(&core.session_id).await?;
        message.set_flag(tags::RESET_SEQ_NUM_FLAG, true);
        core.send_with_seq(message, 1).await?;
    } else {
        message.set_flag(tags::RESET_SEQ_NUM_FLAG, false);
        core.send_next(message).await?;
    }
    core.heartbeat.reset();
    Ok(())
}

async fn flush_outbox(core: &mut SessionCore, conn: &mut Connection) -> std::io::Result<()> {
    while let Some(wire) = core.outbox.pop_front() {
        conn.send(wire)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }
    Ok(())
}

/// Top-level session engine.
///
/// Construct with [`SessionEngine::new`], optionally adjust sequence
/// numbers, then call [`run`](SessionEngine::run) (or
/// [`run_with_stream`](SessionEngine::run_with_stream) for an
/// already-established stream). The engine runs until the session reaches
/// its terminal Disconnected state.
pub struct SessionEngine {
    core: SessionCore,
    processor: MessageProcessor,
    cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: mpsc::Sender<Command>,
    started: bool,
}

impl SessionEngine {
    /// Creates an engine, opening the configured message store backend.
    ///
    /// # Errors
    /// Returns `StoreError` if the backend cannot be opened.
    pub async fn new(
        config: SessionConfig,
        application: Arc<dyn Application>,
    ) -> Result<Self, FixError> {
        let store = open_store(
            config.message_store.as_str(),
            config.store_path.as_deref(),
        )?;
        Ok(Self::with_store(config, application, store).await)
    }

    /// Creates an engine over an externally constructed store.
    pub async fn with_store(
        config: SessionConfig,
        application: Arc<dyn Application>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let core = SessionCore::new(config, application, store);
        core.application.on_create(&core.session_id).await;
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Self {
            core,
            processor: MessageProcessor::new(),
            cmd_rx,
            cmd_tx,
            started: false,
        }
    }

    /// The session identity.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.core.session_id
    }

    /// Returns a handle for interacting with the running session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.core.session_id.clone(),
            tx: self.cmd_tx.clone(),
        }
    }

    /// Registers a state-change listener. Must be called before the engine
    /// starts.
    pub fn subscribe_state(
        &mut self,
        listener: Box<dyn Fn(SessionState, SessionState, SessionEvent) + Send + Sync>,
    ) {
        self.core.state.subscribe(listener);
    }

    /// Overrides both durable sequence counters. Valid only before start.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` after start, or a store error.
    pub async fn set_sequence_numbers(
        &mut self,
        incoming: u64,
        outgoing: u64,
    ) -> Result<(), FixError> {
        if self.started {
            return Err(SessionError::InvalidState {
                expected: "engine not yet started".to_string(),
                current: "started".to_string(),
            }
            .into());
        }
        self.core
            .store
            .set_incoming(&self.core.session_id, incoming)
            .await?;
        self.core
            .store
            .set_outgoing(&self.core.session_id, outgoing)
            .await?;
        Ok(())
    }

    /// Runs the session to its terminal state, opening connections itself
    /// according to the configured role and retry policy.
    ///
    /// # Errors
    /// Returns the fatal error that ended the session, if any.
    pub async fn run(mut self) -> Result<(), FixError> {
        self.started = true;
        match self.core.config.connection_type {
            ConnectionType::Initiator => self.run_initiator().await,
            ConnectionType::Acceptor => self.run_acceptor().await,
        }
    }

    /// Drives the session over an already-established stream.
    ///
    /// Used for TLS-wrapped streams built by an external SSL layer and by
    /// tests; no reconnection is attempted.
    ///
    /// # Errors
    /// Returns the fatal error that ended the session, if any.
    pub async fn run_with_stream<S>(mut self, stream: S) -> Result<(), FixError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.started = true;
        let role = self.core.config.connection_type.role();
        if self.core.state.state() == SessionState::Disconnected {
            self.core.state.on_event(SessionEvent::Start(role));
        }
        if self.core.config.connection_type == ConnectionType::Initiator {
            self.core.state.on_event(SessionEvent::Connected);
            send_logon(&mut self.core).await?;
        }
        self.drive_connection(Box::new(stream)).await
    }

    async fn run_initiator(&mut self) -> Result<(), FixError> {
        let connector = Connector::new(self.core.config.host.clone(), self.core.config.port);
        let mut backoff = Backoff::new(
            self.core.config.reconnect_interval,
            self.core.config.reconnect_max_interval,
        );
        let mut attempts = 0u32;

        self.core
            .state
            .on_event(SessionEvent::Start(fixline_session::SessionRole::Initiator));

        loop {
            match connector.connect().await {
                Ok(stream) => {
                    self.core.state.on_event(SessionEvent::Connected);
                    send_logon(&mut self.core).await?;
                    let result = self.drive_connection(Box::new(stream)).await;
                    if self.core.reached_active {
                        attempts = 0;
                        backoff.reset();
                    }
                    if self.core.fatal || self.core.shutdown {
                        return result;
                    }
                    result?;
                }
                Err(err) => {
                    warn!(session = %self.core.session_id, error = %err, "connect failed");
                    self.core.state.on_event(SessionEvent::ConnectFailed);
                }
            }

            attempts += 1;
            if attempts >= self.core.config.reconnect_max_attempts {
                error!(
                    session = %self.core.session_id, attempts,
                    "retry budget exhausted, abandoning session"
                );
                self.core.state.on_event(SessionEvent::MaxRetriesReached);
                return Ok(());
            }
            if self.core.state.state() == SessionState::Disconnected {
                self.core.state.on_event(SessionEvent::RetryEnabled);
            }
            tokio::time::sleep(backoff.next_delay()).await;
            self.core.state.on_event(SessionEvent::RetryAttempt);
        }
    }

    async fn run_acceptor(&mut self) -> Result<(), FixError> {
        let listener = Listener::bind(&self.core.config.host, self.core.config.port).await?;
        self.core
            .state
            .on_event(SessionEvent::Start(fixline_session::SessionRole::Acceptor));

        loop {
            let (stream, peer) = listener.accept().await?;
            info!(session = %self.core.session_id, %peer, "serving accepted connection");
            let result = self.drive_connection(Box::new(stream)).await;
            result?;
            if self.core.fatal || self.core.shutdown {
                return Ok(());
            }
            // Re-arm for the next connection cycle.
            self.core
                .state
                .on_event(SessionEvent::Start(fixline_session::SessionRole::Acceptor));
        }
    }

    /// Runs one connection cycle until the state machine reaches
    /// Disconnected.
    async fn drive_connection(&mut self, stream: Box<dyn StreamIo>) -> Result<(), FixError> {
        let codec = FrameCodec::new().with_max_message_size(self.core.config.max_message_size);
        let mut conn: Connection = Framed::new(stream, codec);
        let mut tick = interval(Duration::from_millis(250));
        let cycle_start = Instant::now();
        let mut result: Result<(), FixError> = Ok(());

        self.core.pending_gap.clear();
        self.core.resend_outstanding = None;
        self.core.logout_sent = false;
        self.core.reached_active = false;
        self.core.close_reason = None;

        loop {
            if let Err(err) = flush_outbox(&mut self.core, &mut conn).await {
                error!(session = %self.core.session_id, error = %err, "write failed");
                self.core.note_close_reason("write failed");
                if self.core.state.state() != SessionState::Disconnected {
                    self.core.state.on_event(SessionEvent::NetworkError);
                }
            }
            if self.core.state.state() == SessionState::Disconnected {
                break;
            }

            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    if let Some(command) = maybe_cmd {
                        handle_command(&mut self.core, command).await;
                    }
                }
                frame = conn.next() => {
                    match frame {
                        Some(Ok(bytes)) => {
                            if let Err(err) =
                                process_inbound(&mut self.core, &self.processor, &bytes).await
                            {
                                error!(
                                    session = %self.core.session_id, error = %err,
                                    "fatal failure processing inbound message"
                                );
                                self.core.fatal = true;
                                self.core.note_close_reason("store failure");
                                if self.core.state.state() != SessionState::Disconnected {
                                    self.core.state.on_event(SessionEvent::FatalError);
                                }
                                result = Err(err);
                            }
                        }
                        Some(Err(err)) => {
                            error!(session = %self.core.session_id, error = %err, "framing error");
                            self.core.note_close_reason("framing error");
                            if self.core.state.state() != SessionState::Disconnected {
                                self.core.state.on_event(SessionEvent::NetworkError);
                            }
                        }
                        None => {
                            info!(session = %self.core.session_id, "peer closed connection");
                            self.core.note_close_reason("peer disconnected");
                            if self.core.state.state() != SessionState::Disconnected {
                                self.core.state.on_event(SessionEvent::NetworkError);
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    if let Err(err) = on_tick(&mut self.core, cycle_start).await {
                        error!(session = %self.core.session_id, error = %err, "liveness check failed");
                        self.core.fatal = true;
                        if self.core.state.state() != SessionState::Disconnected {
                            self.core.state.on_event(SessionEvent::FatalError);
                        }
                        result = Err(err);
                    }
                }
            }
        }

        // Bounded final flush so an in-flight Logout reaches the wire.
        let _ = tokio::time::timeout(
            Duration::from_millis(100),
            flush_outbox(&mut self.core, &mut conn),
        )
        .await;

        self.core.complete_logoff(false);
        self.core.outbox.clear();
        if self.core.reached_active {
            let reason = self
                .core
                .close_reason
                .clone()
                .unwrap_or_else(|| "disconnected".to_string());
            self.core
                .application
                .on_logout(&self.core.session_id, &reason)
                .await;
        }
        info!(session = %self.core.session_id, "connection cycle ended");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use async_trait::async_trait;
    use fixline_core::CompId;
    use fixline_session::SessionConfigBuilder;
    use fixline_store::MemoryStore;
    use fixline_tagvalue::{decode, Decoded};
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn has(&self, needle: &str) -> bool {
            self.events.lock().iter().any(|e| e.contains(needle))
        }
    }

    #[async_trait]
    impl Application for Recorder {
        async fn on_create(&self, _session_id: &SessionId) {
            self.events.lock().push("create".to_string());
        }

        async fn on_logon(&self, _session_id: &SessionId) {
            self.events.lock().push("logon".to_string());
        }

        async fn on_logout(&self, _session_id: &SessionId, reason: &str) {
            self.events.lock().push(format!("logout:{reason}"));
        }

        async fn on_message_from_app(&self, message: &Message, _session_id: &SessionId) {
            self.events.lock().push(format!(
                "app:{}:{}",
                message.msg_type(),
                message.seq_num().unwrap_or(0)
            ));
        }

        async fn to_app(&self, _message: &mut Message, _session_id: &SessionId) {
            self.events.lock().push("to_app".to_string());
        }
    }

    /// Scripted counterparty on the other end of a duplex pipe.
    struct Peer {
        framed: Framed<DuplexStream, FrameCodec>,
        seq: u64,
    }

    impl Peer {
        fn new(stream: DuplexStream) -> Self {
            Self {
                framed: Framed::new(stream, FrameCodec::new()),
                seq: 1,
            }
        }

        async fn recv(&mut self) -> Decoded {
            let bytes = self
                .framed
                .next()
                .await
                .expect("engine closed the stream")
                .expect("frame error");
            decode(&bytes).expect("engine sent an undecodable message")
        }

        async fn send(&mut self, mut message: Message) {
            if message.seq_num().is_none() {
                message.set_u64(tags::MSG_SEQ_NUM, self.seq);
            }
            self.seq = message.seq_num().unwrap() + 1;
            if !message.contains(tags::SENDER_COMP_ID) {
                message.set_str(tags::SENDER_COMP_ID, "EXEC");
            }
            if !message.contains(tags::TARGET_COMP_ID) {
                message.set_str(tags::TARGET_COMP_ID, "BANZAI");
            }
            if !message.contains(tags::SENDING_TIME) {
                message.set_str(tags::SENDING_TIME, &Timestamp::now().format_fix());
            }
            let wire = encode("FIX.4.4", &message).unwrap().freeze();
            self.framed.send(wire).await.unwrap();
        }

        async fn send_logon(&mut self, reset: bool) {
            let mut logon = Message::new(MsgType::Logon);
            logon.set_u64(tags::ENCRYPT_METHOD, 0);
            logon.set_u64(tags::HEART_BT_INT, 30);
            logon.set_flag(tags::RESET_SEQ_NUM_FLAG, reset);
            self.send(logon).await;
        }
    }

    fn initiator_config(reset: bool) -> SessionConfig {
        SessionConfigBuilder::new()
            .begin_string("FIX.4.4")
            .sender_comp_id(CompId::new("BANZAI").unwrap())
            .target_comp_id(CompId::new("EXEC").unwrap())
            .connection_type(ConnectionType::Initiator)
            .heartbeat_interval(Duration::from_secs(30))
            .reset_on_logon(reset)
            .build()
            .unwrap()
    }

    fn acceptor_config() -> SessionConfig {
        SessionConfigBuilder::new()
            .begin_string("FIX.4.4")
            .sender_comp_id(CompId::new("BANZAI").unwrap())
            .target_comp_id(CompId::new("EXEC").unwrap())
            .connection_type(ConnectionType::Acceptor)
            .heartbeat_interval(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    #[allow(clippy::type_complexity)]
    async fn rig(
        config: SessionConfig,
    ) -> (
        Arc<MemoryStore>,
        Arc<Recorder>,
        SessionHandle,
        JoinHandle<Result<(), FixError>>,
        Peer,
        SessionId,
    ) {
        let store = Arc::new(MemoryStore::new());
        let app = Arc::new(Recorder::default());
        let engine = SessionEngine::with_store(
            config,
            Arc::clone(&app) as Arc<dyn Application>,
            Arc::clone(&store) as Arc<dyn MessageStore>,
        )
        .await;
        let session_id = engine.session_id().clone();
        let handle = engine.handle();
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(engine.run_with_stream(ours));
        (store, app, handle, task, Peer::new(theirs), session_id)
    }

    async fn wait_for(app: &Recorder, needle: &str) {
        for _ in 0..500 {
            if app.has(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "event '{needle}' never observed; saw {:?}",
            app.events.lock()
        );
    }

    async fn handshake(peer: &mut Peer, app: &Recorder) {
        let logon = peer.recv().await;
        assert_eq!(logon.message.msg_type(), &MsgType::Logon);
        peer.send_logon(logon.message.get_flag(tags::RESET_SEQ_NUM_FLAG))
            .await;
        wait_for(app, "logon").await;
    }

    #[tokio::test]
    async fn test_initiator_logon_with_reset() {
        let (store, app, _handle, _task, mut peer, id) = rig(initiator_config(true)).await;

        let logon = peer.recv().await;
        let msg = &logon.message;
        assert_eq!(logon.begin_string, "FIX.4.4");
        assert_eq!(msg.msg_type(), &MsgType::Logon);
        assert_eq!(msg.seq_num(), Some(1));
        assert_eq!(msg.sender_comp_id(), Some("BANZAI"));
        assert_eq!(msg.target_comp_id(), Some("EXEC"));
        assert_eq!(msg.get_u64(tags::ENCRYPT_METHOD), Some(0));
        assert_eq!(msg.get_u64(tags::HEART_BT_INT), Some(30));
        assert!(msg.get_flag(tags::RESET_SEQ_NUM_FLAG));

        peer.send_logon(true).await;
        wait_for(&app, "logon").await;

        // Both sides recorded at 1; both counters point at 2.
        assert!(store.get(&id, 1, Direction::Outbound).await.unwrap().is_some());
        assert!(store.get(&id, 1, Direction::Inbound).await.unwrap().is_some());
        assert_eq!(store.next_outgoing(&id).await.unwrap(), 2);
        assert_eq!(store.next_incoming(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_acceptor_logon_and_test_request() {
        let (_store, app, _handle, _task, mut peer, _id) = rig(acceptor_config()).await;

        peer.send_logon(false).await;
        let response = peer.recv().await;
        assert_eq!(response.message.msg_type(), &MsgType::Logon);
        assert_eq!(response.message.seq_num(), Some(1));
        wait_for(&app, "logon").await;

        let mut test_request = Message::new(MsgType::TestRequest);
        test_request.set_str(tags::TEST_REQ_ID, "PING-1");
        peer.send(test_request).await;

        let heartbeat = peer.recv().await;
        assert_eq!(heartbeat.message.msg_type(), &MsgType::Heartbeat);
        assert_eq!(heartbeat.message.get_str(tags::TEST_REQ_ID), Some("PING-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let (_store, app, _handle, _task, mut peer, _id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        let started = Instant::now();
        let first = peer.recv().await;
        assert_eq!(first.message.msg_type(), &MsgType::Heartbeat);
        let first_at = started.elapsed();
        assert!(
            first_at >= Duration::from_secs(29) && first_at < Duration::from_secs(32),
            "first heartbeat at {first_at:?}"
        );

        // Keep the inbound side alive so no TestRequest fires.
        peer.send(Message::new(MsgType::Heartbeat)).await;

        let second = peer.recv().await;
        assert_eq!(second.message.msg_type(), &MsgType::Heartbeat);
        let second_at = started.elapsed();
        assert!(
            second_at >= Duration::from_secs(58) && second_at < Duration::from_secs(63),
            "second heartbeat at {second_at:?}"
        );
        assert!(second.message.seq_num() > first.message.seq_num());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_gets_test_request_then_disconnect() {
        let (_store, app, _handle, task, mut peer, _id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        // 30s idle: heartbeat. 36s silent: test request.
        let first = peer.recv().await;
        assert_eq!(first.message.msg_type(), &MsgType::Heartbeat);
        let challenge = peer.recv().await;
        assert_eq!(challenge.message.msg_type(), &MsgType::TestRequest);
        assert!(challenge.message.get_str(tags::TEST_REQ_ID).is_some());

        // Unanswered for another 36s: the engine gives up.
        let result = tokio::time::timeout(Duration::from_secs(120), task)
            .await
            .expect("engine should terminate")
            .unwrap();
        assert!(result.is_ok());
        wait_for(&app, "logout:heartbeat timeout").await;
    }

    #[tokio::test]
    async fn test_gap_detection_resend_request_and_queue_drain() {
        let (store, app, _handle, _task, mut peer, id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        // Engine expects seq 2; jump to 5.
        let mut news = Message::new(MsgType::News);
        news.set_u64(tags::MSG_SEQ_NUM, 5);
        news.set_str(tags::TEXT, "late");
        peer.send(news).await;

        let resend = peer.recv().await;
        assert_eq!(resend.message.msg_type(), &MsgType::ResendRequest);
        assert_eq!(resend.message.get_u64(tags::BEGIN_SEQ_NO), Some(2));
        assert_eq!(resend.message.get_u64(tags::END_SEQ_NO), Some(4));

        // Nothing delivered to the application yet.
        assert!(!app.has("app:B:5"));

        // Gap-fill 2..4, pointing at 5.
        let mut gap_fill = Message::new(MsgType::SequenceReset);
        gap_fill.set_u64(tags::MSG_SEQ_NUM, 2);
        gap_fill.set_flag(tags::GAP_FILL_FLAG, true);
        gap_fill.set_u64(tags::NEW_SEQ_NO, 5);
        gap_fill.set_flag(tags::POSS_DUP_FLAG, true);
        peer.send(gap_fill).await;

        // The queued seq-5 message is delivered once the gap closes.
        wait_for(&app, "app:B:5").await;
        for _ in 0..100 {
            if store.next_incoming(&id).await.unwrap() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.next_incoming(&id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_resend_replays_app_and_coalesces_admin() {
        let (store, app, handle, _task, mut peer, id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        // One application message at seq 2.
        let mut order = Message::new(MsgType::NewOrderSingle);
        order.set_str(11, "ORD-1");
        order.set_str(55, "MSFT");
        handle.send(order).await.unwrap();
        let sent = peer.recv().await;
        assert_eq!(sent.message.seq_num(), Some(2));
        let original_sending_time = sent.message.sending_time().unwrap().to_string();

        // Ask for everything back.
        let mut resend = Message::new(MsgType::ResendRequest);
        resend.set_u64(tags::BEGIN_SEQ_NO, 1);
        resend.set_u64(tags::END_SEQ_NO, 0);
        peer.send(resend).await;

        // Seq 1 was the Logon: coalesced into a gap fill pointing at 2.
        let gap_fill = peer.recv().await;
        assert_eq!(gap_fill.message.msg_type(), &MsgType::SequenceReset);
        assert_eq!(gap_fill.message.seq_num(), Some(1));
        assert!(gap_fill.message.get_flag(tags::GAP_FILL_FLAG));
        assert!(gap_fill.message.poss_dup());
        assert_eq!(gap_fill.message.get_u64(tags::NEW_SEQ_NO), Some(2));

        // Seq 2 replayed with PossDup and the original sending time.
        let replay = peer.recv().await;
        assert_eq!(replay.message.msg_type(), &MsgType::NewOrderSingle);
        assert_eq!(replay.message.seq_num(), Some(2));
        assert!(replay.message.poss_dup());
        assert_eq!(
            replay.message.get_str(tags::ORIG_SENDING_TIME),
            Some(original_sending_time.as_str())
        );
        assert_eq!(replay.message.get_str(11), Some("ORD-1"));

        // Overwrites archived the original transmissions.
        let archived_logon = store.archived(&id, 1, Direction::Outbound).await.unwrap();
        assert_eq!(archived_logon.len(), 1);
        let archived_order = store.archived(&id, 2, Direction::Outbound).await.unwrap();
        assert_eq!(archived_order.len(), 1);
    }

    #[tokio::test]
    async fn test_logoff_handshake() {
        let (_store, app, handle, task, mut peer, _id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        let (confirmed, ()) = tokio::join!(
            async { handle.request_logoff(Duration::from_secs(5)).await.unwrap() },
            async {
                let logout = peer.recv().await;
                assert_eq!(logout.message.msg_type(), &MsgType::Logout);
                assert_eq!(
                    logout.message.get_str(tags::TEXT),
                    Some("Operator requested logout")
                );
                peer.send(Message::new(MsgType::Logout)).await;
            }
        );
        assert!(confirmed);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine should terminate")
            .unwrap();
        assert!(result.is_ok());
        wait_for(&app, "logout:").await;
    }

    #[tokio::test]
    async fn test_peer_initiated_logout() {
        let (_store, app, _handle, task, mut peer, _id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        peer.send(Message::new(MsgType::Logout)).await;
        let response = peer.recv().await;
        assert_eq!(response.message.msg_type(), &MsgType::Logout);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine should terminate")
            .unwrap();
        assert!(result.is_ok());
        wait_for(&app, "logout:").await;
    }

    #[tokio::test]
    async fn test_sequence_reset_decrease_is_rejected() {
        let (store, app, _handle, _task, mut peer, id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        // In-sequence SequenceReset trying to move the counter backwards.
        let mut reset = Message::new(MsgType::SequenceReset);
        reset.set_u64(tags::MSG_SEQ_NUM, 2);
        reset.set_flag(tags::GAP_FILL_FLAG, false);
        reset.set_u64(tags::NEW_SEQ_NO, 1);
        peer.send(reset).await;

        let reject = peer.recv().await;
        assert_eq!(reject.message.msg_type(), &MsgType::Reject);
        assert_eq!(reject.message.get_u64(tags::REF_SEQ_NUM), Some(2));
        assert_eq!(reject.message.get_u64(tags::REF_TAG_ID), Some(36));
        assert_eq!(reject.message.get_u64(tags::SESSION_REJECT_REASON), Some(5));
        assert_eq!(
            reject.message.get_str(tags::TEXT),
            Some("Sequence Reset attempted to decrease sequence number")
        );

        // Rejected but consumed: the counter moved past it, never backwards.
        for _ in 0..100 {
            if store.next_incoming(&id).await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.next_incoming(&id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_send_outside_active_fails() {
        let (store, _app, handle, _task, mut peer, id) = rig(initiator_config(true)).await;

        // Swallow the Logon but never reply: state stays LogonInProgress.
        let _ = peer.recv().await;

        let mut order = Message::new(MsgType::NewOrderSingle);
        order.set_str(11, "ORD-1");
        let err = handle.send(order).await.unwrap_err();
        assert!(matches!(
            err,
            FixError::Session(SessionError::InvalidState { .. })
        ));

        // No bytes reached the wire and nothing beyond the Logon was stored.
        assert!(store.get(&id, 2, Direction::Outbound).await.unwrap().is_none());
        let nothing = tokio::time::timeout(Duration::from_millis(100), peer.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_comp_id_mismatch_disconnects() {
        let (store, _app, _handle, task, mut peer, id) = rig(initiator_config(true)).await;
        let _ = peer.recv().await;

        let mut bad_logon = Message::new(MsgType::Logon);
        bad_logon.set_str(tags::SENDER_COMP_ID, "EVIL");
        bad_logon.set_u64(tags::HEART_BT_INT, 30);
        bad_logon.set_flag(tags::RESET_SEQ_NUM_FLAG, true);
        peer.send(bad_logon).await;

        let logout = peer.recv().await;
        assert_eq!(logout.message.msg_type(), &MsgType::Logout);
        assert!(logout
            .message
            .get_str(tags::TEXT)
            .unwrap()
            .contains("SenderCompID mismatch"));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine should terminate")
            .unwrap();
        assert!(result.is_ok());
        // The bad message never advanced the inbound counter.
        assert_eq!(store.next_incoming(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_too_low_without_poss_dup_is_fatal() {
        let (_store, app, _handle, task, mut peer, _id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        let mut stale = Message::new(MsgType::News);
        stale.set_u64(tags::MSG_SEQ_NUM, 1);
        peer.send(stale).await;

        let logout = peer.recv().await;
        assert_eq!(logout.message.msg_type(), &MsgType::Logout);
        assert!(logout
            .message
            .get_str(tags::TEXT)
            .unwrap()
            .contains("MsgSeqNum too low"));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine should terminate")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_too_low_with_poss_dup_is_ignored() {
        let (store, app, _handle, _task, mut peer, id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        let mut dup = Message::new(MsgType::News);
        dup.set_u64(tags::MSG_SEQ_NUM, 1);
        dup.set_flag(tags::POSS_DUP_FLAG, true);
        peer.send(dup).await;

        // Still alive, still expecting 2, nothing delivered.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.next_incoming(&id).await.unwrap(), 2);
        assert!(!app.has("app:B:1"));
    }

    #[tokio::test]
    async fn test_set_sequence_numbers_before_start_only() {
        let store = Arc::new(MemoryStore::new());
        let app = Arc::new(Recorder::default());
        let mut engine = SessionEngine::with_store(
            initiator_config(false),
            Arc::clone(&app) as Arc<dyn Application>,
            Arc::clone(&store) as Arc<dyn MessageStore>,
        )
        .await;
        let id = engine.session_id().clone();

        engine.set_sequence_numbers(5, 9).await.unwrap();
        assert_eq!(store.next_incoming(&id).await.unwrap(), 5);
        assert_eq!(store.next_outgoing(&id).await.unwrap(), 9);
        assert!(app.has("create"));
    }

    #[tokio::test]
    async fn test_outbound_seq_numbers_are_monotonic() {
        let (store, app, handle, _task, mut peer, id) = rig(initiator_config(true)).await;
        handshake(&mut peer, &app).await;

        for n in 0..5u64 {
            let mut news = Message::new(MsgType::News);
            news.set_str(tags::TEXT, &format!("n{n}"));
            handle.send(news).await.unwrap();
        }
        for expected_seq in 2..=6u64 {
            let received = peer.recv().await;
            assert_eq!(received.message.seq_num(), Some(expected_seq));
        }
        assert_eq!(store.next_outgoing(&id).await.unwrap(), 7);
        // to_app ran for each outbound application message.
        assert_eq!(
            app.events.lock().iter().filter(|e| *e == "to_app").count(),
            5
        );
    }
}
