/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session state machine.
//!
//! [`StateMachine`] owns the current [`SessionState`] and applies the
//! session transition table. Events that have no entry for the current
//! state are logged and ignored. Listeners observe every applied
//! transition as `(old, new, event)`; they are registered at engine
//! construction and never after, so no locking is needed around the list.

use std::fmt;
use tracing::{debug, warn};

/// Role of this endpoint in session establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Client side: opens the connection and sends the first Logon.
    Initiator,
    /// Server side: listens and waits for the peer's Logon.
    Acceptor,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Operational state of a FIX session.
///
/// `Disconnected` is the initial state and the terminal state of every
/// connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection; initial and terminal.
    Disconnected,
    /// TCP connection in progress (initiator).
    Connecting,
    /// Listening, connection accepted, waiting for the peer's Logon
    /// (acceptor).
    AwaitingLogon,
    /// Logon sent, awaiting the response (initiator).
    LogonInProgress,
    /// Session fully established; traffic may flow.
    Active,
    /// Logout sent or received, handshake pending.
    LogoutInProgress,
    /// Connection lost, retry scheduled.
    Reconnecting,
}

impl SessionState {
    /// Returns true if application messages may be sent in this state.
    #[must_use]
    pub const fn allows_app_traffic(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if any message may be transmitted in this state.
    ///
    /// Logon and Logout drive the `LogonInProgress` and `LogoutInProgress`
    /// transitions and are the only traffic allowed there.
    #[must_use]
    pub const fn allows_transmission(self) -> bool {
        matches!(
            self,
            Self::Active | Self::LogonInProgress | Self::LogoutInProgress
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::AwaitingLogon => "AWAITING_LOGON",
            Self::LogonInProgress => "LOGON_IN_PROGRESS",
            Self::Active => "ACTIVE",
            Self::LogoutInProgress => "LOGOUT_IN_PROGRESS",
            Self::Reconnecting => "RECONNECTING",
        };
        write!(f, "{name}")
    }
}

/// Events driving session state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// Engine start in the given role.
    Start(SessionRole),
    /// TCP connection established.
    Connected,
    /// TCP connection attempt failed.
    ConnectFailed,
    /// Peer's Logon request received and accepted (acceptor).
    LogonReceived,
    /// Peer's Logon response accepted (initiator).
    LogonAccepted,
    /// Peer rejected the Logon.
    LogonRejected,
    /// Local operator or handler requested logout.
    LogoutRequested,
    /// Peer initiated logout.
    LogoutReceived,
    /// Peer confirmed our logout.
    LogoutConfirmed,
    /// Transport-level failure (socket closed, heartbeat timeout).
    NetworkError,
    /// Fatal protocol violation; no automatic reconnect.
    FatalError,
    /// A logon or logout timer elapsed.
    Timeout,
    /// Retry policy permits another connection attempt.
    RetryEnabled,
    /// A scheduled retry attempt is starting.
    RetryAttempt,
    /// Retry budget exhausted.
    MaxRetriesReached,
}

/// Applies the transition table.
///
/// Returns the target state, or `None` when the event has no entry for the
/// current state.
fn transition(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    Some(match (state, event) {
        (S::Disconnected, E::Start(SessionRole::Initiator)) => S::Connecting,
        (S::Disconnected, E::Start(SessionRole::Acceptor)) => S::AwaitingLogon,
        (S::Disconnected, E::RetryEnabled) => S::Reconnecting,
        (S::Connecting, E::Connected) => S::LogonInProgress,
        (S::Connecting, E::ConnectFailed) => S::Reconnecting,
        (S::AwaitingLogon, E::LogonReceived) => S::Active,
        (S::LogonInProgress, E::LogonAccepted) => S::Active,
        (S::LogonInProgress, E::LogonRejected | E::Timeout) => S::Disconnected,
        (S::Active, E::LogoutRequested | E::LogoutReceived) => S::LogoutInProgress,
        (S::Active, E::NetworkError | E::FatalError) => S::Disconnected,
        (S::LogoutInProgress, E::LogoutConfirmed | E::Timeout) => S::Disconnected,
        (S::Reconnecting, E::RetryAttempt) => S::Connecting,
        (S::Reconnecting, E::MaxRetriesReached) => S::Disconnected,
        // Connection loss before the session is established tears the
        // cycle down from any intermediate state.
        (
            S::Connecting | S::AwaitingLogon | S::LogonInProgress | S::LogoutInProgress,
            E::NetworkError | E::FatalError,
        ) => S::Disconnected,
        _ => return None,
    })
}

/// Listener invoked on every applied transition.
pub type StateListener = Box<dyn Fn(SessionState, SessionState, SessionEvent) + Send + Sync>;

/// Session state machine with observable transitions.
pub struct StateMachine {
    state: SessionState,
    listeners: Vec<StateListener>,
}

impl StateMachine {
    /// Creates a new machine in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            listeners: Vec::new(),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Registers a state-change listener.
    ///
    /// Listeners must be registered at construction time, before the engine
    /// starts processing events.
    pub fn subscribe(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    /// Applies an event.
    ///
    /// Returns `true` if the transition table had an entry and the state
    /// changed (listeners are notified), `false` if the event was ignored.
    pub fn on_event(&mut self, event: SessionEvent) -> bool {
        match transition(self.state, event) {
            Some(next) => {
                let old = self.state;
                self.state = next;
                debug!(%old, new = %next, ?event, "session state transition");
                for listener in &self.listeners {
                    listener(old, next, event);
                }
                true
            }
            None => {
                warn!(state = %self.state, ?event, "ignoring invalid session state transition");
                false
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
