/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session configuration.
//!
//! [`SessionConfig`] is the target of the external configuration loader: it
//! carries every option the engine recognizes. Defaults follow common FIX
//! engine practice (30s heartbeat, 30s logon timeout, 10s logout timeout,
//! capped exponential reconnect backoff).

use crate::state::SessionRole;
use fixline_core::error::SessionError;
use fixline_core::{CompId, SessionId};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Connection role selector (`ConnectionType` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Open an outbound connection and send the first Logon.
    Initiator,
    /// Bind, listen, and wait for the peer's Logon.
    Acceptor,
}

impl ConnectionType {
    /// The state-machine role for this connection type.
    #[must_use]
    pub const fn role(self) -> SessionRole {
        match self {
            Self::Initiator => SessionRole::Initiator,
            Self::Acceptor => SessionRole::Acceptor,
        }
    }
}

impl FromStr for ConnectionType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiator" => Ok(Self::Initiator),
            "acceptor" => Ok(Self::Acceptor),
            other => Err(SessionError::Configuration(format!(
                "unknown ConnectionType: {other}"
            ))),
        }
    }
}

/// Message store backend selector (`MessageStoreType` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// In-memory store; no persistence across restarts.
    #[default]
    Memory,
    /// JSON-lines journal on disk.
    File,
    /// Embedded SQLite database.
    Sqlite,
}

impl StoreKind {
    /// The configuration string for this backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for StoreKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(SessionError::Configuration(format!(
                "unknown MessageStoreType: {other}"
            ))),
        }
    }
}

/// Configuration for one FIX session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// FIX version on the wire (tag 8).
    pub begin_string: String,
    /// Our CompID (tag 49).
    pub sender_comp_id: CompId,
    /// The counterparty CompID (tag 56).
    pub target_comp_id: CompId,
    /// Initiator or acceptor.
    pub connection_type: ConnectionType,
    /// Connect host (initiator) or bind address (acceptor).
    pub host: String,
    /// Connect port (initiator) or listen port (acceptor).
    pub port: u16,
    /// Heartbeat interval (tag 108).
    pub heartbeat_interval: Duration,
    /// Send `141=Y` on the next Logon, resetting both sequence counters.
    pub reset_on_logon: bool,
    /// Whether the transport is wrapped in TLS by the caller.
    pub use_ssl: bool,
    /// Certificate path, handed to the external TLS layer.
    pub ssl_certificate: Option<PathBuf>,
    /// Private key path, handed to the external TLS layer.
    pub ssl_private_key: Option<PathBuf>,
    /// Message store backend.
    pub message_store: StoreKind,
    /// Backing-store location for the file and sqlite backends.
    pub store_path: Option<PathBuf>,
    /// How long to wait for the Logon response.
    pub logon_timeout: Duration,
    /// How long to wait for the Logout confirmation.
    pub logout_timeout: Duration,
    /// Initial reconnect backoff; doubles per attempt.
    pub reconnect_interval: Duration,
    /// Backoff ceiling.
    pub reconnect_max_interval: Duration,
    /// Retry budget before giving up.
    pub reconnect_max_attempts: u32,
    /// Verify inbound checksums at the framing layer.
    pub validate_checksum: bool,
    /// Maximum accepted message size in bytes.
    pub max_message_size: usize,
}

impl SessionConfig {
    /// Creates a configuration with the required identity fields and
    /// defaults for everything else.
    #[must_use]
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: CompId,
        target_comp_id: CompId,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            begin_string: begin_string.into(),
            sender_comp_id,
            target_comp_id,
            connection_type,
            host: "127.0.0.1".to_string(),
            port: 9878,
            heartbeat_interval: Duration::from_secs(30),
            reset_on_logon: false,
            use_ssl: false,
            ssl_certificate: None,
            ssl_private_key: None,
            message_store: StoreKind::Memory,
            store_path: None,
            logon_timeout: Duration::from_secs(30),
            logout_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            reconnect_max_interval: Duration::from_secs(30),
            reconnect_max_attempts: 5,
            validate_checksum: true,
            max_message_size: 1024 * 1024,
        }
    }

    /// The session identity this configuration describes.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        SessionId {
            begin_string: self.begin_string.clone(),
            sender_comp_id: self.sender_comp_id.clone(),
            target_comp_id: self.target_comp_id.clone(),
        }
    }

    /// The heartbeat interval in whole seconds, as sent in tag 108.
    #[must_use]
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    begin_string: Option<String>,
    sender_comp_id: Option<CompId>,
    target_comp_id: Option<CompId>,
    connection_type: Option<ConnectionType>,
    host: Option<String>,
    port: Option<u16>,
    heartbeat_interval: Option<Duration>,
    reset_on_logon: bool,
    message_store: Option<StoreKind>,
    store_path: Option<PathBuf>,
    logon_timeout: Option<Duration>,
    logout_timeout: Option<Duration>,
    reconnect_max_attempts: Option<u32>,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the FIX version.
    #[must_use]
    pub fn begin_string(mut self, version: impl Into<String>) -> Self {
        self.begin_string = Some(version.into());
        self
    }

    /// Sets the sender CompID.
    #[must_use]
    pub fn sender_comp_id(mut self, id: CompId) -> Self {
        self.sender_comp_id = Some(id);
        self
    }

    /// Sets the target CompID.
    #[must_use]
    pub fn target_comp_id(mut self, id: CompId) -> Self {
        self.target_comp_id = Some(id);
        self
    }

    /// Sets the connection type.
    #[must_use]
    pub const fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = Some(connection_type);
        self
    }

    /// Sets the network endpoint.
    #[must_use]
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Requests `141=Y` on the next Logon.
    #[must_use]
    pub const fn reset_on_logon(mut self, reset: bool) -> Self {
        self.reset_on_logon = reset;
        self
    }

    /// Selects the message store backend.
    #[must_use]
    pub const fn message_store(mut self, kind: StoreKind) -> Self {
        self.message_store = Some(kind);
        self
    }

    /// Sets the backing-store path.
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Sets the logon timeout.
    #[must_use]
    pub fn logon_timeout(mut self, timeout: Duration) -> Self {
        self.logon_timeout = Some(timeout);
        self
    }

    /// Sets the logout timeout.
    #[must_use]
    pub fn logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = Some(timeout);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = Some(attempts);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if a required field is missing.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let sender = self
            .sender_comp_id
            .ok_or_else(|| SessionError::Configuration("SenderCompID is required".into()))?;
        let target = self
            .target_comp_id
            .ok_or_else(|| SessionError::Configuration("TargetCompID is required".into()))?;
        let connection_type = self
            .connection_type
            .ok_or_else(|| SessionError::Configuration("ConnectionType is required".into()))?;
        let begin_string = self.begin_string.unwrap_or_else(|| "FIX.4.4".to_string());

        let mut config = SessionConfig::new(begin_string, sender, target, connection_type);
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat_interval = interval;
        }
        config.reset_on_logon = self.reset_on_logon;
        if let Some(kind) = self.message_store {
            config.message_store = kind;
        }
        config.store_path = self.store_path;
        if let Some(timeout) = self.logon_timeout {
            config.logon_timeout = timeout;
        }
        if let Some(timeout) = self.logout_timeout {
            config.logout_timeout = timeout;
        }
        if let Some(attempts) = self.reconnect_max_attempts {
            config.reconnect_max_attempts = attempts;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new(
            "FIX.4.4",
            CompId::new("BANZAI").unwrap(),
            CompId::new("EXEC").unwrap(),
            ConnectionType::Initiator,
        );

        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.logon_timeout, Duration::from_secs(30));
        assert_eq!(config.logout_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_interval, Duration::from_secs(30));
        assert!(!config.reset_on_logon);
        assert!(config.validate_checksum);
        assert_eq!(config.message_store, StoreKind::Memory);
    }

    #[test]
    fn test_session_id_from_config() {
        let config = SessionConfig::new(
            "FIX.4.4",
            CompId::new("BANZAI").unwrap(),
            CompId::new("EXEC").unwrap(),
            ConnectionType::Initiator,
        );
        assert_eq!(config.session_id().to_string(), "FIX.4.4:BANZAI->EXEC");
    }

    #[test]
    fn test_builder() {
        let config = SessionConfigBuilder::new()
            .begin_string("FIX.4.2")
            .sender_comp_id(CompId::new("BANZAI").unwrap())
            .target_comp_id(CompId::new("EXEC").unwrap())
            .connection_type(ConnectionType::Acceptor)
            .endpoint("0.0.0.0", 9880)
            .heartbeat_interval(Duration::from_secs(60))
            .reset_on_logon(true)
            .message_store(StoreKind::Sqlite)
            .store_path("/tmp/fix.db")
            .build()
            .unwrap();

        assert_eq!(config.begin_string, "FIX.4.2");
        assert_eq!(config.port, 9880);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert!(config.reset_on_logon);
        assert_eq!(config.message_store, StoreKind::Sqlite);
    }

    #[test]
    fn test_builder_missing_required() {
        let err = SessionConfigBuilder::new()
            .sender_comp_id(CompId::new("A").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[test]
    fn test_connection_type_parse() {
        assert_eq!(
            "initiator".parse::<ConnectionType>().unwrap(),
            ConnectionType::Initiator
        );
        assert_eq!(
            "ACCEPTOR".parse::<ConnectionType>().unwrap(),
            ConnectionType::Acceptor
        );
        assert!("server".parse::<ConnectionType>().is_err());
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("sqlite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert_eq!("file".parse::<StoreKind>().unwrap(), StoreKind::File);
        assert!("redis".parse::<StoreKind>().is_err());
    }
}
