/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixline
//!
//! A FIX session engine for Rust: a bidirectional, sequence-numbered,
//! heartbeat-driven protocol endpoint that runs as initiator or acceptor
//! over TCP.
//!
//! The engine owns the session state machine, sequence-number bookkeeping,
//! gap-fill/resend recovery, the heartbeat/test-request liveness ladder,
//! and a durable message store that backs replay. Business logic stays in
//! the application callbacks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fixline::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), FixError> {
//! let config = SessionConfigBuilder::new()
//!     .begin_string("FIX.4.4")
//!     .sender_comp_id(CompId::new("BANZAI").unwrap())
//!     .target_comp_id(CompId::new("EXEC").unwrap())
//!     .connection_type(ConnectionType::Initiator)
//!     .endpoint("127.0.0.1", 9878)
//!     .reset_on_logon(true)
//!     .build()?;
//!
//! let mut engine = EngineBuilder::new(config).build().await?;
//! let handle = engine.handle();
//! tokio::spawn(engine.run());
//!
//! let mut order = Message::new(MsgType::NewOrderSingle);
//! order.set_str(11, "ORD-1");
//! handle.send(order).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: session identity, messages, and error types
//! - [`tagvalue`]: the tag=value wire codec
//! - [`session`]: state machine, heartbeat monitor, configuration
//! - [`store`]: durable message storage (memory, file, sqlite)
//! - [`transport`]: framing codec, TCP endpoints, reconnect backoff
//! - [`engine`]: the session coordinator and application callbacks

pub mod core {
    //! Session identity, messages, and error types.
    pub use fixline_core::*;
}

pub mod tagvalue {
    //! Tag=value wire codec.
    pub use fixline_tagvalue::*;
}

pub mod session {
    //! State machine, heartbeat monitor, and configuration.
    pub use fixline_session::*;
}

pub mod store {
    //! Durable message storage.
    pub use fixline_store::*;
}

pub mod transport {
    //! Framing codec, TCP endpoints, and reconnect backoff.
    pub use fixline_transport::*;
}

pub mod engine {
    //! Session coordinator and application callbacks.
    pub use fixline_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use fixline_core::{
        CompId, DecodeError, Direction, EncodeError, Field, FixError, Message, MsgType, Result,
        SeqNum, SessionError, SessionId, StoreError, Timestamp, TransportError,
    };

    pub use fixline_tagvalue::{decode, encode, Decoded};

    pub use fixline_session::{
        ConnectionType, HeartbeatMonitor, SequenceCheck, SessionConfig, SessionConfigBuilder,
        SessionEvent, SessionRole, SessionState, StateMachine, StoreKind,
    };

    pub use fixline_store::{
        open_store, ArchivedRecord, FileStore, MemoryStore, MessageStore, SqliteStore,
        StoredRecord,
    };

    pub use fixline_transport::{Backoff, Connector, FrameCodec, Listener};

    pub use fixline_engine::{
        Application, EngineBuilder, HandlerAction, MessageHandler, MessageProcessor,
        NoOpApplication, SessionEngine, SessionHandle,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _seq = SeqNum::new(1);
        let _state = SessionState::Disconnected;
        let _check = SequenceCheck::classify(1, 1);
        let session = SessionId::new("FIX.4.4", "BANZAI", "EXEC").unwrap();
        assert_eq!(session.to_string(), "FIX.4.4:BANZAI->EXEC");
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        use std::sync::Arc;
        use std::time::Duration;

        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Acceptor engine on the listening side.
        let acceptor_config = SessionConfigBuilder::new()
            .sender_comp_id(CompId::new("EXEC").unwrap())
            .target_comp_id(CompId::new("BANZAI").unwrap())
            .connection_type(ConnectionType::Acceptor)
            .build()
            .unwrap();
        let acceptor = EngineBuilder::new(acceptor_config).build().await.unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = acceptor.run_with_stream(stream).await;
        });

        // Initiator engine connecting to it.
        let initiator_config = SessionConfigBuilder::new()
            .sender_comp_id(CompId::new("BANZAI").unwrap())
            .target_comp_id(CompId::new("EXEC").unwrap())
            .connection_type(ConnectionType::Initiator)
            .reset_on_logon(true)
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let initiator = EngineBuilder::new(initiator_config)
            .with_store(store.clone())
            .build()
            .await
            .unwrap();
        let session_id = initiator.session_id().clone();
        let handle = initiator.handle();

        let stream = Connector::new("127.0.0.1", port).connect().await.unwrap();
        tokio::spawn(initiator.run_with_stream(stream));

        // Wait for the handshake, then exchange a logoff.
        for _ in 0..200 {
            if store.next_incoming(&session_id).await.unwrap() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.next_incoming(&session_id).await.unwrap(), 2);

        let confirmed = handle.request_logoff(Duration::from_secs(5)).await.unwrap();
        assert!(confirmed);
    }
}
