/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! TCP endpoints and the reconnect backoff policy.

use fixline_core::error::TransportError;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Capped exponential backoff with jitter.
///
/// Delays start at the initial interval and double per failed attempt up
/// to the cap, with ±20% jitter on every draw. A successful logon resets
/// the ladder.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial`, capped at `cap`.
    #[must_use]
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    /// Returns the next delay and advances the ladder.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter)
    }

    /// Returns to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Initiator-side connection opener.
#[derive(Debug, Clone)]
pub struct Connector {
    host: String,
    port: u16,
}

impl Connector {
    /// Creates a connector for the given endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Opens a TCP connection to the configured endpoint.
    ///
    /// # Errors
    /// Returns `TransportError::ConnectFailed` if the connection cannot be
    /// established; the engine decides whether to retry.
    pub async fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!(%addr, "connected");
        Ok(stream)
    }
}

/// Acceptor-side listener.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Binds to the given endpoint and starts listening.
    ///
    /// # Errors
    /// Returns `TransportError::ConnectFailed` if the bind fails.
    pub async fn bind(host: &str, port: u16) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("bind {addr}: {e}")))?;
        info!(%addr, "listening");
        Ok(Self { listener })
    }

    /// The bound local address.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::from)
    }

    /// Waits for one inbound connection.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::from)?;
        stream.set_nodelay(true).map_err(TransportError::from)?;
        info!(%peer, "accepted connection");
        Ok((stream, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(1600) && second <= Duration::from_millis(2400));

        for _ in 0..10 {
            let _ = backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped <= Duration::from_secs(36)); // 30s + 20%
        assert!(capped >= Duration::from_secs(24)); // 30s - 20%
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_listener_and_connector() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = Connector::new("127.0.0.1", port);
        let (client, server) = tokio::join!(connector.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is almost certainly closed.
        let connector = Connector::new("127.0.0.1", 1);
        let result = connector.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
