/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Heartbeat and TestRequest liveness monitoring.
//!
//! The monitor tracks activity in both directions against the negotiated
//! HeartBtInt (tag 108). Escalation ladder:
//!
//! 1. Nothing sent for `HeartBtInt` → emit a Heartbeat.
//! 2. Nothing received for `HeartBtInt + rtt` → emit a TestRequest with a
//!    unique TestReqID and retain it for correlation.
//! 3. TestRequest unanswered for another `HeartBtInt + rtt` → the peer is
//!    dead; the engine raises a network error.
//!
//! `rtt` is the reasonable transmission time, 20% of the interval.

use std::time::{Duration, Instant};

/// Liveness monitor for one session.
///
/// Timers only advance while the session is Active; the engine calls
/// [`reset`](HeartbeatMonitor::reset) on every logon.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// Negotiated heartbeat interval.
    interval: Duration,
    /// Reasonable transmission time (20% of the interval).
    transmission_time: Duration,
    /// Time of the last outbound transmission.
    last_sent: Instant,
    /// Time of the last inbound message.
    last_received: Instant,
    /// Outstanding TestRequest: id and the time it was issued.
    outstanding: Option<(String, Instant)>,
}

impl HeartbeatMonitor {
    /// Creates a monitor for the given heartbeat interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            transmission_time: interval / 5,
            last_sent: now,
            last_received: now,
            outstanding: None,
        }
    }

    /// Returns the heartbeat interval.
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Replaces the interval with the value negotiated at Logon.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.transmission_time = interval / 5;
    }

    /// Records an outbound transmission of any kind.
    #[inline]
    pub fn on_message_sent(&mut self) {
        self.last_sent = Instant::now();
    }

    /// Records an inbound message of any kind.
    #[inline]
    pub fn on_message_received(&mut self) {
        self.last_received = Instant::now();
    }

    /// Records an inbound Heartbeat carrying a TestReqID (tag 112).
    ///
    /// Clears the outstanding TestRequest when the id matches. Heartbeats
    /// without tag 112 only refresh the inbound clock via
    /// [`on_message_received`](HeartbeatMonitor::on_message_received).
    pub fn on_heartbeat_with_id(&mut self, test_req_id: &str) {
        if let Some((pending, _)) = &self.outstanding {
            if pending == test_req_id {
                self.outstanding = None;
            }
        }
    }

    /// Records that a TestRequest was sent with the given id.
    pub fn on_test_request_sent(&mut self, test_req_id: String) {
        let now = Instant::now();
        self.outstanding = Some((test_req_id, now));
        self.last_sent = now;
    }

    /// The outstanding TestReqID, if any.
    #[must_use]
    pub fn outstanding_test_req_id(&self) -> Option<&str> {
        self.outstanding.as_ref().map(|(id, _)| id.as_str())
    }

    /// True when the outbound side has been idle for a full interval.
    #[must_use]
    pub fn heartbeat_due(&self) -> bool {
        self.last_sent.elapsed() >= self.interval
    }

    /// True when the inbound side has been silent long enough to warrant a
    /// TestRequest challenge.
    #[must_use]
    pub fn test_request_due(&self) -> bool {
        self.outstanding.is_none()
            && self.last_received.elapsed() >= self.interval + self.transmission_time
    }

    /// True when the outstanding TestRequest has gone unanswered past the
    /// allowance and the peer must be considered dead.
    #[must_use]
    pub fn peer_dead(&self) -> bool {
        match &self.outstanding {
            Some((_, issued_at)) => {
                issued_at.elapsed() >= self.interval + self.transmission_time
            }
            None => false,
        }
    }

    /// Time since the last inbound message.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_received.elapsed()
    }

    /// Resets both activity clocks and drops any outstanding TestRequest.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.last_sent = now;
        self.last_received = now;
        self.outstanding = None;
    }
}

/// Generates a unique TestReqID from the current wall-clock nanoseconds.
#[must_use]
pub fn generate_test_req_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("TEST{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_new_monitor_is_quiet() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        assert!(!monitor.heartbeat_due());
        assert!(!monitor.test_request_due());
        assert!(!monitor.peer_dead());
        assert!(monitor.outstanding_test_req_id().is_none());
    }

    #[test]
    fn test_heartbeat_due_after_idle() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(20));
        sleep(Duration::from_millis(25));
        assert!(monitor.heartbeat_due());

        monitor.on_message_sent();
        assert!(!monitor.heartbeat_due());
    }

    #[test]
    fn test_test_request_due_after_silence() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(20));
        // interval + 20% = 24ms
        sleep(Duration::from_millis(30));
        assert!(monitor.test_request_due());

        monitor.on_message_received();
        assert!(!monitor.test_request_due());
    }

    #[test]
    fn test_no_second_test_request_while_outstanding() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(10));
        sleep(Duration::from_millis(15));
        assert!(monitor.test_request_due());

        monitor.on_test_request_sent("TEST1".to_string());
        assert!(!monitor.test_request_due());
        assert_eq!(monitor.outstanding_test_req_id(), Some("TEST1"));
    }

    #[test]
    fn test_matching_heartbeat_clears_outstanding() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        monitor.on_test_request_sent("TEST42".to_string());

        monitor.on_heartbeat_with_id("OTHER");
        assert_eq!(monitor.outstanding_test_req_id(), Some("TEST42"));

        monitor.on_heartbeat_with_id("TEST42");
        assert!(monitor.outstanding_test_req_id().is_none());
    }

    #[test]
    fn test_peer_dead_after_unanswered_challenge() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(10));
        monitor.on_test_request_sent("TEST1".to_string());
        assert!(!monitor.peer_dead());

        // interval + 20% = 12ms
        sleep(Duration::from_millis(15));
        assert!(monitor.peer_dead());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(10));
        monitor.on_test_request_sent("TEST1".to_string());
        sleep(Duration::from_millis(15));

        monitor.reset();
        assert!(!monitor.heartbeat_due());
        assert!(!monitor.peer_dead());
        assert!(monitor.outstanding_test_req_id().is_none());
    }

    #[test]
    fn test_negotiated_interval_replaces_configured() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        monitor.set_interval(Duration::from_secs(60));
        assert_eq!(monitor.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_generated_ids_have_prefix() {
        let id = generate_test_req_id();
        assert!(id.starts_with("TEST"));
        assert!(id.len() > 4);
    }
}
