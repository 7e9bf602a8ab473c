//! Connection lifecycle and keep-alive state.
//!
//! Key requirements:
//! - [MQTT-3.1.2-23] With a non-zero keep-alive, the client must send a
//!   PINGREQ if no other control packet goes out within the interval.
//! - Section 3.1.2.10: a client that gets no PINGRESP "within a
//!   reasonable amount of time" should close the connection. Here that
//!   window is half the keep-alive interval, so a silent broker is
//!   declared dead 1.5 intervals after the last outbound packet.
//!
//! The session never does I/O and never reads the clock. Callers pass
//! `now` into every time-dependent method, which keeps the schedule
//! deterministic under test.

use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// DISCONNECT queued, transport close pending.
    Disconnecting,
}

/// What the session wants done after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// The keep-alive interval passed without outbound traffic; send a
    /// PINGREQ now.
    SendPing,
    /// No PINGRESP inside the grace window; the connection is dead.
    KeepAliveExpired,
    /// CONNACK did not arrive within the connect timeout.
    ConnectTimedOut,
}

/// Tracks where the connection is in its lifecycle and when keep-alive
/// traffic is due.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    /// Zero disables keep-alive tracking entirely.
    keep_alive: Duration,
    connect_timeout: Duration,
    /// Set while Connecting.
    connect_deadline: Option<Instant>,
    /// When the last control packet was queued for the broker.
    last_outbound: Option<Instant>,
    /// Set after SendPing until the PINGRESP arrives.
    ping_deadline: Option<Instant>,
}

impl Session {
    pub fn new(keep_alive_secs: u16, connect_timeout: Duration) -> Self {
        Self {
            state: SessionState::Disconnected,
            keep_alive: Duration::from_secs(u64::from(keep_alive_secs)),
            connect_timeout,
            connect_deadline: None,
            last_outbound: None,
            ping_deadline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter Connecting and arm the CONNACK deadline.
    pub fn begin_connect(&mut self, now: Instant) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(ClientError::InvalidState(format!(
                "cannot connect while {:?}",
                self.state
            )));
        }
        self.state = SessionState::Connecting;
        self.connect_deadline = Some(now + self.connect_timeout);
        self.last_outbound = Some(now);
        self.ping_deadline = None;
        Ok(())
    }

    /// CONNACK accepted: the connection is up.
    pub fn on_connack_accepted(&mut self, now: Instant) {
        self.state = SessionState::Connected;
        self.connect_deadline = None;
        if self.last_outbound.is_none() {
            self.last_outbound = Some(now);
        }
    }

    /// CONNACK carried a non-zero return code.
    pub fn on_connack_refused(&mut self) {
        self.state = SessionState::Disconnected;
        self.clear_timers();
    }

    /// Enter Disconnecting ahead of a graceful DISCONNECT.
    pub fn begin_disconnect(&mut self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(ClientError::InvalidState(format!(
                "cannot disconnect while {:?}",
                self.state
            )));
        }
        self.state = SessionState::Disconnecting;
        Ok(())
    }

    /// The transport is gone, however that happened.
    pub fn on_closed(&mut self) {
        self.state = SessionState::Disconnected;
        self.clear_timers();
    }

    /// Record that a control packet was queued. Outbound traffic of any
    /// kind defers the next PINGREQ.
    pub fn note_outbound(&mut self, now: Instant) {
        self.last_outbound = Some(now);
    }

    /// The broker answered our PINGREQ.
    pub fn on_pingresp(&mut self) {
        self.ping_deadline = None;
    }

    /// Advance time-driven state. Returns at most one action; the
    /// caller performs it and ticks again on the next poll pass.
    pub fn tick(&mut self, now: Instant) -> Option<SessionAction> {
        match self.state {
            SessionState::Connecting => {
                if self.connect_deadline.is_some_and(|d| now >= d) {
                    return Some(SessionAction::ConnectTimedOut);
                }
            }
            SessionState::Connected if !self.keep_alive.is_zero() => {
                if let Some(deadline) = self.ping_deadline {
                    if now >= deadline {
                        return Some(SessionAction::KeepAliveExpired);
                    }
                } else if let Some(last) = self.last_outbound {
                    if now >= last + self.keep_alive {
                        self.ping_deadline = Some(now + self.keep_alive / 2);
                        return Some(SessionAction::SendPing);
                    }
                }
            }
            _ => {}
        }
        None
    }

    /// Earliest instant at which `tick` would do something. Poll waits
    /// are capped to this so deadlines cannot be slept through.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Connecting => self.connect_deadline,
            SessionState::Connected if !self.keep_alive.is_zero() => self
                .ping_deadline
                .or_else(|| self.last_outbound.map(|last| last + self.keep_alive)),
            _ => None,
        }
    }

    fn clear_timers(&mut self) {
        self.connect_deadline = None;
        self.last_outbound = None;
        self.ping_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_at(t0: Instant, keep_alive_secs: u16) -> Session {
        let mut session = Session::new(keep_alive_secs, Duration::from_secs(10));
        session.begin_connect(t0).unwrap();
        session.on_connack_accepted(t0);
        session
    }

    #[test]
    fn test_ping_then_expiry_schedule() {
        let t0 = Instant::now();
        let mut session = connected_at(t0, 60);

        assert_eq!(session.tick(t0 + Duration::from_secs(59)), None);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(60)),
            Some(SessionAction::SendPing)
        );
        // The queued PINGREQ counts as outbound traffic.
        session.note_outbound(t0 + Duration::from_secs(60));

        // Grace window is keep_alive / 2: expiry lands at t=90.
        assert_eq!(session.tick(t0 + Duration::from_secs(89)), None);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(90)),
            Some(SessionAction::KeepAliveExpired)
        );
    }

    #[test]
    fn test_pingresp_restarts_the_cycle() {
        let t0 = Instant::now();
        let mut session = connected_at(t0, 60);

        assert_eq!(
            session.tick(t0 + Duration::from_secs(60)),
            Some(SessionAction::SendPing)
        );
        session.note_outbound(t0 + Duration::from_secs(60));
        session.on_pingresp();

        assert_eq!(session.tick(t0 + Duration::from_secs(90)), None);
        assert_eq!(session.tick(t0 + Duration::from_secs(119)), None);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(120)),
            Some(SessionAction::SendPing)
        );
    }

    #[test]
    fn test_outbound_traffic_defers_ping() {
        let t0 = Instant::now();
        let mut session = connected_at(t0, 60);

        session.note_outbound(t0 + Duration::from_secs(50));
        assert_eq!(session.tick(t0 + Duration::from_secs(60)), None);
        assert_eq!(session.tick(t0 + Duration::from_secs(109)), None);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(110)),
            Some(SessionAction::SendPing)
        );
    }

    #[test]
    fn test_zero_keep_alive_disables_pings() {
        let t0 = Instant::now();
        let mut session = connected_at(t0, 0);

        assert_eq!(session.tick(t0 + Duration::from_secs(3600)), None);
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_connect_timeout() {
        let t0 = Instant::now();
        let mut session = Session::new(60, Duration::from_secs(10));
        session.begin_connect(t0).unwrap();

        assert_eq!(session.tick(t0 + Duration::from_secs(9)), None);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(10)),
            Some(SessionAction::ConnectTimedOut)
        );
    }

    #[test]
    fn test_state_transitions_enforced() {
        let t0 = Instant::now();
        let mut session = Session::new(60, Duration::from_secs(10));

        assert!(session.begin_disconnect().is_err());
        session.begin_connect(t0).unwrap();
        assert!(session.begin_connect(t0).is_err());
        assert!(session.begin_disconnect().is_err());

        session.on_connack_accepted(t0);
        assert_eq!(session.state(), SessionState::Connected);
        session.begin_disconnect().unwrap();
        assert_eq!(session.state(), SessionState::Disconnecting);

        session.on_closed();
        assert_eq!(session.state(), SessionState::Disconnected);
        // A fresh connect is allowed after the close.
        assert!(session.begin_connect(t0).is_ok());
    }

    #[test]
    fn test_next_deadline_tracks_the_nearest_timer() {
        let t0 = Instant::now();
        let mut session = Session::new(60, Duration::from_secs(10));

        session.begin_connect(t0).unwrap();
        assert_eq!(session.next_deadline(), Some(t0 + Duration::from_secs(10)));

        session.on_connack_accepted(t0);
        assert_eq!(session.next_deadline(), Some(t0 + Duration::from_secs(60)));

        session.tick(t0 + Duration::from_secs(60));
        assert_eq!(session.next_deadline(), Some(t0 + Duration::from_secs(90)));
    }
}
