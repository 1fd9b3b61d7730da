//! Connection state machine
//!
//! Pure bookkeeping for the transport's lifecycle: no timers, no I/O. The
//! transport feeds it events with the current `Instant` and acts on what it
//! returns, which keeps the retry and heartbeat policy testable with any
//! clock.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// What the transport should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then open again
    Reconnect { attempt: u32, delay: Duration },
    /// Attempts exhausted; disconnect for good
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    reconnect_interval: Duration,
    heartbeat_interval: Duration,
    last_inbound: Option<Instant>,
    exhausted: bool,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32, reconnect_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            reconnect_interval,
            heartbeat_interval,
            last_inbound: None,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// A connection is open or on its way
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Error
                | ConnectionState::Reconnecting
        )
    }

    /// Begin an explicit connect. False if one is already active or the
    /// machine has given up.
    pub fn begin_connect(&mut self) -> bool {
        if self.exhausted || self.is_active() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.attempts = 0;
        true
    }

    /// Reconnect delay elapsed; opening again
    pub fn begin_reconnect(&mut self) {
        if self.state == ConnectionState::Reconnecting {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Receive channel opened
    pub fn on_open(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_inbound = Some(now);
    }

    /// Any inbound event
    pub fn on_event(&mut self, now: Instant) {
        self.last_inbound = Some(now);
    }

    /// Receive channel closed, errored, or failed to open
    pub fn on_close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Error;
        }
    }

    /// Heartbeat. Returns true when the channel has gone stale, in which
    /// case the machine has already moved to `Error` via `on_timeout`.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        match self.silence(now) {
            Some(silent) if silent > self.heartbeat_interval * 2 => {
                self.on_timeout();
                true
            }
            _ => false,
        }
    }

    /// Stale channel; same path as a closure
    pub fn on_timeout(&mut self) {
        self.on_close();
    }

    /// Time since the last inbound event
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_inbound.map(|last| now.saturating_duration_since(last))
    }

    /// Decide what follows an `Error`
    pub fn next_retry(&mut self) -> RetryDecision {
        if self.attempts >= self.max_attempts {
            self.state = ConnectionState::Disconnected;
            self.exhausted = true;
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        RetryDecision::Reconnect {
            attempt: self.attempts,
            delay: self.reconnect_interval,
        }
    }

    /// Explicit or terminal disconnect
    pub fn on_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.last_inbound = None;
    }
}
