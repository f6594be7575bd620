//! Broker connection lifecycle.
//!
//! The MQTT event loop reconnects on its own; this module tracks where the
//! worker stands so that resubscription happens on every CONNACK and startup
//! failures can be told apart from mid-session losses.
//!
//! ```text
//! Disconnected ──ConnectStarted──► Connecting ──ConnAck──► Connected ──SubAck──► Subscribed
//!      ▲                                                                            │
//!      └────────────────────────────── ConnectionLost (from any state) ─────────────┘
//! ```

use std::fmt;

use thiserror::Error;

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// CONNACK received, subscription requested but not acknowledged
    Connected,
    Subscribed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

/// Inputs that move the connection between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectStarted,
    ConnAck,
    SubAck,
    ConnectionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// Next state for `event`, or an error if `event` cannot happen here.
    pub fn on(self, event: ConnectionEvent) -> Result<Self, InvalidTransition> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, ConnectionLost) => Ok(Disconnected),
            (Disconnected, ConnectStarted) => Ok(Connecting),
            (Connecting | Disconnected, ConnAck) => Ok(Connected),
            (Connected | Subscribed, SubAck) => Ok(Subscribed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

/// Connection state plus the history the worker needs to decide on failures.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    connects: u64,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply `event`; on error the state is left unchanged.
    pub fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        let next = self.state.on(event)?;
        if event == ConnectionEvent::ConnAck {
            self.connects += 1;
        }
        self.state = next;
        Ok(next)
    }

    /// True once at least one CONNACK was received.
    pub fn has_connected(&self) -> bool {
        self.connects > 0
    }

    /// Number of CONNACKs after the first one.
    pub fn reconnections(&self) -> u64 {
        self.connects.saturating_sub(1)
    }
}
