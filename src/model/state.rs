//! Lifecycle states
//!
//! State enums for the track, the engine connection and the publisher
//! session itself.

use std::fmt;

/// Lifecycle of a [`TrackDriver`](crate::track::TrackDriver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Constructed, no sample produced yet
    Created,
    /// Producing samples
    Started,
    /// Source released. Terminal.
    Stopped,
}

/// Peer connection state as reported by the RTC engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Failed and Closed end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// ICE transport state as reported by the RTC engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
}

/// Lifecycle of a publisher session. Owned by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    AwaitingAnswer,
    Streaming,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::AwaitingAnswer => "awaiting-answer",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// External stop signal
    Stopped,
    /// The engine reported the connection closed
    RemoteClosed,
}
