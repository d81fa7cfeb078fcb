//! Connection monitor
//!
//! Turns the engine's state-change stream into logged transitions and, when
//! the connection is over, a verdict for the session controller. It never
//! touches the engine or the session itself.

use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::engine::PeerEvent;
use crate::model::state::{ConnectionState, IceState};

/// Why the monitor wants the session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The engine reported the connection closed.
    Closed,
    /// The engine reported the connection failed.
    Failed,
    /// ICE stayed disconnected for longer than the grace period.
    IceLost,
}

pub struct ConnectionMonitor {
    events: UnboundedReceiver<PeerEvent>,
    connection: ConnectionState,
    ice: IceState,
    ice_disconnected_since: Option<Instant>,
    ice_grace: Duration,
    verdict: Option<Verdict>,
}

impl ConnectionMonitor {
    pub fn new(events: UnboundedReceiver<PeerEvent>, ice_grace: Duration) -> Self {
        Self {
            events,
            connection: ConnectionState::New,
            ice: IceState::New,
            ice_disconnected_since: None,
            ice_grace,
            verdict: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn ice_state(&self) -> IceState {
        self.ice
    }

    /// Drain pending notifications and report whether the session is over.
    ///
    /// Once a verdict is reached it is returned on every later call.
    pub fn poll(&mut self) -> Option<Verdict> {
        if self.verdict.is_some() {
            return self.verdict;
        }

        loop {
            match self.events.try_recv() {
                Ok(event) => self.observe(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // The engine went away without saying goodbye
                    if !self.connection.is_terminal() {
                        warn!("Engine event stream ended");
                        self.observe(PeerEvent::Connection(ConnectionState::Closed));
                    }
                    break;
                }
            }
            if self.verdict.is_some() {
                return self.verdict;
            }
        }

        if let Some(since) = self.ice_disconnected_since {
            if since.elapsed() >= self.ice_grace {
                error!(
                    "ICE disconnected for more than {:?}, giving up",
                    self.ice_grace
                );
                self.verdict = Some(Verdict::IceLost);
            }
        }

        self.verdict
    }

    fn observe(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connection(state) => {
                if state == self.connection {
                    return;
                }
                info!("[WebRTC] Connection state: {:?} -> {:?}", self.connection, state);
                self.connection = state;

                match state {
                    ConnectionState::Connected => info!("✅ WebRTC fully connected"),
                    ConnectionState::Failed => {
                        error!("❌ WebRTC connection failed");
                        self.verdict = Some(Verdict::Failed);
                    }
                    ConnectionState::Closed => self.verdict = Some(Verdict::Closed),
                    _ => {}
                }
            }
            PeerEvent::Ice(state) => {
                if state == self.ice {
                    return;
                }
                info!("🔌 ICE state: {:?} -> {:?}", self.ice, state);
                self.ice = state;

                if state == IceState::Disconnected {
                    self.ice_disconnected_since.get_or_insert_with(Instant::now);
                } else {
                    self.ice_disconnected_since = None;
                }
            }
        }
    }
}
