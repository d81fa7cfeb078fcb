//! Publisher session lifecycle
//!
//! The [`SessionController`] is the only owner of [`SessionState`]. It opens
//! the camera, builds the peer session, runs the WHIP exchange, keeps the
//! stream alive and tears everything down in reverse order of acquisition.
//! Every way out of the session (signaling error, engine failure, remote
//! close, external stop) goes through the same Closing step.
//!
//! ```text
//! Idle -> Negotiating -> AwaitingAnswer -> Streaming
//!             |               |               |
//!             +---------------+---------------+--> Closing -> Closed
//! ```

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::FrameSource;
use crate::config::{CameraConfig, PublisherConfig};
use crate::engine::{PeerSession, RtcEngine};
use crate::error::{PublisherError, Result};
use crate::model::state::{SessionEnd, SessionState};
use crate::monitor::{ConnectionMonitor, Verdict};
use crate::signaling::Signaling;
use crate::track::{SharedTrack, TrackDriver};

pub struct SessionController<E: RtcEngine, S: Signaling> {
    config: PublisherConfig,
    engine: E,
    signaling: S,
    state: watch::Sender<SessionState>,
    history: Vec<SessionState>,
}

impl<E: RtcEngine, S: Signaling> SessionController<E, S> {
    pub fn new(config: PublisherConfig, engine: E, signaling: S) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            engine,
            signaling,
            state,
            history: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions from outside the controller.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        let prev = self.state();
        if prev == next {
            return;
        }
        info!("Session: {} -> {}", prev, next);
        self.history.push(next);
        self.state.send_replace(next);
    }

    /// Run one publishing session to completion.
    ///
    /// `open_source` opens the camera; if it fails the session never leaves
    /// Idle. Otherwise the controller always ends in Closed, with the track
    /// stopped before the peer session is closed. `stop` is the external
    /// stop signal.
    pub async fn run<F>(&mut self, open_source: F, stop: CancellationToken) -> Result<SessionEnd>
    where
        F: FnOnce(&CameraConfig) -> Result<Box<dyn FrameSource>>,
    {
        if self.state() != SessionState::Idle {
            return Err(PublisherError::AlreadyStarted);
        }

        let source = match open_source(&self.config.camera) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open camera: {}", e);
                return Err(e);
            }
        };
        let track = TrackDriver::new(source, &self.config.camera).shared();

        self.transition(SessionState::Negotiating);

        let mut peer = None;
        let outcome = self.negotiate_and_stream(&track, &mut peer, &stop).await;

        self.transition(SessionState::Closing);
        Self::teardown(&track, peer).await;
        self.transition(SessionState::Closed);

        match &outcome {
            Ok(SessionEnd::Stopped) => info!("Stream ended: stopped"),
            Ok(SessionEnd::RemoteClosed) => info!("Stream ended: connection closed"),
            Err(e) => error!("Publishing failed: {}", e),
        }

        outcome
    }

    async fn negotiate_and_stream(
        &mut self,
        track: &SharedTrack,
        peer: &mut Option<E::Session>,
        stop: &CancellationToken,
    ) -> Result<SessionEnd> {
        info!("Preparing WebRTC connection");
        let session = peer.insert(self.engine.create_session(&self.config).await?);

        session.attach_track(track.clone())?;
        track.lock().await.start();

        let events = session
            .take_events()
            .ok_or_else(|| PublisherError::EngineFailure("Event stream unavailable".into()))?;
        let mut monitor = ConnectionMonitor::new(events, self.config.ice_disconnect_grace());

        let offer = session.create_offer().await?;
        let endpoint = self.config.whip_url()?;

        self.transition(SessionState::AwaitingAnswer);

        let answer = tokio::select! {
            _ = stop.cancelled() => {
                info!("Stop requested while waiting for answer");
                return Ok(SessionEnd::Stopped);
            }
            answer = self.signaling.exchange(&offer, &endpoint) => answer?,
        };

        session.apply_answer(&answer).await?;
        info!("🎉 WebRTC handshake completed");

        self.transition(SessionState::Streaming);
        info!("Streaming started. Press Ctrl+C to stop.");

        self.keepalive(&mut monitor, stop).await
    }

    /// Wait until the monitor reports the connection over or a stop arrives.
    async fn keepalive(
        &self,
        monitor: &mut ConnectionMonitor,
        stop: &CancellationToken,
    ) -> Result<SessionEnd> {
        let mut ticker = tokio::time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Stop requested");
                    return Ok(SessionEnd::Stopped);
                }
                _ = ticker.tick() => {
                    match monitor.poll() {
                        None => {}
                        Some(Verdict::Closed) => return Ok(SessionEnd::RemoteClosed),
                        Some(Verdict::Failed) => {
                            return Err(PublisherError::EngineFailure("connection failed".into()))
                        }
                        Some(Verdict::IceLost) => {
                            return Err(PublisherError::EngineFailure("ICE connection lost".into()))
                        }
                    }
                }
            }
        }
    }

    /// Stop the track first, then release the peer session.
    async fn teardown(track: &SharedTrack, peer: Option<E::Session>) {
        track.lock().await.stop();

        match peer {
            Some(mut session) => session.close().await,
            None => warn!("No peer session to close"),
        }
    }
}
