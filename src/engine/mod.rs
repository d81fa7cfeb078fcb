//! RTC engine seam
//!
//! The session controller only talks to the engine through these traits:
//! create a peer session, attach the video track, produce an offer, apply
//! the answer, report state changes, close. ICE, DTLS, SRTP, encoding and
//! packetization all live behind them.

pub mod encoder;
pub mod rtc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::PublisherConfig;
use crate::error::Result;
use crate::model::sdp::{SdpAnswer, SdpOffer};
use crate::model::state::{ConnectionState, IceState};
use crate::track::SharedTrack;

pub use rtc::{Str0mEngine, Str0mSession};

/// State change notifications emitted by a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Connection(ConnectionState),
    Ice(IceState),
}

/// Factory for peer sessions.
#[allow(async_fn_in_trait)]
pub trait RtcEngine {
    type Session: PeerSession;

    /// Create a peer session using the configured ICE servers.
    async fn create_session(&self, config: &PublisherConfig) -> Result<Self::Session>;
}

/// One end of a WebRTC connection.
#[allow(async_fn_in_trait)]
pub trait PeerSession {
    /// Attach the outgoing video track. The engine pulls samples from it.
    fn attach_track(&mut self, track: SharedTrack) -> Result<()>;

    async fn create_offer(&mut self) -> Result<SdpOffer>;

    async fn apply_answer(&mut self, answer: &SdpAnswer) -> Result<()>;

    /// Take the state change stream. Returns `None` once taken.
    fn take_events(&mut self) -> Option<UnboundedReceiver<PeerEvent>>;

    /// Release all engine resources. Calling it again is a no-op.
    async fn close(&mut self);
}
