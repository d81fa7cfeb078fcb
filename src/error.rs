//! Error taxonomy for the publisher pipeline
//!
//! Per-frame capture errors never leave the track driver. Everything else
//! surfaces to the session controller, which is the only place that decides
//! to tear the session down.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublisherError {
    /// The capture device could not be opened or configured.
    #[error("Device unavailable [{device}]: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// A single frame could not be read from the device.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// The WHIP endpoint answered with a non-success status.
    #[error("Signaling rejected (HTTP {status}): {body}")]
    SignalingRejected { status: u16, body: String },

    /// Network-level failure talking to the WHIP endpoint.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The RTC engine failed or reported a terminal connection state.
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A session controller drives exactly one session.
    #[error("Session already started")]
    AlreadyStarted,
}

impl From<reqwest::Error> for PublisherError {
    fn from(e: reqwest::Error) -> Self {
        PublisherError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PublisherError>;
