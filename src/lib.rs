//! WHIP video publisher
//!
//! Captures frames from a local camera and publishes them to a WebRTC media
//! server using WHIP signaling (HTTP POST of an SDP offer, SDP answer in the
//! response).

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod monitor;
pub mod session;
pub mod signaling;
pub mod track;
pub mod util;

pub use config::PublisherConfig;
pub use error::{PublisherError, Result};
pub use session::SessionController;
