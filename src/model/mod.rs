//! Data models for the publisher pipeline
//!
//! This module contains the core data structures passed between the capture
//! side, the track driver, the RTC engine and the session controller.

pub mod frame;
pub mod sdp;
pub mod state;
