//! Session descriptions
//!
//! Offers and answers are opaque text to this crate. They are produced and
//! consumed by the RTC engine and carried verbatim over signaling.

use std::fmt;

/// Local session description sent to the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpOffer(String);

/// Remote session description returned by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpAnswer(String);

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SdpOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SdpAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
