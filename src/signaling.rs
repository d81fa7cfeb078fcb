//! WHIP signaling
//!
//! One HTTP POST per session: the local offer goes out as
//! `application/sdp`, the answer comes back in the response body.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

use crate::error::{PublisherError, Result};
use crate::model::sdp::{SdpAnswer, SdpOffer};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Offer/answer exchange with an ingestion endpoint.
#[allow(async_fn_in_trait)]
pub trait Signaling {
    async fn exchange(&self, offer: &SdpOffer, endpoint: &Url) -> Result<SdpAnswer>;
}

/// Map a WHIP response to an answer or a rejection.
///
/// 201 Created is the WHIP success status; 200 OK is accepted as well.
pub fn classify_response(status: StatusCode, body: String) -> Result<SdpAnswer> {
    if status == StatusCode::CREATED || status == StatusCode::OK {
        Ok(SdpAnswer::new(body))
    } else {
        Err(PublisherError::SignalingRejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Stateless WHIP client over `reqwest`.
#[derive(Debug, Clone)]
pub struct WhipClient {
    http: reqwest::Client,
}

impl WhipClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

impl Signaling for WhipClient {
    async fn exchange(&self, offer: &SdpOffer, endpoint: &Url) -> Result<SdpAnswer> {
        info!("📤 Sending offer to {}", endpoint);
        debug!("Offer SDP:\n{}", offer);

        let response = self
            .http
            .post(endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.as_str().to_owned())
            .send()
            .await?;

        let status = response.status();
        info!("WHIP response status: {}", status);

        if let Some(location) = response.headers().get(LOCATION) {
            debug!("WHIP resource: {:?}", location);
        }

        let body = response.text().await?;
        let result = classify_response(status, body);

        match &result {
            Ok(answer) => debug!("📥 Answer SDP:\n{}", answer),
            Err(e) => warn!("WHIP request failed: {}", e),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_is_success() {
        let answer = classify_response(StatusCode::CREATED, "v=0\r\n".to_string()).unwrap();
        assert_eq!(answer.as_str(), "v=0\r\n");
    }

    #[test]
    fn test_ok_is_success() {
        assert!(classify_response(StatusCode::OK, "v=0\r\n".to_string()).is_ok());
    }

    #[test]
    fn test_other_status_is_rejection() {
        let err = classify_response(StatusCode::BAD_REQUEST, "bad offer".to_string()).unwrap_err();
        match err {
            PublisherError::SignalingRejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad offer");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(classify_response(StatusCode::NO_CONTENT, String::new()).is_err());
    }
}
