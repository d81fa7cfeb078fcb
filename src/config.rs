//! Publisher configuration
//!
//! A static value built once at startup (defaults, then an optional JSON
//! file, then command line overrides) and handed to the session controller.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{PublisherError, Result};

/// Capture device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index (`"0"`) or device path (`/dev/video0`)
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Mirror the picture left to right
    pub hflip: bool,
    /// Mirror the picture top to bottom
    pub vflip: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "0".to_string(),
            width: 640,
            height: 480,
            frame_rate: 20,
            hflip: false,
            vflip: false,
        }
    }
}

/// Location of the WHIP ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Stream name, e.g. the MediaMTX path
    pub endpoint: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8889,
            endpoint: "cam1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub camera: CameraConfig,
    pub server: ServerConfig,
    /// STUN/TURN urls handed to the RTC engine
    pub ice_servers: Vec<String>,
    /// Interval of the streaming keepalive loop
    pub poll_interval_ms: u64,
    /// How long ICE may stay disconnected before the session is given up
    pub ice_disconnect_grace_ms: u64,
    /// Timeout of the WHIP POST
    pub signaling_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            server: ServerConfig::default(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            poll_interval_ms: 1000,
            ice_disconnect_grace_ms: 5000,
            signaling_timeout_ms: 10_000,
        }
    }
}

impl PublisherConfig {
    /// Load a configuration file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path).map_err(|e| {
            PublisherError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PublisherError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(PublisherError::Config(format!(
                "Frame size must be non-zero, got {}x{}",
                camera.width, camera.height
            )));
        }
        // 4:2:0 chroma subsampling needs even dimensions
        if camera.width % 2 != 0 || camera.height % 2 != 0 {
            return Err(PublisherError::Config(format!(
                "Frame size must be even, got {}x{}",
                camera.width, camera.height
            )));
        }
        if !(1..=120).contains(&camera.frame_rate) {
            return Err(PublisherError::Config(format!(
                "Frame rate must be within 1..=120, got {}",
                camera.frame_rate
            )));
        }
        if camera.device.trim().is_empty() {
            return Err(PublisherError::Config("Camera device is empty".to_string()));
        }
        if self.server.host.trim().is_empty() {
            return Err(PublisherError::Config("Server host is empty".to_string()));
        }
        if self.server.endpoint.trim().is_empty() {
            return Err(PublisherError::Config("Stream endpoint is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(PublisherError::Config(
                "Poll interval must be non-zero".to_string(),
            ));
        }

        self.whip_url().map(|_| ())
    }

    /// `{scheme}://{host}:{port}/{endpoint}/whip`
    pub fn whip_url(&self) -> Result<Url> {
        let s = &self.server;
        let raw = format!(
            "{}://{}:{}/{}/whip",
            s.scheme,
            s.host,
            s.port,
            s.endpoint.trim_matches('/')
        );
        Url::parse(&raw).map_err(|e| PublisherError::Config(format!("Invalid WHIP url {}: {}", raw, e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ice_disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.ice_disconnect_grace_ms)
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PublisherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_whip_url() {
        let mut config = PublisherConfig::default();
        config.server.host = "media.example.com".to_string();
        config.server.port = 8889;
        config.server.endpoint = "/cam1/".to_string();

        let url = config.whip_url().unwrap();
        assert_eq!(url.as_str(), "http://media.example.com:8889/cam1/whip");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PublisherConfig::from_json(
            r#"{ "camera": { "width": 320, "height": 240, "frame_rate": 15 } }"#,
        )
        .unwrap();

        assert_eq!(config.camera.width, 320);
        assert_eq!(config.camera.height, 240);
        assert_eq!(config.camera.frame_rate, 15);
        assert_eq!(config.camera.device, "0");
        assert_eq!(config.server.port, 8889);
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[test]
    fn test_invalid_json() {
        let err = PublisherConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PublisherError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PublisherConfig::default();
        config.camera.width = 321;
        assert!(config.validate().is_err());

        let mut config = PublisherConfig::default();
        config.camera.frame_rate = 0;
        assert!(config.validate().is_err());

        let mut config = PublisherConfig::default();
        config.server.endpoint = String::new();
        assert!(config.validate().is_err());

        let mut config = PublisherConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
