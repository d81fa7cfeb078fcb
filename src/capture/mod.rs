//! Frame capture
//!
//! A [`FrameSource`] pulls one frame at a time from a camera. It knows
//! nothing about timestamps or signaling; the track driver owns it and
//! decides what to do when a capture fails.

pub mod convert;
#[cfg(target_os = "linux")]
pub mod v4l2;

use crate::config::CameraConfig;
use crate::error::{PublisherError, Result};
use crate::model::frame::{Frame, PixelFormat};

#[cfg(target_os = "linux")]
pub use v4l2::V4l2FrameSource;

/// A device that produces frames on demand.
///
/// Implementations are opened by their constructor and hold the device
/// exclusively until [`close`](FrameSource::close) or drop.
pub trait FrameSource: Send {
    /// Read the next frame. May block on device I/O.
    ///
    /// Errors are reported as [`PublisherError::CaptureFailed`](crate::error::PublisherError::CaptureFailed).
    fn capture(&mut self) -> Result<Frame>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);
}

/// Open the default capture device for this platform.
#[cfg(target_os = "linux")]
pub fn open_default(camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2FrameSource::open(camera)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open_default(camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(PublisherError::DeviceUnavailable {
        device: camera.device.clone(),
        reason: "no capture backend for this platform".to_string(),
    })
}

/// Check what a device agreed to against what was configured.
///
/// Frames of any other size would be rejected by the track, so a device
/// that picks its own size is unusable. `stride` is the distance between
/// rows of the first plane and must hold at least one packed row.
pub fn check_negotiated(
    camera: &CameraConfig,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
) -> Result<()> {
    if width != camera.width || height != camera.height {
        return Err(PublisherError::DeviceUnavailable {
            device: camera.device.clone(),
            reason: format!(
                "requested {}x{}, device offers {}x{}",
                camera.width, camera.height, width, height
            ),
        });
    }

    let row = format.row_len(width);
    if stride != 0 && stride < row {
        return Err(PublisherError::DeviceUnavailable {
            device: camera.device.clone(),
            reason: format!("row stride {} is shorter than {} bytes", stride, row),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraConfig {
        CameraConfig {
            width: 640,
            height: 480,
            ..Default::default()
        }
    }

    #[test]
    fn test_negotiated_size_must_match() {
        let err = check_negotiated(&camera(), 800, 600, PixelFormat::Yuyv, 1600).unwrap_err();
        match err {
            PublisherError::DeviceUnavailable { device, reason } => {
                assert_eq!(device, "0");
                assert!(reason.contains("800x600"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negotiated_stride() {
        assert!(check_negotiated(&camera(), 640, 480, PixelFormat::Yuyv, 1280).is_ok());
        // Padded rows are fine, they are packed on capture
        assert!(check_negotiated(&camera(), 640, 480, PixelFormat::Yuyv, 1536).is_ok());
        // Drivers may leave the stride unset
        assert!(check_negotiated(&camera(), 640, 480, PixelFormat::Rgb24, 0).is_ok());
        assert!(check_negotiated(&camera(), 640, 480, PixelFormat::Rgb24, 1280).is_err());
    }
}
