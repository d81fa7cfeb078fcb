//! V4L2 capture device
//!
//! Opens a `/dev/videoN` node, negotiates size, layout and frame rate, and
//! reads frames through memory-mapped streaming buffers.

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

use super::convert::pack_rows;
use super::{check_negotiated, FrameSource};
use crate::config::CameraConfig;
use crate::error::{PublisherError, Result};
use crate::model::frame::{Frame, PixelFormat};

const BUFFER_COUNT: u32 = 4;

/// Layouts we ask the driver for, in order of preference.
const PREFERRED: [(&[u8; 4], PixelFormat); 4] = [
    (b"YUYV", PixelFormat::Yuyv),
    (b"YU12", PixelFormat::I420),
    (b"RGB3", PixelFormat::Rgb24),
    (b"BGR3", PixelFormat::Bgr24),
];

pub struct V4l2FrameSource {
    device_name: String,
    // Field order matters: the stream must be dropped before the device.
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Bytes between rows of the first plane
    stride: usize,
}

impl V4l2FrameSource {
    /// Open and configure the camera described by `camera`.
    pub fn open(camera: &CameraConfig) -> Result<Self> {
        let name = camera.device.clone();
        let unavailable = |reason: String| PublisherError::DeviceUnavailable {
            device: name.clone(),
            reason,
        };

        info!("Opening V4L2 device: {}", name);

        let device = match name.parse::<usize>() {
            Ok(index) => Device::new(index),
            Err(_) => Device::with_path(&name),
        }
        .map_err(|e| unavailable(format!("open failed: {}", e)))?;

        let mut fmt = device
            .format()
            .map_err(|e| unavailable(format!("failed to query format: {}", e)))?;

        let mut negotiated = None;
        for (fourcc, layout) in PREFERRED {
            fmt.width = camera.width;
            fmt.height = camera.height;
            fmt.fourcc = FourCC::new(fourcc);

            match device.set_format(&fmt) {
                Ok(actual) if actual.fourcc == FourCC::new(fourcc) => {
                    negotiated = Some((actual, layout));
                    break;
                }
                Ok(actual) => debug!("{} refused {:?}, offered {}", name, layout, actual.fourcc),
                Err(e) => debug!("{} failed to set {:?}: {}", name, layout, e),
            }
        }

        let Some((actual, format)) = negotiated else {
            return Err(unavailable("no supported pixel format".to_string()));
        };

        let stride = actual.stride as usize;
        if let Err(e) = check_negotiated(camera, actual.width, actual.height, format, stride) {
            warn!("{}", e);
            return Err(e);
        }
        if stride > format.row_len(actual.width) {
            debug!("{} pads rows to {} bytes", name, stride);
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(camera.frame_rate)) {
            // Cadence is best-effort
            warn!("Failed to set {} fps on {}: {}", camera.frame_rate, name, e);
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| unavailable(format!("failed to start streaming: {}", e)))?;

        info!(
            "Camera opened {}x{}@{}fps ({:?})",
            actual.width, actual.height, camera.frame_rate, format
        );

        Ok(Self {
            device_name: name,
            stream: Some(stream),
            device: Some(device),
            width: actual.width,
            height: actual.height,
            format,
            stride,
        })
    }
}

impl FrameSource for V4l2FrameSource {
    fn capture(&mut self) -> Result<Frame> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PublisherError::CaptureFailed(format!(
                "{} is closed",
                self.device_name
            )));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| PublisherError::CaptureFailed(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = pack_rows(&buf[..used], self.format, self.width, self.height, self.stride)
            .ok_or_else(|| {
                PublisherError::CaptureFailed(format!(
                    "short frame of {} bytes from {}",
                    used, self.device_name
                ))
            })?;

        Ok(Frame::new(data, self.width, self.height, self.format))
    }

    fn close(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.stream = None;
        self.device = None;
        info!("V4L2 capture stopped: {}", self.device_name);
    }
}

impl Drop for V4l2FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
