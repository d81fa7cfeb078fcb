//! Video frames and media samples
//!
//! A [`Frame`] is what a capture device produces. The track driver turns it
//! into a [`MediaSample`] by attaching a presentation timestamp.

use chrono::{DateTime, Utc};

/// RTP video clock rate.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Memory layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb24,
    /// Packed 8-bit B, G, R
    Bgr24,
    /// Packed 4:2:2, Y0 U Y1 V
    Yuyv,
    /// Planar 4:2:0, Y plane then U then V
    I420,
}

impl PixelFormat {
    /// Number of bytes a `width` x `height` frame occupies in this layout.
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels * 3,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::I420 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
                pixels + chroma * 2
            }
        }
    }

    /// Bytes in one unpadded row of the first plane.
    pub fn row_len(&self, width: u32) -> usize {
        let width = width as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => width * 3,
            PixelFormat::Yuyv => width * 2,
            PixelFormat::I420 => width,
        }
    }
}

/// One captured picture. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            captured_at: Utc::now(),
        }
    }

    /// An all-black RGB24 frame.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = PixelFormat::Rgb24.buffer_len(width, height);
        Self::new(vec![0; len], width, height, PixelFormat::Rgb24)
    }

    /// Whether the buffer length agrees with the declared size and layout.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.buffer_len(self.width, self.height)
    }
}

/// Rational time base of a presentation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const VIDEO: TimeBase = TimeBase {
        num: 1,
        den: VIDEO_CLOCK_RATE,
    };
}

/// A frame ready for the RTC engine.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub frame: Frame,
    /// Presentation timestamp in units of `time_base`
    pub pts: u64,
    pub time_base: TimeBase,
    /// The frame is a stand-in for a failed capture
    pub fallback: bool,
}
