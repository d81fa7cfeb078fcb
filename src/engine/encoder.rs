//! H.264 encoder wrapper using openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use crate::capture::convert::rgb24_to_i420;
use crate::error::{PublisherError, Result};
use crate::model::frame::{Frame, PixelFormat};

pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

/// One encoded access unit in Annex B format.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

impl H264Encoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let encoder = Encoder::new().map_err(|e| {
            PublisherError::EngineFailure(format!("Failed to create H.264 encoder: {}", e))
        })?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Encode an RGB24 frame of the encoder's size.
    pub fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame> {
        if frame.format != PixelFormat::Rgb24
            || frame.width != self.width
            || frame.height != self.height
        {
            return Err(PublisherError::EngineFailure(format!(
                "Encoder expects {}x{} RGB24, got {}x{} {:?}",
                self.width, self.height, frame.width, frame.height, frame.format
            )));
        }

        let yuv = rgb24_to_i420(&frame.data, self.width, self.height);
        let yuv = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| PublisherError::EngineFailure(format!("H.264 encoding failed: {}", e)))?;

        self.frame_count += 1;

        Ok(EncodedFrame {
            is_keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
        })
    }

    /// Make the next encoded frame an IDR.
    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_CODE: [u8; 4] = [0, 0, 0, 1];

    #[test]
    fn test_first_frame_is_annex_b_keyframe() {
        let mut encoder = H264Encoder::new(320, 240).unwrap();
        let encoded = encoder.encode(&Frame::blank(320, 240)).unwrap();

        assert!(encoded.is_keyframe);
        assert!(encoded.data.starts_with(&START_CODE));
        assert_eq!(encoder.frame_count(), 1);
    }

    #[test]
    fn test_forced_keyframe() {
        let mut encoder = H264Encoder::new(320, 240).unwrap();
        let frame = Frame::blank(320, 240);
        encoder.encode(&frame).unwrap();
        encoder.encode(&frame).unwrap();

        encoder.force_keyframe();
        let encoded = encoder.encode(&frame).unwrap();
        assert!(encoded.is_keyframe);
        assert!(!encoded.data.is_empty());
        assert_eq!(encoder.frame_count(), 3);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let mut encoder = H264Encoder::new(320, 240).unwrap();
        assert!(matches!(
            encoder.encode(&Frame::blank(640, 480)),
            Err(PublisherError::EngineFailure(_))
        ));
        assert_eq!(encoder.frame_count(), 0);
    }
}
