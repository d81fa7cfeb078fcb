//! Video track driver
//!
//! Wraps a [`FrameSource`] and hands timestamped RGB24 samples to the RTC
//! engine on demand. Capture failures are masked with a blank frame so the
//! outgoing stream never stalls on a camera glitch.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::convert::{to_rgb24, Transform};
use crate::capture::FrameSource;
use crate::config::CameraConfig;
use crate::error::{PublisherError, Result};
use crate::model::frame::{Frame, MediaSample, TimeBase, VIDEO_CLOCK_RATE};
use crate::model::state::TrackState;

/// Track handle shared between the session controller and the RTC engine.
pub type SharedTrack = Arc<Mutex<TrackDriver>>;

pub struct TrackDriver {
    /// `None` after stop, or after a capture worker panicked with it
    source: Option<Box<dyn FrameSource>>,
    state: TrackState,
    width: u32,
    height: u32,
    frame_rate: u32,
    transform: Transform,
    /// Index of the next sample
    sequence: u64,
    /// Presentation timestamp increment per sample
    tick: u64,
    /// Consecutive masked failures
    failures: u64,
}

impl TrackDriver {
    pub fn new(source: Box<dyn FrameSource>, camera: &CameraConfig) -> Self {
        let frame_rate = camera.frame_rate.max(1);
        Self {
            source: Some(source),
            state: TrackState::Created,
            width: camera.width,
            height: camera.height,
            frame_rate,
            transform: Transform {
                hflip: camera.hflip,
                vflip: camera.vflip,
            },
            sequence: 0,
            tick: u64::from(VIDEO_CLOCK_RATE / frame_rate),
            failures: 0,
        }
    }

    pub fn shared(self) -> SharedTrack {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TrackState::Stopped
    }

    /// Timestamp increment between consecutive samples.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn start(&mut self) {
        if self.state == TrackState::Created {
            self.state = TrackState::Started;
            info!(
                "Video track started {}x{}@{}fps",
                self.width, self.height, self.frame_rate
            );
        }
    }

    /// Produce the next sample.
    ///
    /// Never fails: a failed capture yields a blank frame of the configured
    /// size. Must not be called after [`stop`](Self::stop).
    pub async fn next_sample(&mut self) -> MediaSample {
        assert!(
            self.state != TrackState::Stopped,
            "next_sample called on a stopped track"
        );
        self.start();

        let pts = self.sequence * self.tick;
        self.sequence += 1;

        let (frame, fallback) = match self.capture().await.and_then(|f| self.prepare(f)) {
            Ok(frame) => {
                if self.failures > 0 {
                    info!("Capture recovered after {} blank frames", self.failures);
                    self.failures = 0;
                }
                (frame, false)
            }
            Err(e) => {
                if self.failures == 0 {
                    warn!("Frame capture failed, sending blank frame: {}", e);
                } else {
                    debug!("Frame capture failed again ({}): {}", self.failures + 1, e);
                }
                self.failures += 1;
                (Frame::blank(self.width, self.height), true)
            }
        };

        MediaSample {
            frame,
            pts,
            time_base: TimeBase::VIDEO,
            fallback,
        }
    }

    /// Run one capture on a blocking worker.
    async fn capture(&mut self) -> Result<Frame> {
        let Some(mut source) = self.source.take() else {
            return Err(PublisherError::CaptureFailed(
                "capture source lost".to_string(),
            ));
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = source.capture();
            (source, result)
        })
        .await;

        match joined {
            Ok((source, result)) => {
                self.source = Some(source);
                result
            }
            Err(e) => {
                error!("Capture worker died, source dropped: {}", e);
                Err(PublisherError::CaptureFailed(e.to_string()))
            }
        }
    }

    /// Bring a captured frame into the configured size and layout.
    fn prepare(&self, frame: Frame) -> Result<Frame> {
        if frame.width != self.width || frame.height != self.height {
            return Err(PublisherError::CaptureFailed(format!(
                "frame is {}x{}, expected {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let mut frame = to_rgb24(frame)?;
        self.transform.apply(&mut frame);
        Ok(frame)
    }

    /// Stop the track and release the source. Idempotent.
    pub fn stop(&mut self) {
        if self.state == TrackState::Stopped {
            return;
        }
        self.state = TrackState::Stopped;
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        info!("Video track stopped after {} samples", self.sequence);
    }
}

impl Drop for TrackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::frame::PixelFormat;

    /// Replays a script of capture results, then keeps succeeding.
    struct ScriptedSource {
        width: u32,
        height: u32,
        script: VecDeque<bool>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(width: u32, height: u32, script: Vec<bool>) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            let source = Self {
                width,
                height,
                script: script.into(),
                closes: closes.clone(),
            };
            (source, closes)
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self) -> Result<Frame> {
            if self.script.pop_front().unwrap_or(true) {
                let len = PixelFormat::Yuyv.buffer_len(self.width, self.height);
                Ok(Frame::new(vec![200; len], self.width, self.height, PixelFormat::Yuyv))
            } else {
                Err(PublisherError::CaptureFailed("device hiccup".to_string()))
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingSource;

    impl FrameSource for PanickingSource {
        fn capture(&mut self) -> Result<Frame> {
            panic!("driver exploded");
        }

        fn close(&mut self) {}
    }

    fn camera(width: u32, height: u32, frame_rate: u32) -> CameraConfig {
        CameraConfig {
            width,
            height,
            frame_rate,
            ..CameraConfig::default()
        }
    }

    #[tokio::test]
    async fn test_timestamps_evenly_spaced() {
        let (source, _) = ScriptedSource::new(4, 2, vec![]);
        let mut track = TrackDriver::new(Box::new(source), &camera(4, 2, 30));
        assert_eq!(track.state(), TrackState::Created);

        let mut last = None;
        for _ in 0..10 {
            let sample = track.next_sample().await;
            assert_eq!(sample.time_base, TimeBase::VIDEO);
            if let Some(prev) = last {
                assert_eq!(sample.pts, prev + 3000);
            }
            last = Some(sample.pts);
        }
        assert_eq!(track.state(), TrackState::Started);
    }

    #[tokio::test]
    async fn test_converts_to_rgb() {
        let (source, _) = ScriptedSource::new(4, 2, vec![]);
        let mut track = TrackDriver::new(Box::new(source), &camera(4, 2, 30));

        let sample = track.next_sample().await;
        assert!(!sample.fallback);
        assert_eq!(sample.frame.format, PixelFormat::Rgb24);
        assert_eq!(sample.frame.data.len(), 4 * 2 * 3);
    }

    #[tokio::test]
    async fn test_failure_yields_blank_frame_and_keeps_sequence() {
        // 320x240@15fps, 100 good frames, a failure, then recovery
        let mut script = vec![true; 100];
        script.push(false);
        let (source, _) = ScriptedSource::new(320, 240, script);
        let mut track = TrackDriver::new(Box::new(source), &camera(320, 240, 15));
        let tick = track.tick();
        assert_eq!(tick, 6000);

        let mut pts_100 = 0;
        for _ in 0..100 {
            let sample = track.next_sample().await;
            assert!(!sample.fallback);
            pts_100 = sample.pts;
        }

        let sample_101 = track.next_sample().await;
        assert!(sample_101.fallback);
        assert_eq!(sample_101.frame.width, 320);
        assert_eq!(sample_101.frame.height, 240);
        assert_eq!(sample_101.frame.format, PixelFormat::Rgb24);
        assert!(sample_101.frame.is_well_formed());
        assert!(sample_101.frame.data.iter().all(|b| *b == 0));
        assert_eq!(sample_101.pts, pts_100 + tick);
        assert_eq!(track.state(), TrackState::Started);

        let sample_102 = track.next_sample().await;
        assert!(!sample_102.fallback);
        assert_eq!(sample_102.pts, pts_100 + 2 * tick);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_are_masked() {
        let (source, _) = ScriptedSource::new(8, 8, vec![]);
        let mut track = TrackDriver::new(Box::new(source), &camera(4, 2, 30));

        let sample = track.next_sample().await;
        assert!(sample.fallback);
        assert_eq!((sample.frame.width, sample.frame.height), (4, 2));
    }

    #[tokio::test]
    async fn test_panicking_capture_is_masked() {
        let mut track = TrackDriver::new(Box::new(PanickingSource), &camera(4, 2, 30));

        let first = track.next_sample().await;
        let second = track.next_sample().await;
        assert!(first.fallback && second.fallback);
        assert_eq!(second.pts, first.pts + track.tick());
        assert_eq!(track.state(), TrackState::Started);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (source, closes) = ScriptedSource::new(4, 2, vec![]);
        let mut track = TrackDriver::new(Box::new(source), &camera(4, 2, 30));
        track.next_sample().await;

        track.stop();
        track.stop();
        assert_eq!(track.state(), TrackState::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        drop(track);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "stopped track")]
    async fn test_next_sample_after_stop_panics() {
        let (source, _) = ScriptedSource::new(4, 2, vec![]);
        let mut track = TrackDriver::new(Box::new(source), &camera(4, 2, 30));
        track.stop();
        track.next_sample().await;
    }
}
