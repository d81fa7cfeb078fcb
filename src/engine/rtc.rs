//! str0m-backed peer session
//!
//! str0m is a sans-IO state machine, so this module owns the UDP socket and
//! runs the poll loop: drain `poll_output` until it asks for a timeout, then
//! wait for whichever comes first of a datagram, the timeout, the next frame
//! slot or shutdown.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use str0m::change::{SdpAnswer as RtcAnswer, SdpPendingOffer};
use str0m::format::Codec;
use str0m::media::{Direction, Frequency, MediaKind, MediaTime, Mid, Pt};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::encoder::H264Encoder;
use super::{PeerEvent, PeerSession, RtcEngine};
use crate::config::PublisherConfig;
use crate::error::{PublisherError, Result};
use crate::model::sdp::{SdpAnswer, SdpOffer};
use crate::model::state::{ConnectionState, IceState};
use crate::track::SharedTrack;
use crate::util::select_host_address;

const STREAM_ID: &str = "whip-publisher";

/// Creates [`Str0mSession`]s bound to the host's routable address.
#[derive(Debug, Default, Clone)]
pub struct Str0mEngine;

impl RtcEngine for Str0mEngine {
    type Session = Str0mSession;

    async fn create_session(&self, config: &PublisherConfig) -> Result<Str0mSession> {
        Str0mSession::new(config).await
    }
}

pub struct Str0mSession {
    /// Held here until the answer is applied, then moved into the driver
    rtc: Option<Rtc>,
    socket: Option<UdpSocket>,
    mid: Option<Mid>,
    track: Option<SharedTrack>,
    pending: Option<SdpPendingOffer>,
    events_tx: UnboundedSender<PeerEvent>,
    events_rx: Option<UnboundedReceiver<PeerEvent>>,
    shutdown: CancellationToken,
    driver: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
    frame_interval: Duration,
    closed: bool,
}

impl Str0mSession {
    pub async fn new(config: &PublisherConfig) -> Result<Self> {
        let host = select_host_address()
            .ok_or_else(|| PublisherError::EngineFailure("Found no usable network interface".into()))?;
        Self::bind(host, config).await
    }

    /// Create a session whose host candidate is on `host`.
    pub async fn bind(host: IpAddr, config: &PublisherConfig) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(host, 0))
            .await
            .map_err(|e| PublisherError::EngineFailure(format!("Failed to bind UDP socket: {}", e)))?;
        let local = socket
            .local_addr()
            .map_err(|e| PublisherError::EngineFailure(e.to_string()))?;
        info!("Bound UDP port: {}", local);

        // The encoder only produces H.264, so offer nothing else
        let mut rtc = Rtc::builder().clear_codecs().enable_h264(true).build();
        let candidate = Candidate::host(local, Protocol::Udp)
            .map_err(|e| PublisherError::EngineFailure(format!("Bad host candidate: {:?}", e)))?;
        rtc.add_local_candidate(candidate);

        // str0m does not gather server reflexive candidates
        if config.ice_servers.is_empty() {
            info!("Advertising host candidate {}", local);
        } else {
            warn!(
                "ICE servers {:?} are not used, advertising host candidate {} only",
                config.ice_servers, local
            );
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let camera = &config.camera;

        Ok(Self {
            rtc: Some(rtc),
            socket: Some(socket),
            mid: None,
            track: None,
            pending: None,
            events_tx,
            events_rx: Some(events_rx),
            shutdown: CancellationToken::new(),
            driver: None,
            width: camera.width,
            height: camera.height,
            frame_interval: Duration::from_secs(1) / camera.frame_rate.max(1),
            closed: false,
        })
    }

    fn rtc_mut(&mut self) -> Result<&mut Rtc> {
        self.rtc
            .as_mut()
            .ok_or_else(|| PublisherError::EngineFailure("Peer session is not negotiable".into()))
    }
}

impl PeerSession for Str0mSession {
    fn attach_track(&mut self, track: SharedTrack) -> Result<()> {
        if self.track.is_some() {
            return Err(PublisherError::EngineFailure("Video track already attached".into()));
        }
        if self.rtc.is_none() {
            return Err(PublisherError::EngineFailure("Peer session is closed".into()));
        }

        self.track = Some(track);
        info!("📝 Video track attached");
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SdpOffer> {
        if self.track.is_none() {
            return Err(PublisherError::EngineFailure("No track attached".into()));
        }

        let rtc = self.rtc_mut()?;
        let mut change = rtc.sdp_api();
        let mid = change.add_media(
            MediaKind::Video,
            Direction::SendOnly,
            Some(STREAM_ID.to_string()),
            None,
            None,
        );
        let (offer, pending) = change
            .apply()
            .ok_or_else(|| PublisherError::EngineFailure("Failed to apply sdp change".into()))?;

        self.mid = Some(mid);
        self.pending = Some(pending);
        info!("SDP offer created, video mid {:?}", mid);
        Ok(SdpOffer::new(offer.to_sdp_string()))
    }

    async fn apply_answer(&mut self, answer: &SdpAnswer) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| PublisherError::EngineFailure("No offer pending".into()))?;
        let remote = RtcAnswer::from_sdp_string(answer.as_str())
            .map_err(|e| PublisherError::EngineFailure(format!("Invalid answer: {:?}", e)))?;
        let mid = self
            .mid
            .ok_or_else(|| PublisherError::EngineFailure("No offer pending".into()))?;

        let rtc = self.rtc_mut()?;
        rtc.sdp_api()
            .accept_answer(pending, remote)
            .map_err(|e| PublisherError::EngineFailure(format!("Answer rejected: {:?}", e)))?;

        if h264_pt(rtc, mid).is_none() {
            return Err(PublisherError::EngineFailure(
                "Remote did not negotiate H.264".into(),
            ));
        }

        let encoder = H264Encoder::new(self.width, self.height)?;

        let (Some(rtc), Some(socket), Some(track)) =
            (self.rtc.take(), self.socket.take(), self.track.clone())
        else {
            return Err(PublisherError::EngineFailure("No track attached".into()));
        };

        let driver = Driver {
            rtc,
            socket,
            mid,
            track,
            encoder,
            events: self.events_tx.clone(),
            shutdown: self.shutdown.clone(),
            connection: ConnectionState::New,
            frame_interval: self.frame_interval,
        };
        self.driver = Some(tokio::spawn(driver.run()));

        info!("✅ Answer accepted, waiting for ICE connection");
        Ok(())
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<PeerEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.shutdown.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!("RTC driver task failed: {}", e);
            }
        }

        if let Some(mut rtc) = self.rtc.take() {
            rtc.disconnect();
            let _ = self.events_tx.send(PeerEvent::Connection(ConnectionState::Closed));
        }
        self.socket = None;
        self.track = None;

        info!("Peer session closed");
    }
}

/// What woke the driver loop.
enum Wake {
    Timeout,
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Frame,
}

/// Owns the negotiated `Rtc` and pushes media until shutdown.
struct Driver {
    rtc: Rtc,
    socket: UdpSocket,
    mid: Mid,
    track: SharedTrack,
    encoder: H264Encoder,
    events: UnboundedSender<PeerEvent>,
    shutdown: CancellationToken,
    connection: ConnectionState,
    frame_interval: Duration,
}

impl Driver {
    async fn run(mut self) {
        let mut buf = vec![0; 2000];
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let end = loop {
            let timeout = match self.poll_until_timeout() {
                Ok(t) => t,
                Err(state) => break state,
            };

            // Scale up buffer to receive an entire UDP packet.
            buf.resize(2000, 0);

            let wake = tokio::select! {
                _ = self.shutdown.cancelled() => break ConnectionState::Closed,
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(timeout)) => Wake::Timeout,
                r = self.socket.recv_from(&mut buf) => Wake::Datagram(r),
                _ = frames.tick() => Wake::Frame,
            };

            let input_result = match wake {
                Wake::Timeout => self.rtc.handle_input(Input::Timeout(Instant::now())),
                Wake::Datagram(Ok((n, source))) => {
                    buf.truncate(n);
                    let Ok(contents) = buf.as_slice().try_into() else {
                        continue;
                    };
                    let Ok(destination) = self.socket.local_addr() else {
                        continue;
                    };
                    self.rtc.handle_input(Input::Receive(
                        Instant::now(),
                        Receive {
                            proto: Protocol::Udp,
                            source,
                            destination,
                            contents,
                        },
                    ))
                }
                Wake::Datagram(Err(e)) => {
                    warn!("UdpSocket read failed: {}", e);
                    continue;
                }
                Wake::Frame => {
                    self.send_frame().await;
                    Ok(())
                }
            };

            if let Err(e) = input_result {
                warn!("Peer disconnected: {:?}", e);
                self.rtc.disconnect();
                break ConnectionState::Failed;
            }
        };

        self.rtc.disconnect();
        self.set_connection(end);
        debug!("RTC driver stopped after {} frames", self.encoder.frame_count());
    }

    /// Poll all output until str0m returns a timeout. Transmits go straight
    /// to the socket, events are translated into [`PeerEvent`]s.
    fn poll_until_timeout(&mut self) -> std::result::Result<Instant, ConnectionState> {
        loop {
            if !self.rtc.is_alive() {
                return Err(ConnectionState::Closed);
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Ok(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self.socket.try_send_to(&transmit.contents, transmit.destination)
                    {
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    error!("Poll output error: {:?}", e);
                    return Err(ConnectionState::Failed);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected => {
                info!("🎉 DTLS connected, media can flow");
                self.set_connection(ConnectionState::Connected);
            }
            Event::IceConnectionStateChange(state) => {
                let _ = self.events.send(PeerEvent::Ice(ice_state(state)));
                match state {
                    IceConnectionState::Checking => self.set_connection(ConnectionState::Connecting),
                    IceConnectionState::Disconnected => {
                        self.set_connection(ConnectionState::Disconnected)
                    }
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        // Only a reconnect; the first Connected comes from DTLS
                        if self.connection == ConnectionState::Disconnected {
                            self.set_connection(ConnectionState::Connected);
                        }
                    }
                    IceConnectionState::New => {}
                }
            }
            Event::KeyframeRequest(req) => {
                debug!("Keyframe requested: {:?}", req.kind);
                self.encoder.force_keyframe();
            }
            Event::MediaEgressStats(stats) => debug!("{:?}", stats),
            Event::PeerStats(stats) => debug!("{:?}", stats),
            other => debug!("Event (other): {:?}", other),
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        self.connection = state;
        let _ = self.events.send(PeerEvent::Connection(state));
    }

    /// Pull one sample from the track, encode it and hand it to str0m.
    async fn send_frame(&mut self) {
        if self.connection != ConnectionState::Connected {
            return;
        }

        let sample = {
            let mut track = self.track.lock().await;
            if track.is_stopped() {
                return;
            }
            track.next_sample().await
        };

        let encoded = match self.encoder.encode(&sample.frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        let Some(pt) = h264_pt(&mut self.rtc, self.mid) else {
            warn!("Remote did not negotiate H.264");
            return;
        };
        let Some(writer) = self.rtc.writer(self.mid) else {
            return;
        };

        if encoded.is_keyframe {
            debug!("Sending keyframe at pts {}", sample.pts);
        }

        let rtp_time = MediaTime::new(sample.pts, Frequency::NINETY_KHZ);
        if let Err(e) = writer.write(pt, Instant::now(), rtp_time, encoded.data) {
            warn!("Failed to write media: {:?}", e);
            self.rtc.disconnect();
        }
    }
}

/// Payload type the remote accepted for H.264 on `mid`.
fn h264_pt(rtc: &mut Rtc, mid: Mid) -> Option<Pt> {
    let writer = rtc.writer(mid)?;
    let pt = writer
        .payload_params()
        .find(|p| p.spec().codec == Codec::H264)
        .map(|p| p.pt());
    pt
}

fn ice_state(state: IceConnectionState) -> IceState {
    match state {
        IceConnectionState::New => IceState::New,
        IceConnectionState::Checking => IceState::Checking,
        IceConnectionState::Connected => IceState::Connected,
        IceConnectionState::Completed => IceState::Completed,
        IceConnectionState::Disconnected => IceState::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use str0m::change::SdpOffer as RtcOffer;

    use super::*;
    use crate::capture::FrameSource;
    use crate::model::frame::Frame;
    use crate::track::TrackDriver;

    struct BlankSource;

    impl FrameSource for BlankSource {
        fn capture(&mut self) -> Result<Frame> {
            Ok(Frame::blank(320, 240))
        }

        fn close(&mut self) {}
    }

    fn config() -> PublisherConfig {
        let mut config = PublisherConfig::default();
        config.camera.width = 320;
        config.camera.height = 240;
        config
    }

    async fn session_with_track() -> Str0mSession {
        let config = config();
        let mut session = Str0mSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), &config)
            .await
            .unwrap();
        let track = TrackDriver::new(Box::new(BlankSource), &config.camera).shared();
        session.attach_track(track).unwrap();
        session
    }

    /// Answer `offer` from a second str0m peer with default codecs.
    fn remote_answer(offer: &SdpOffer) -> String {
        let mut remote = Rtc::builder().build();
        let offer = RtcOffer::from_sdp_string(offer.as_str()).unwrap();
        let answer = remote.sdp_api().accept_offer(offer).unwrap();
        answer.to_sdp_string()
    }

    fn drain(rx: &mut UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_offer_is_sendonly_h264() {
        let mut session = session_with_track().await;
        let offer = session.create_offer().await.unwrap();
        let sdp = offer.as_str();

        assert_eq!(sdp.matches("m=video").count(), 1);
        assert!(!sdp.contains("m=audio"));
        assert!(sdp.contains("a=sendonly"));
        assert!(sdp.contains("H264/90000"));
        assert!(!sdp.contains("VP8"));
        assert!(!sdp.contains("VP9"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_offer_requires_track() {
        let mut session = Str0mSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), &config())
            .await
            .unwrap();
        assert!(matches!(
            session.create_offer().await,
            Err(PublisherError::EngineFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_then_close_reports_closed_once() {
        let mut session = session_with_track().await;
        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());

        let offer = session.create_offer().await.unwrap();
        let answer = SdpAnswer::new(remote_answer(&offer));
        session.apply_answer(&answer).await.unwrap();

        session.close().await;
        let seen = drain(&mut events);
        assert_eq!(
            seen.iter()
                .filter(|e| **e == PeerEvent::Connection(ConnectionState::Closed))
                .count(),
            1
        );

        // Closing again does nothing
        session.close().await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_answer_without_h264_is_rejected() {
        let mut session = session_with_track().await;
        let offer = session.create_offer().await.unwrap();
        let answer = SdpAnswer::new(remote_answer(&offer).replace("H264/90000", "VP8/90000"));

        let err = session.apply_answer(&answer).await.unwrap_err();
        assert!(matches!(err, PublisherError::EngineFailure(_)), "got {err:?}");

        session.close().await;
    }

    #[tokio::test]
    async fn test_answer_without_offer_is_rejected() {
        let mut session = session_with_track().await;
        let answer = SdpAnswer::new("v=0\r\n");
        assert!(session.apply_answer(&answer).await.is_err());
    }
}
