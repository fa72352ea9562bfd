//! WebRTC Transport
//!
//! [`PeerConnection`] backed by `webrtc-rs`. One instance per remote
//! participant; callbacks are forwarded to the session's [`PeerEventSink`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lc_common::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::RwLock;
use tracing::{debug, info};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8},
        APIBuilder, API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, offer_answer_options::RTCOfferOptions,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
        rtp_sender::RTCRtpSender,
    },
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

use crate::media::{LocalTrack, TrackKind};
use crate::peer::{
    ConnectionState, PeerConnection, PeerConnectionFactory, PeerError, PeerEvent, PeerEventSink,
    RemoteTrack,
};

const OPUS_PAYLOAD_TYPE: u8 = 111;
const VP8_PAYLOAD_TYPE: u8 = 96;
const LOCAL_STREAM_ID: &str = "lc-local";

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Creates one [`WebRtcPeer`] per remote participant from a shared API.
pub struct WebRtcPeerFactory {
    api: Arc<API>,
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: vp8_capability(),
                    payload_type: VP8_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(ice_servers = ice_servers.len(), "WebRTC transport initialized");

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);
        install_handlers(&pc, &sink);

        debug!(
            remote_id = %sink.remote_id(),
            generation = sink.generation(),
            "WebRTC peer connection created"
        );

        Ok(Arc::new(WebRtcPeer {
            pc,
            senders: RwLock::new(HashMap::new()),
        }))
    }
}

/// A single `RTCPeerConnection` and its outgoing senders.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: RwLock<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

/// Outgoing RTP track fed with encoded samples by the capture pipeline.
fn sample_track(track: &LocalTrack) -> Arc<dyn TrackLocal + Send + Sync> {
    let capability = match track.kind() {
        TrackKind::Audio => opus_capability(),
        TrackKind::Video => vp8_capability(),
    };
    Arc::new(TrackLocalStaticSample::new(
        capability,
        track.id().to_string(),
        LOCAL_STREAM_ID.to_string(),
    ))
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        let sender = self.pc.add_track(sample_track(track)).await?;
        self.senders.write().await.insert(track.kind(), sender);
        debug!(kind = %track.kind(), track = %track.id(), "Local track attached");
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        let sender = self
            .senders
            .read()
            .await
            .get(&track.kind())
            .cloned()
            .ok_or_else(|| {
                PeerError::Transport(format!("no {} sender to replace", track.kind()))
            })?;

        sender.replace_track(Some(sample_track(track))).await?;

        debug!(kind = %track.kind(), track = %track.id(), "Outgoing track replaced");
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;

        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;

        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let remote = to_rtc_description(description)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(|e| PeerError::Ice(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.senders.write().await.clear();
        self.pc.close().await?;
        Ok(())
    }
}

fn install_handlers(pc: &RTCPeerConnection, sink: &PeerEventSink) {
    let candidates = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = candidates.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEvent::LocalCandidate(from_candidate_init(init))),
                Err(e) => debug!("Unserializable local candidate: {}", e),
            }
        })
    }));

    let states = sink.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let sink = states.clone();
        Box::pin(async move {
            debug!(remote_id = %sink.remote_id(), "Peer connection state changed: {:?}", s);
            sink.emit(PeerEvent::ConnectionState(connection_state(s)));
        })
    }));

    let tracks = sink.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = tracks.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!(
                    "Remote track received: {} ({})",
                    kind,
                    track.codec().capability.mime_type
                );
                sink.emit(PeerEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
            })
        },
    ));
}

const fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|e| PeerError::Sdp(e.to_string()))
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
