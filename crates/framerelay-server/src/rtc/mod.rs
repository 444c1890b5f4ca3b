//! WebRTC API construction
//!
//! One `RtcEngine` is shared by every session; it owns the media engine,
//! interceptors and ICE server list used for new peer connections.

use anyhow::Result;
use std::sync::Arc;

use framerelay_media::VideoCodec;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

pub struct RtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl RtcEngine {
    pub fn new(stun_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        // Video codecs the upstream container may carry
        for codec in [VideoCodec::VP8, VideoCodec::VP9] {
            media_engine.register_codec(
                RTCRtpCodecParameters {
                    capability: codec.capability(),
                    payload_type: codec.payload_type(),
                    ..Default::default()
                },
                RTPCodecType::Video,
            )?;
        }

        // Opus so browser offers with an audio section still negotiate
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let ice_servers = stun_servers
            .into_iter()
            .map(|url| RTCIceServer {
                urls: vec![url],
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }

    pub async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        Ok(Arc::new(self.api.new_peer_connection(config).await?))
    }
}
