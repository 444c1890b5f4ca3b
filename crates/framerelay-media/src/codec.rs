//! Video codec utilities
//!
//! Maps the codec announced by an upstream container to the RTP capability
//! used for the outbound track.

use webrtc::api::media_engine::{MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Video codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    VP8,
    VP9,
}

impl VideoCodec {
    /// Resolve an IVF FourCC (`VP80`, `VP90`)
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"VP80" => Some(VideoCodec::VP8),
            b"VP90" => Some(VideoCodec::VP9),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => MIME_TYPE_VP8,
            VideoCodec::VP9 => MIME_TYPE_VP9,
        }
    }

    /// Payload type used when registering the codec with the media engine
    pub fn payload_type(&self) -> u8 {
        match self {
            VideoCodec::VP8 => 96,
            VideoCodec::VP9 => 98,
        }
    }

    pub fn fmtp_line(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type().to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: self.fmtp_line().to_string(),
            rtcp_feedback: vec![],
        }
    }
}
