//! Peer connection callbacks, turned into a typed event stream
//!
//! The callbacks registered on the peer connection only forward events into
//! a channel. One task per session drains that channel in order. The one
//! exception is the data channel echo, which has to be attached before the
//! callback returns.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{teardown, DataChannelEcho, Session, SessionContext};
use crate::relay::{activate, RelayActivation, TaskExit};

pub enum SessionEvent {
    /// The peer opened a data channel, already wired to the echo
    DataChannel { label: String },
    /// The peer started sending a track
    InboundTrack { kind: RTPCodecType, track_id: String },
    ConnectionState(RTCPeerConnectionState),
}

/// Register forwarding callbacks on `peer_connection`
pub fn wire_peer_events(
    peer_connection: &RTCPeerConnection,
    session_id: Uuid,
    echo: Arc<DataChannelEcho>,
) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    let events = tx.clone();
    peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        echo.attach(session_id, &channel);
        let _ = events.send(SessionEvent::DataChannel {
            label: channel.label().to_string(),
        });
        Box::pin(async {})
    }));

    let events = tx.clone();
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = events.send(SessionEvent::InboundTrack {
                kind: track.kind(),
                track_id: track.id(),
            });
            Box::pin(async {})
        },
    ));

    let events = tx;
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            let _ = events.send(SessionEvent::ConnectionState(state));
            Box::pin(async {})
        },
    ));

    rx
}

/// Handle one session's events until it is cancelled or the peer goes away
pub async fn run_session_events(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
) -> TaskExit {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            event = events.recv() => match event {
                Some(event) => event,
                None => return TaskExit::Completed,
            },
        };

        match event {
            SessionEvent::DataChannel { label } => {
                tracing::debug!("Session {} echoing on data channel '{}'", session.id(), label);
            }
            SessionEvent::InboundTrack { kind, track_id } => {
                tracing::info!(
                    "Session {} inbound {} track {}",
                    session.id(),
                    kind,
                    track_id
                );
                if kind == RTPCodecType::Video
                    && context.activation == RelayActivation::OnInboundTrack
                {
                    activate(&session, context.sources.as_ref()).await;
                }
            }
            SessionEvent::ConnectionState(state) => {
                tracing::info!("Session {} connection state: {}", session.id(), state);
                match state {
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        // Closing joins this task, so it has to happen elsewhere
                        let registry = context.registry.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            if let Err(e) = teardown(&registry, &session).await {
                                tracing::warn!("Failed to close session {}: {}", session.id(), e);
                            }
                        });
                        return TaskExit::Completed;
                    }
                    RTCPeerConnectionState::Disconnected => {
                        tracing::warn!("Session {} disconnected, waiting for recovery", session.id());
                    }
                    _ => {}
                }
            }
        }
    }
}
