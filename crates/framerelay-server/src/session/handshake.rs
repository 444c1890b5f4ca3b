//! Offer/answer negotiation
//!
//! Non-trickle: the answer is returned only after local ICE gathering has
//! finished (or the gather timeout has passed), so it carries every candidate.

use std::sync::Arc;
use std::time::Duration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use framerelay_protocol::{SdpKind, SessionDescriptionPayload};

use super::{
    run_session_events, wire_peer_events, Session, SessionContext, SessionRegistry, SessionState,
    TaskKind,
};
use crate::error::SessionError;
use crate::relay::{activate, drain_rtcp, schedule_activation, RelayActivation};
use crate::rtc::RtcEngine;

pub struct SignalingHandshake {
    engine: Arc<RtcEngine>,
    context: Arc<SessionContext>,
    gather_timeout: Duration,
}

impl SignalingHandshake {
    pub fn new(engine: Arc<RtcEngine>, context: Arc<SessionContext>, gather_timeout: Duration) -> Self {
        Self {
            engine,
            context,
            gather_timeout,
        }
    }

    /// Turn a remote offer into a registered session and its answer.
    ///
    /// On failure the session is closed and unregistered before returning.
    pub async fn accept(
        &self,
        offer: SessionDescriptionPayload,
    ) -> Result<(Arc<Session>, SessionDescriptionPayload), SessionError> {
        if offer.kind != SdpKind::Offer {
            return Err(SessionError::Negotiation(format!(
                "expected an offer, got {}",
                offer.kind
            )));
        }

        let session = self.create_session().await?;
        tracing::info!("Created session {} for remote offer", session.id());
        let guard = HandshakeGuard::new(self.context.registry.clone(), session.clone());

        let answer = match self.negotiate(&session, offer.sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Negotiation failed for session {}: {}", session.id(), e);
                guard.abandon().await;
                return Err(e);
            }
        };

        match self.context.activation {
            RelayActivation::Immediate => {
                activate(&session, self.context.sources.as_ref()).await;
            }
            RelayActivation::FixedDelay(delay) => {
                schedule_activation(&session, delay, self.context.sources.clone());
            }
            RelayActivation::OnInboundTrack => {
                tracing::debug!("Session {} waits for an inbound video track", session.id());
            }
        }

        guard.complete();
        Ok((session, answer))
    }

    async fn create_session(&self) -> Result<Arc<Session>, SessionError> {
        let peer_connection = self.engine.new_peer_connection().await?;

        let track = Arc::new(TrackLocalStaticSample::new(
            self.context.sources.codec().capability(),
            "video".to_string(),
            "framerelay".to_string(),
        ));
        let rtp_sender = match peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = peer_connection.close().await;
                return Err(e.into());
            }
        };

        let session = Session::new(peer_connection, track);
        let events = wire_peer_events(
            session.peer_connection(),
            session.id(),
            self.context.echo.clone(),
        );

        if let Err(e) = self.context.registry.register(session.clone()).await {
            let _ = session.close().await;
            return Err(e);
        }

        session.spawn_task(TaskKind::Rtcp, move |cancel| drain_rtcp(rtp_sender, cancel));

        let context = self.context.clone();
        let owner = session.clone();
        session.spawn_task(TaskKind::Events, move |cancel| {
            run_session_events(owner, events, context, cancel)
        });

        Ok(session)
    }

    async fn negotiate(
        &self,
        session: &Session,
        sdp: String,
    ) -> Result<SessionDescriptionPayload, SessionError> {
        let peer_connection = session.peer_connection();

        let offer = RTCSessionDescription::offer(sdp).map_err(SessionError::negotiation)?;
        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(SessionError::negotiation)?;
        session.transition(SessionState::RemoteSet).await?;

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(SessionError::negotiation)?;

        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection
            .set_local_description(answer)
            .await
            .map_err(SessionError::negotiation)?;

        if tokio::time::timeout(self.gather_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            tracing::warn!(
                "ICE gathering for session {} did not finish in {:?}, answering with partial candidates",
                session.id(),
                self.gather_timeout
            );
        }

        let local = session
            .local_description()
            .await
            .ok_or_else(|| SessionError::Negotiation("no local description".to_string()))?;
        session.transition(SessionState::AnswerReady).await?;

        Ok(SessionDescriptionPayload::answer(local.sdp))
    }
}

/// Fails and unregisters a session whose handshake did not finish.
///
/// Covers the caller dropping `accept` mid-flight, e.g. an HTTP client that
/// disconnects while ICE gathering is still running.
struct HandshakeGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    armed: bool,
}

impl HandshakeGuard {
    fn new(registry: Arc<SessionRegistry>, session: Arc<Session>) -> Self {
        Self {
            registry,
            session,
            armed: true,
        }
    }

    fn complete(mut self) {
        self.armed = false;
    }

    async fn abandon(mut self) {
        self.armed = false;
        discard(&self.registry, &self.session).await;
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!("Handshake for session {} abandoned", self.session.id());
        let registry = self.registry.clone();
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { discard(&registry, &session).await });
            }
            Err(_) => session.cancel_tasks(),
        }
    }
}

async fn discard(registry: &SessionRegistry, session: &Session) {
    if let Err(e) = session.fail().await {
        tracing::warn!("Failed to close session {}: {}", session.id(), e);
    }
    registry.unregister(session.id()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::CountingFactory;
    use crate::session::DataChannelEcho;
    use tokio::sync::mpsc;
    use webrtc::data_channel::data_channel_message::DataChannelMessage;
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    fn handshake(
        activation: RelayActivation,
    ) -> (SignalingHandshake, Arc<SessionRegistry>, Arc<CountingFactory>) {
        handshake_with(activation, Arc::new(CountingFactory::pending()))
    }

    fn handshake_with(
        activation: RelayActivation,
        sources: Arc<CountingFactory>,
    ) -> (SignalingHandshake, Arc<SessionRegistry>, Arc<CountingFactory>) {
        let registry = Arc::new(SessionRegistry::new());
        let context = Arc::new(SessionContext {
            registry: registry.clone(),
            sources: sources.clone(),
            activation,
            echo: Arc::new(DataChannelEcho::new()),
        });
        let engine = Arc::new(RtcEngine::new(vec![]).unwrap());
        (
            SignalingHandshake::new(engine, context, Duration::from_secs(5)),
            registry,
            sources,
        )
    }

    /// A browser-like peer that only receives video
    async fn recv_only_client() -> Arc<RTCPeerConnection> {
        let engine = RtcEngine::new(vec![]).unwrap();
        let client = engine.new_peer_connection().await.unwrap();
        client
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .unwrap();
        client
    }

    async fn local_offer(client: &RTCPeerConnection) -> String {
        let offer = client.create_offer(None).await.unwrap();
        let mut gather_complete = client.gathering_complete_promise().await;
        client.set_local_description(offer).await.unwrap();
        let _ = gather_complete.recv().await;
        client.local_description().await.unwrap().sdp
    }

    async fn client_offer() -> (Arc<RTCPeerConnection>, String) {
        let client = recv_only_client().await;
        client.create_data_channel("chat", None).await.unwrap();
        let sdp = local_offer(&client).await;
        (client, sdp)
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_offer_yields_answer_and_registers_once() {
        let (handshake, registry, sources) = handshake(RelayActivation::Immediate);
        let (client, sdp) = client_offer().await;

        let (session, answer) = handshake
            .accept(SessionDescriptionPayload::offer(sdp))
            .await
            .unwrap();

        assert_eq!(answer.kind, SdpKind::Answer);
        assert!(answer.sdp.contains("a=candidate"));
        assert_eq!(session.state().await, SessionState::AnswerReady);
        assert!(session.remote_description().await.is_some());
        assert_eq!(session.local_description().await.unwrap().sdp, answer.sdp);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(session.id()).await.is_some());
        assert_eq!(sources.opened(), 1);
        assert!(session.upstream_running());

        session.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_track_mode_defers_relay() {
        let (handshake, registry, sources) = handshake(RelayActivation::OnInboundTrack);
        let (client, sdp) = client_offer().await;

        let (session, _) = handshake
            .accept(SessionDescriptionPayload::offer(sdp))
            .await
            .unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(sources.opened(), 0);
        assert!(!session.upstream_running());

        session.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_offer_leaves_nothing_registered() {
        let (handshake, registry, sources) = handshake(RelayActivation::Immediate);

        let result = handshake
            .accept(SessionDescriptionPayload::offer("not an sdp"))
            .await;

        assert!(matches!(result, Err(SessionError::Negotiation(_))));
        assert!(registry.is_empty().await);
        assert_eq!(sources.opened(), 0);
    }

    #[tokio::test]
    async fn test_non_offer_is_rejected() {
        let (handshake, registry, _) = handshake(RelayActivation::Immediate);
        let (client, sdp) = client_offer().await;

        let result = handshake
            .accept(SessionDescriptionPayload::answer(sdp))
            .await;

        assert!(matches!(result, Err(SessionError::Negotiation(_))));
        assert!(registry.is_empty().await);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_data_channel_message_is_echoed() {
        let (handshake, _, _) = handshake(RelayActivation::OnInboundTrack);
        let client = recv_only_client().await;
        let channel = client.create_data_channel("chat", None).await.unwrap();

        let (replies_tx, mut replies) = mpsc::unbounded_channel();
        let opened = channel.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                // One message, sent the moment the channel opens
                let _ = opened.send_text("hello".to_string()).await;
            })
        }));
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let _ = replies_tx.send(String::from_utf8_lossy(&message.data).into_owned());
            Box::pin(async {})
        }));

        let sdp = local_offer(&client).await;
        let (session, answer) = handshake
            .accept(SessionDescriptionPayload::offer(sdp))
            .await
            .unwrap();
        client
            .set_remote_description(RTCSessionDescription::answer(answer.sdp).unwrap())
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(15), replies.recv())
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("pong"));

        session.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_accept_discards_session() {
        let (handshake, registry, sources) =
            handshake_with(RelayActivation::Immediate, Arc::new(CountingFactory::stalled()));
        let handshake = Arc::new(handshake);
        let (client, sdp) = client_offer().await;

        let pending = {
            let handshake = handshake.clone();
            tokio::spawn(async move { handshake.accept(SessionDescriptionPayload::offer(sdp)).await })
        };

        // Negotiation has finished once the relay source is being opened
        wait_until(|| {
            let sources = sources.clone();
            async move { sources.opened() == 1 }
        })
        .await;
        let session = registry.all().await.remove(0);
        assert_eq!(session.state().await, SessionState::AnswerReady);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        wait_until(|| {
            let registry = registry.clone();
            async move { registry.is_empty().await }
        })
        .await;
        assert_eq!(session.state().await, SessionState::Failed);
        assert!(!session.is_live());

        client.close().await.unwrap();
    }
}
