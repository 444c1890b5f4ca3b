use async_trait::async_trait;
use std::sync::{Arc, Weak};
use uuid::Uuid;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Reply sent for every inbound data channel message
pub const ACKNOWLEDGMENT: &str = "pong";

/// Where an echo reply goes
#[async_trait]
pub trait EchoTarget: Send + Sync {
    async fn reply(&self, text: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl EchoTarget for RTCDataChannel {
    async fn reply(&self, text: &str) -> anyhow::Result<()> {
        self.send_text(text.to_string()).await?;
        Ok(())
    }
}

/// Answers every data channel message with a fixed acknowledgment
pub struct DataChannelEcho {
    ack: String,
}

impl DataChannelEcho {
    pub fn new() -> Self {
        Self::with_ack(ACKNOWLEDGMENT)
    }

    pub fn with_ack(ack: impl Into<String>) -> Self {
        Self { ack: ack.into() }
    }

    pub async fn respond(&self, target: &dyn EchoTarget, message: &DataChannelMessage) {
        tracing::debug!(
            "Data channel message ({} bytes, text: {})",
            message.data.len(),
            message.is_string
        );
        if let Err(e) = target.reply(&self.ack).await {
            tracing::warn!("Failed to send data channel reply: {}", e);
        }
    }

    /// Echo every message `channel` receives.
    ///
    /// Must run inside the peer connection's data channel callback: the
    /// channel starts reading as soon as that callback returns, and messages
    /// that arrive before a handler is set are lost.
    pub fn attach(self: &Arc<Self>, session_id: Uuid, channel: &Arc<RTCDataChannel>) {
        let label = channel.label().to_string();
        tracing::info!("Session {} data channel '{}' announced", session_id, label);

        channel.on_open(Box::new(move || {
            tracing::info!("Session {} data channel '{}' open", session_id, label);
            Box::pin(async {})
        }));

        let echo = self.clone();
        let weak_channel: Weak<RTCDataChannel> = Arc::downgrade(channel);
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let echo = echo.clone();
            let weak_channel = weak_channel.clone();
            Box::pin(async move {
                if let Some(channel) = weak_channel.upgrade() {
                    echo.respond(channel.as_ref(), &message).await;
                }
            })
        }));
    }
}

impl Default for DataChannelEcho {
    fn default() -> Self {
        Self::new()
    }
}
