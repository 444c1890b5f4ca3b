use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use framerelay_media::{FrameRelayBuffer, VideoFrame};

use super::{RelayStats, TaskExit};

/// Anything that can transmit a frame to the peer
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: VideoFrame) -> anyhow::Result<()>;
}

#[async_trait]
impl FrameSink for TrackLocalStaticSample {
    async fn send_frame(&self, frame: VideoFrame) -> anyhow::Result<()> {
        let sample = Sample {
            data: frame.data,
            duration: frame.duration,
            ..Default::default()
        };
        self.write_sample(&sample).await?;
        Ok(())
    }
}

/// Drains a session's freshness buffer into its outbound track
pub struct OutboundPump {
    session_id: Uuid,
    buffer: Arc<FrameRelayBuffer>,
    sink: Arc<dyn FrameSink>,
    stats: Arc<RelayStats>,
}

impl OutboundPump {
    pub fn new(
        session_id: Uuid,
        buffer: Arc<FrameRelayBuffer>,
        sink: Arc<dyn FrameSink>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            session_id,
            buffer,
            sink,
            stats,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> TaskExit {
        let mut failures = 0u64;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TaskExit::Cancelled,
                frame = self.buffer.pop() => frame,
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TaskExit::Cancelled,
                result = self.sink.send_frame(frame) => result,
            };

            match result {
                Ok(()) => {
                    let sent = self.stats.record_sent();
                    if sent % 300 == 1 {
                        tracing::debug!("Session {} sent {} frames", self.session_id, sent);
                    }
                }
                Err(e) => {
                    // The track stays usable after a failed write, keep going
                    failures += 1;
                    if failures == 1 || failures % 100 == 0 {
                        tracing::warn!(
                            "Failed to write frame for session {} ({} failures): {}",
                            self.session_id,
                            failures,
                            e
                        );
                    }
                }
            }
        }
    }
}

/// Read RTCP for an outbound sender so the interceptors keep running
pub async fn drain_rtcp(sender: Arc<RTCRtpSender>, cancel: CancellationToken) -> TaskExit {
    let mut rtcp_buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            result = sender.read(&mut rtcp_buf) => {
                if result.is_err() {
                    return TaskExit::Completed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct RecordingSink {
        sizes: mpsc::UnboundedSender<(u32, u32)>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: VideoFrame) -> anyhow::Result<()> {
            self.sizes.send(frame.dimensions())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pump_forwards_frames() {
        let buffer = Arc::new(FrameRelayBuffer::new());
        let (sizes, mut sent) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink { sizes });
        let stats = Arc::new(RelayStats::default());
        let cancel = CancellationToken::new();

        let pump = OutboundPump::new(Uuid::new_v4(), buffer.clone(), sink, stats.clone());
        let handle = tokio::spawn(pump.run(cancel.clone()));

        buffer.push(VideoFrame::new(320, 240, vec![0u8; 4], Duration::from_millis(33)));
        let size = tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .unwrap();
        assert_eq!(size, Some((320, 240)));

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, TaskExit::Cancelled);
        assert_eq!(stats.frames_sent(), 1);
        assert!(sent.try_recv().is_err());
    }
}
