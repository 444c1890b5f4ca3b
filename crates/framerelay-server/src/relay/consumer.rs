use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use framerelay_media::{FrameRelayBuffer, FrameSource};

use super::{RelayStats, TaskExit};

/// Result of comparing a frame's size with the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeChange {
    First((u32, u32)),
    Changed { from: (u32, u32), to: (u32, u32) },
}

/// Remembers the last frame size so a change is reported once, not per frame
#[derive(Debug, Default)]
pub struct FrameSizeTracker {
    last: Option<(u32, u32)>,
}

impl FrameSizeTracker {
    pub fn observe(&mut self, size: (u32, u32)) -> Option<FrameSizeChange> {
        let change = match self.last {
            None => Some(FrameSizeChange::First(size)),
            Some(from) if from != size => Some(FrameSizeChange::Changed { from, to: size }),
            Some(_) => None,
        };
        self.last = Some(size);
        change
    }
}

/// Pulls frames from one upstream source into a session's freshness buffer
pub struct UpstreamConsumer {
    session_id: Uuid,
    source: Box<dyn FrameSource>,
    buffer: Arc<FrameRelayBuffer>,
    stats: Arc<RelayStats>,
}

impl UpstreamConsumer {
    pub fn new(
        session_id: Uuid,
        source: Box<dyn FrameSource>,
        buffer: Arc<FrameRelayBuffer>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            session_id,
            source,
            buffer,
            stats,
        }
    }

    /// Relay frames until cancelled or the source ends.
    ///
    /// A frame in flight when cancellation lands is dropped, never pushed.
    pub async fn run(mut self, cancel: CancellationToken) -> TaskExit {
        tracing::info!("Consuming upstream video for session {}", self.session_id);
        let mut sizes = FrameSizeTracker::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Upstream consumer for session {} cancelled", self.session_id);
                    return TaskExit::Cancelled;
                }
                next = self.source.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    match sizes.observe(frame.dimensions()) {
                        Some(FrameSizeChange::First((width, height))) => {
                            tracing::info!(
                                "Session {} receiving frames at {}x{}",
                                self.session_id,
                                width,
                                height
                            );
                        }
                        Some(FrameSizeChange::Changed { from, to }) => {
                            self.stats.record_size_change();
                            tracing::info!(
                                "Session {} frame size changed {}x{} -> {}x{}",
                                self.session_id,
                                from.0,
                                from.1,
                                to.0,
                                to.1
                            );
                        }
                        None => {}
                    }

                    let received = self.stats.record_received();
                    if self.buffer.push(frame) && received % 100 == 0 {
                        tracing::debug!(
                            "Session {} has dropped {} stale frames",
                            self.session_id,
                            self.buffer.dropped()
                        );
                    }
                }
                Ok(None) => {
                    tracing::info!("Upstream source for session {} ended", self.session_id);
                    return TaskExit::Completed;
                }
                Err(e) => {
                    tracing::error!(
                        "Upstream source for session {} failed: {}",
                        self.session_id,
                        e
                    );
                    return TaskExit::Failed(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{PendingSource, ScriptedSource};
    use framerelay_media::SourceError;
    use std::time::Duration;

    #[test]
    fn test_size_tracker_reports_only_changes() {
        let mut sizes = FrameSizeTracker::default();

        assert_eq!(
            sizes.observe((640, 480)),
            Some(FrameSizeChange::First((640, 480)))
        );
        assert_eq!(sizes.observe((640, 480)), None);
        assert_eq!(
            sizes.observe((1280, 720)),
            Some(FrameSizeChange::Changed {
                from: (640, 480),
                to: (1280, 720)
            })
        );
        assert_eq!(sizes.observe((1280, 720)), None);
    }

    #[tokio::test]
    async fn test_single_size_change_event() {
        let buffer = Arc::new(FrameRelayBuffer::new());
        let stats = Arc::new(RelayStats::default());
        let source = ScriptedSource::frames(&[(640, 480), (1280, 720)]);

        let consumer =
            UpstreamConsumer::new(Uuid::new_v4(), Box::new(source), buffer.clone(), stats.clone());
        let exit = consumer.run(CancellationToken::new()).await;

        assert_eq!(exit, TaskExit::Completed);
        assert_eq!(stats.frames_received(), 2);
        assert_eq!(stats.size_changes(), 1);

        // Nobody popped, so only the newest frame is left
        let frame = buffer.try_pop().unwrap();
        assert_eq!(frame.dimensions(), (1280, 720));
        assert_eq!(buffer.dropped(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_upstream() {
        let buffer = Arc::new(FrameRelayBuffer::new());
        let cancel = CancellationToken::new();
        let consumer = UpstreamConsumer::new(
            Uuid::new_v4(),
            Box::new(PendingSource),
            buffer.clone(),
            Arc::new(RelayStats::default()),
        );

        let handle = tokio::spawn(consumer.run(cancel.clone()));
        // Single-threaded runtime: the consumer runs until it parks on the source
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, TaskExit::Cancelled);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let source = ScriptedSource::failing(SourceError::Failed("feed lost".to_string()));
        let consumer = UpstreamConsumer::new(
            Uuid::new_v4(),
            Box::new(source),
            Arc::new(FrameRelayBuffer::new()),
            Arc::new(RelayStats::default()),
        );

        let exit = consumer.run(CancellationToken::new()).await;
        assert!(exit.is_error());
    }
}
