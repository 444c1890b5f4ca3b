//! Frame relay tasks
//!
//! Per session, the upstream consumer pulls frames from the source into the
//! session's `FrameRelayBuffer`, and the outbound pump drains that buffer into
//! the peer's video track. Both run until their session cancels them.

mod activation;
mod consumer;
mod outbound;

pub use activation::{activate, schedule_activation, RelayActivation};
pub use consumer::{FrameSizeChange, FrameSizeTracker, UpstreamConsumer};
pub use outbound::{drain_rtcp, FrameSink, OutboundPump};

use std::sync::atomic::{AtomicU64, Ordering};

/// How a session-owned task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// Stopped through the session's cancellation token
    Cancelled,
    /// Ran out of work on its own (end of stream, peer gone)
    Completed,
    Failed(String),
}

impl TaskExit {
    pub fn is_error(&self) -> bool {
        matches!(self, TaskExit::Failed(_))
    }
}

/// Counters shared by the relay tasks of one session
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    size_changes: AtomicU64,
}

impl RelayStats {
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Number of times the upstream frame size changed after the first frame
    pub fn size_changes(&self) -> u64 {
        self.size_changes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self) -> u64 {
        self.frames_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_sent(&self) -> u64 {
        self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_size_change(&self) {
        self.size_changes.fetch_add(1, Ordering::Relaxed);
    }
}
