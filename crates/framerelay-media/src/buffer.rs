//! Single-slot freshness buffer
//!
//! Sits between one producer (the upstream consumer task) and one consumer
//! (the outbound pump). A push never waits: if the slot is taken, the old frame
//! is dropped and replaced. A pop waits until there is something to take.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::frame::VideoFrame;

pub struct FrameRelayBuffer {
    slot: Mutex<Option<VideoFrame>>,
    ready: Notify,
    dropped: AtomicU64,
}

impl FrameRelayBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store a frame, evicting the pending one if any.
    ///
    /// Returns `true` when a pending frame was discarded.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let evicted = self.lock_slot().replace(frame);
        let was_full = evicted.is_some();
        if was_full {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(evicted);

        // Stores a permit when nobody is waiting yet
        self.ready.notify_one();
        was_full
    }

    /// Wait for a frame and take it, leaving the slot empty
    pub async fn pop(&self) -> VideoFrame {
        loop {
            let pending = self.lock_slot().take();
            if let Some(frame) = pending {
                return frame;
            }
            self.ready.notified().await;
        }
    }

    /// Take the pending frame without waiting
    pub fn try_pop(&self) -> Option<VideoFrame> {
        self.lock_slot().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_slot().is_none()
    }

    /// Number of frames evicted before anyone read them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<VideoFrame>> {
        // The slot only ever holds a fully built frame, so a poisoned lock is still coherent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameRelayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    fn frame(tag: u8) -> VideoFrame {
        VideoFrame::new(640, 480, vec![tag], Duration::from_millis(33))
    }

    #[tokio::test]
    async fn test_only_latest_push_survives() {
        let buffer = FrameRelayBuffer::new();

        assert!(!buffer.push(frame(1)));
        assert!(buffer.push(frame(2)));
        assert!(buffer.push(frame(3)));

        let popped = buffer.pop().await;
        assert_eq!(popped.data.as_ref(), &[3]);
        assert_eq!(buffer.dropped(), 2);
        assert!(buffer.is_empty());
    }

    /// Poll `future` once; true if it could not finish yet
    async fn still_pending<F: Future + Unpin>(future: &mut F) -> bool {
        tokio::select! {
            biased;
            _ = future => false,
            _ = std::future::ready(()) => true,
        }
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let buffer = FrameRelayBuffer::new();
        let pop = buffer.pop();
        tokio::pin!(pop);

        assert!(still_pending(&mut pop).await);

        buffer.push(frame(7));
        let popped = tokio::time::timeout(Duration::from_secs(1), &mut pop)
            .await
            .unwrap();
        assert_eq!(popped.data.as_ref(), &[7]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_stale_permit_does_not_yield_phantom_frame() {
        let buffer = FrameRelayBuffer::new();

        // Two pushes leave a stored permit behind after the first pop
        buffer.push(frame(1));
        buffer.push(frame(2));
        assert_eq!(buffer.pop().await.data.as_ref(), &[2]);

        let second = buffer.pop();
        tokio::pin!(second);
        assert!(still_pending(&mut second).await);
    }

    #[test]
    fn test_try_pop_empties_slot() {
        let buffer = FrameRelayBuffer::new();
        assert!(buffer.try_pop().is_none());

        buffer.push(frame(4));
        assert_eq!(buffer.try_pop().map(|f| f.data[0]), Some(4));
        assert!(buffer.try_pop().is_none());
    }
}
