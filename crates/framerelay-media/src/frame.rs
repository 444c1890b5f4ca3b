use bytes::Bytes;
use std::time::Duration;

/// A single upstream video frame.
///
/// The payload is opaque to the relay; it is handed to the outbound track as-is.
/// Frames are moved between stages, never cloned.
#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    /// How long the frame is displayed, used to pace the outbound track
    pub duration: Duration,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            duration,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
