//! Upstream frame sources
//!
//! A `FrameSource` yields frames one at a time and may suspend until the next
//! one is ready. `Ok(None)` means the feed ended normally.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Interval, MissedTickBehavior};
use webrtc::media::io::ivf_reader::IVFReader;

use crate::codec::VideoCodec;
use crate::frame::VideoFrame;

/// IVF file header size, also the offset of the first frame
const IVF_FILE_HEADER_LEN: u64 = 32;
/// Per-frame header: 4 byte size + 8 byte timestamp
const IVF_FRAME_HEADER_LEN: u64 = 12;
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open upstream source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed upstream stream: {0}")]
    Malformed(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Upstream source failed: {0}")]
    Failed(String),
}

/// An upstream feed of video frames
#[async_trait]
pub trait FrameSource: Send {
    /// Suspend until the next frame is available.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, SourceError>;
}

/// Opens one fresh `FrameSource` per session
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameSource>, SourceError>;

    /// Codec of the frames the opened sources produce
    fn codec(&self) -> VideoCodec;
}

/// Reads VP8/VP9 frames from an IVF container, paced at the container timebase
pub struct IvfFileSource {
    data: Bytes,
    reader: IVFReader<Cursor<Bytes>>,
    consumed: u64,
    width: u32,
    height: u32,
    codec: VideoCodec,
    frame_interval: Duration,
    ticker: Option<Interval>,
    looping: bool,
}

impl IvfFileSource {
    pub fn from_bytes(data: Bytes, looping: bool) -> Result<Self, SourceError> {
        let (reader, header) = IVFReader::new(Cursor::new(data.clone()))
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        let codec = VideoCodec::from_fourcc(&header.four_cc).ok_or_else(|| {
            SourceError::UnsupportedCodec(String::from_utf8_lossy(&header.four_cc).into_owned())
        })?;

        let frame_interval = if header.timebase_denominator == 0 {
            DEFAULT_FRAME_INTERVAL
        } else {
            Duration::from_micros(
                1_000_000 * header.timebase_numerator as u64 / header.timebase_denominator as u64,
            )
        };
        let frame_interval = if frame_interval.is_zero() {
            DEFAULT_FRAME_INTERVAL
        } else {
            frame_interval
        };

        Ok(Self {
            data,
            reader,
            consumed: IVF_FILE_HEADER_LEN,
            width: header.width as u32,
            height: header.height as u32,
            codec,
            frame_interval,
            ticker: None,
            looping,
        })
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let (reader, _) = IVFReader::new(Cursor::new(self.data.clone()))
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        self.reader = reader;
        self.consumed = IVF_FILE_HEADER_LEN;
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.consumed >= self.data.len() as u64
    }
}

#[async_trait]
impl FrameSource for IvfFileSource {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, SourceError> {
        let frame_interval = self.frame_interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;

        loop {
            match self.reader.parse_next_frame() {
                Ok((payload, header)) => {
                    self.consumed += IVF_FRAME_HEADER_LEN + header.frame_size as u64;
                    return Ok(Some(VideoFrame::new(
                        self.width,
                        self.height,
                        payload.freeze(),
                        self.frame_interval,
                    )));
                }
                Err(e) if self.at_end() => {
                    if !self.looping || self.data.len() as u64 <= IVF_FILE_HEADER_LEN {
                        tracing::debug!("IVF source reached end of stream: {}", e);
                        return Ok(None);
                    }
                    tracing::debug!("IVF source looping back to first frame");
                    self.rewind()?;
                }
                Err(e) => return Err(SourceError::Malformed(e.to_string())),
            }
        }
    }
}

/// Opens the same IVF file for every session
pub struct IvfSourceFactory {
    data: Bytes,
    codec: VideoCodec,
    looping: bool,
}

impl IvfSourceFactory {
    /// Read and validate the file once so codec problems surface at startup
    pub async fn new(path: impl Into<PathBuf>, looping: bool) -> Result<Self, SourceError> {
        let path = path.into();
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| SourceError::Open {
                path: path.clone(),
                source,
            })?;
        let data = Bytes::from(data);
        let parsed = IvfFileSource::from_bytes(data.clone(), looping)?;

        let (width, height) = parsed.dimensions();
        tracing::info!(
            "Upstream source {} ({:?}, {}x{}, {:?} per frame)",
            path.display(),
            parsed.codec(),
            width,
            height,
            parsed.frame_interval()
        );

        Ok(Self {
            data,
            codec: parsed.codec(),
            looping,
        })
    }
}

#[async_trait]
impl FrameSourceFactory for IvfSourceFactory {
    async fn open(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        let source = IvfFileSource::from_bytes(self.data.clone(), self.looping)?;
        Ok(Box::new(source))
    }

    fn codec(&self) -> VideoCodec {
        self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivf_file(fourcc: &[u8; 4], width: u16, height: u16, frames: &[&[u8]]) -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(b"DKIF");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        // timebase 1000/1: one millisecond per frame keeps tests fast
        out.extend_from_slice(&1000u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for (i, frame) in frames.iter().enumerate() {
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&(i as u64).to_le_bytes());
            out.extend_from_slice(frame);
        }
        Bytes::from(out)
    }

    #[tokio::test]
    async fn test_reads_frames_then_ends() {
        let data = ivf_file(b"VP80", 640, 480, &[&[1, 2, 3], &[4, 5]]);
        let mut source = IvfFileSource::from_bytes(data, false).unwrap();
        assert_eq!(source.codec(), VideoCodec::VP8);
        assert_eq!(source.dimensions(), (640, 480));

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.dimensions(), (640, 480));
        assert_eq!(first.data.as_ref(), &[1, 2, 3]);

        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.data.as_ref(), &[4, 5]);

        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_looping_source_restarts() {
        let data = ivf_file(b"VP80", 320, 240, &[&[9]]);
        let mut source = IvfFileSource::from_bytes(data, true).unwrap();

        for _ in 0..3 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.data.as_ref(), &[9]);
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let mut data = ivf_file(b"VP80", 320, 240, &[&[1, 2, 3, 4]]).to_vec();
        data.truncate(data.len() - 2);
        let mut source = IvfFileSource::from_bytes(Bytes::from(data), false).unwrap();

        assert!(matches!(
            source.next_frame().await,
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_fourcc_rejected() {
        let data = ivf_file(b"H264", 320, 240, &[]);
        assert!(matches!(
            IvfFileSource::from_bytes(data, false),
            Err(SourceError::UnsupportedCodec(_))
        ));
    }

    #[tokio::test]
    async fn test_factory_reports_missing_file() {
        let result = IvfSourceFactory::new("/nonexistent/framerelay.ivf", false).await;
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }
}
