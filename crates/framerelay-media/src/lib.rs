//! Media plumbing for framerelay
//!
//! This crate provides the pieces that sit between an upstream feed and an
//! outbound WebRTC track:
//! - `VideoFrame`, the unit handed from stage to stage
//! - `FrameRelayBuffer`, a single-slot buffer that keeps only the newest frame
//! - `FrameSource`, the upstream abstraction, and an IVF file implementation
//! - `VideoCodec`, mapping container codecs to RTP capabilities

pub mod buffer;
pub mod codec;
pub mod frame;
pub mod source;

pub use buffer::FrameRelayBuffer;
pub use codec::VideoCodec;
pub use frame::VideoFrame;
pub use source::{FrameSource, FrameSourceFactory, IvfFileSource, IvfSourceFactory, SourceError};
