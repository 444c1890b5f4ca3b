//! Wire types for framerelay signaling.
//!
//! The browser posts an offer as `{ "sdp": ..., "type": "offer" }` and gets
//! the answer back in the same shape.

pub mod messages;

pub use messages::*;
