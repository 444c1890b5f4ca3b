//! framerelay server library
//!
//! Exposes the signaling API, session lifecycle and relay tasks for testing
//! and embedding.

pub mod api;
pub mod error;
pub mod relay;
pub mod rtc;
pub mod session;
pub mod state;

use anyhow::Result;
use framerelay_media::FrameSourceFactory;
use std::sync::Arc;

/// Create and configure the server application
pub fn create_app(
    config: &state::Config,
    sources: Arc<dyn FrameSourceFactory>,
) -> Result<(axum::Router, state::AppState)> {
    let app_state = state::AppState::new(config, sources)?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
