//! Peer session lifecycle
//!
//! A `Session` is created per offer by the `SignalingHandshake`, tracked in the
//! process-wide `SessionRegistry`, and torn down either by a terminal peer
//! connection state or by the `ShutdownCoordinator` at process exit.

mod echo;
mod events;
mod handshake;
mod lifecycle;
mod registry;
mod shutdown;

pub use echo::{DataChannelEcho, EchoTarget, ACKNOWLEDGMENT};
pub use events::{run_session_events, wire_peer_events, SessionEvent};
pub use handshake::SignalingHandshake;
pub use lifecycle::{Session, SessionState, TaskKind};
pub use registry::SessionRegistry;
pub use shutdown::{GracefulClose, SessionCloser, ShutdownCoordinator};

use framerelay_media::FrameSourceFactory;
use std::sync::Arc;

use crate::error::SessionError;
use crate::relay::RelayActivation;

/// Everything a session needs from the process around it
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub sources: Arc<dyn FrameSourceFactory>,
    pub activation: RelayActivation,
    pub echo: Arc<DataChannelEcho>,
}

/// Close a session and drop it from the registry
pub async fn teardown(registry: &SessionRegistry, session: &Session) -> Result<(), SessionError> {
    let result = session.close().await;
    registry.unregister(session.id()).await;
    result
}
