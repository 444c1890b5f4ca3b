use std::sync::Arc;
use std::time::Duration;

use framerelay_media::FrameSourceFactory;

use super::TaskExit;
use crate::error::SessionError;
use crate::session::{Session, TaskKind};

/// When a negotiated session starts receiving upstream frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayActivation {
    /// Right after the answer is ready
    Immediate,
    /// On the first inbound video track from the peer
    OnInboundTrack,
    /// After a fixed delay, cancelled if the session closes first
    FixedDelay(Duration),
}

/// Start relaying for `session`, logging instead of failing.
pub async fn activate(session: &Session, sources: &dyn FrameSourceFactory) -> TaskExit {
    match session.activate_relay(sources).await {
        Ok(true) => {
            tracing::info!("Relay activated for session {}", session.id());
            TaskExit::Completed
        }
        Ok(false) => {
            tracing::debug!("Session {} closed before relay activation", session.id());
            TaskExit::Cancelled
        }
        Err(SessionError::RelayAlreadyActive(id)) => {
            tracing::debug!("Relay already running for session {}", id);
            TaskExit::Completed
        }
        Err(e) => {
            tracing::warn!("Relay activation failed for session {}: {}", session.id(), e);
            TaskExit::Failed(e.to_string())
        }
    }
}

/// Schedule activation after `delay` as a task owned by the session.
///
/// Returns `false` if the session is already closing.
pub fn schedule_activation(
    session: &Arc<Session>,
    delay: Duration,
    sources: Arc<dyn FrameSourceFactory>,
) -> bool {
    let target = Arc::downgrade(session);
    tracing::debug!(
        "Relay for session {} activates in {:?}",
        session.id(),
        delay
    );

    session.spawn_task(TaskKind::Activation, move |cancel| async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => TaskExit::Cancelled,
            _ = tokio::time::sleep(delay) => match target.upgrade() {
                Some(session) => activate(&session, sources.as_ref()).await,
                None => TaskExit::Cancelled,
            },
        }
    })
}
