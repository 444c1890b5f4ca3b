use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::{Session, SessionRegistry};
use crate::error::{SessionError, ShutdownError};

/// How the coordinator closes one session
#[async_trait]
pub trait SessionCloser: Send + Sync {
    async fn close(&self, session: &Session) -> Result<(), SessionError>;
}

/// Cancels and joins the session's tasks, then closes its peer connection
pub struct GracefulClose;

#[async_trait]
impl SessionCloser for GracefulClose {
    async fn close(&self, session: &Session) -> Result<(), SessionError> {
        session.close().await
    }
}

/// Closes every registered session at process exit
pub struct ShutdownCoordinator {
    registry: Arc<SessionRegistry>,
    timeout: Duration,
    closer: Arc<dyn SessionCloser>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            closer: Arc::new(GracefulClose),
        }
    }

    pub fn with_closer(mut self, closer: Arc<dyn SessionCloser>) -> Self {
        self.closer = closer;
        self
    }

    /// Cancel all session tasks, then close every session concurrently.
    ///
    /// Returns the number of sessions closed. One session failing to close
    /// does not stop the others; failures are collected and returned together.
    pub async fn run(&self) -> Result<usize, ShutdownError> {
        let sessions = self.registry.all().await;
        if sessions.is_empty() {
            tracing::info!("No sessions to close");
            return Ok(0);
        }

        tracing::info!("Closing {} session(s)", sessions.len());
        for session in &sessions {
            session.cancel_tasks();
        }

        let registry = &self.registry;
        let closer = self.closer.as_ref();
        let closes = sessions.iter().map(|session| async move {
            let result = closer.close(session).await;
            registry.unregister(session.id()).await;
            (session.id(), result)
        });

        let results = match tokio::time::timeout(self.timeout, join_all(closes)).await {
            Ok(results) => results,
            Err(_) => {
                let remaining = self.registry.len().await;
                tracing::error!(
                    "Shutdown timed out after {:?} with {} session(s) left",
                    self.timeout,
                    remaining
                );
                return Err(ShutdownError::TimedOut { remaining });
            }
        };

        let total = results.len();
        let failures: Vec<_> = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect();

        if failures.is_empty() {
            tracing::info!("Closed {} session(s)", total);
            Ok(total)
        } else {
            for (id, e) in &failures {
                tracing::warn!("Session {} failed to close: {}", id, e);
            }
            Err(ShutdownError::Aggregate { failures })
        }
    }
}
