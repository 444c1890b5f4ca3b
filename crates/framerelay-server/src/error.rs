use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use framerelay_media::SourceError;
use framerelay_protocol::ErrorBody;
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

/// Errors local to one session. They never leak into other sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Session {0} is already registered")]
    DuplicateSession(Uuid),

    #[error("Relay already active for session {0}")]
    RelayAlreadyActive(Uuid),

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Upstream source error: {0}")]
    Upstream(#[from] SourceError),

    #[error("Transport error: {0}")]
    Transport(#[from] webrtc::Error),

    #[error("Failed to close session: {0}")]
    Close(String),
}

impl SessionError {
    pub fn negotiation(err: impl std::fmt::Display) -> Self {
        SessionError::Negotiation(err.to_string())
    }
}

/// Outcome of a coordinated shutdown that could not close everything cleanly
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("{} session(s) failed to close", .failures.len())]
    Aggregate { failures: Vec<(Uuid, SessionError)> },

    #[error("Shutdown timed out with {remaining} session(s) still registered")]
    TimedOut { remaining: usize },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Negotiation(msg) => AppError::Negotiation(msg),
            SessionError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Negotiation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
