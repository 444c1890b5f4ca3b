//! A single negotiated peer connection and the tasks it owns

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use framerelay_media::{FrameRelayBuffer, FrameSource, FrameSourceFactory};

use crate::error::SessionError;
use crate::relay::{FrameSink, OutboundPump, RelayStats, TaskExit, UpstreamConsumer};

/// Negotiation lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    RemoteSet,
    AnswerReady,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Created, SessionState::RemoteSet) => true,
            (SessionState::RemoteSet, SessionState::AnswerReady) => true,
            (current, SessionState::Closed | SessionState::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// What a session-owned task does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Pulls upstream frames into the freshness buffer
    Upstream,
    /// Writes buffered frames to the outbound track
    Outbound,
    /// Reads RTCP for the outbound sender
    Rtcp,
    /// Handles peer connection events
    Events,
    /// Delayed relay activation
    Activation,
}

struct SessionTask {
    kind: TaskKind,
    /// Taken when the session closes and joins the task
    handle: Option<JoinHandle<TaskExit>>,
    exit: Option<TaskExit>,
}

impl SessionTask {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    peer_connection: Arc<RTCPeerConnection>,
    outbound_track: Arc<TrackLocalStaticSample>,
    buffer: Arc<FrameRelayBuffer>,
    stats: Arc<RelayStats>,
    state: RwLock<SessionState>,
    /// Append-only; entries keep their exit after the task is joined
    consumers: Mutex<Vec<SessionTask>>,
    cancel: CancellationToken,
    closed: OnceCell<Result<(), String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        peer_connection: Arc<RTCPeerConnection>,
        outbound_track: Arc<TrackLocalStaticSample>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            peer_connection,
            outbound_track,
            buffer: Arc::new(FrameRelayBuffer::new()),
            stats: Arc::new(RelayStats::default()),
            state: RwLock::new(SessionState::Created),
            consumers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            closed: OnceCell::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.peer_connection.local_description().await
    }

    pub async fn remote_description(&self) -> Option<RTCSessionDescription> {
        self.peer_connection.remote_description().await
    }

    /// False once the session has started closing
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub async fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: *state,
                to: next,
            });
        }

        tracing::debug!("Session {} {:?} -> {:?}", self.id, *state, next);
        *state = next;
        Ok(())
    }

    /// Spawn a task owned by this session.
    ///
    /// The task gets a child of the session's cancellation token. Returns
    /// `false` without spawning once the session is closing.
    pub fn spawn_task<F, Fut>(&self, kind: TaskKind, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskExit> + Send + 'static,
    {
        let mut consumers = self.lock_consumers();
        self.push_task(&mut consumers, kind, task)
    }

    /// Start the upstream consumer with `source`, and the outbound pump if it
    /// is not running yet.
    ///
    /// Returns `Ok(false)` if the session is already closing.
    pub fn start_upstream(&self, source: Box<dyn FrameSource>) -> Result<bool, SessionError> {
        let mut consumers = self.lock_consumers();
        if self.cancel.is_cancelled() {
            return Ok(false);
        }
        if consumers
            .iter()
            .any(|t| t.kind == TaskKind::Upstream && t.is_running())
        {
            return Err(SessionError::RelayAlreadyActive(self.id));
        }

        let consumer =
            UpstreamConsumer::new(self.id, source, self.buffer.clone(), self.stats.clone());
        self.push_task(&mut consumers, TaskKind::Upstream, move |cancel| {
            consumer.run(cancel)
        });

        if !consumers.iter().any(|t| t.kind == TaskKind::Outbound) {
            let sink: Arc<dyn FrameSink> = self.outbound_track.clone();
            let pump = OutboundPump::new(self.id, self.buffer.clone(), sink, self.stats.clone());
            self.push_task(&mut consumers, TaskKind::Outbound, move |cancel| pump.run(cancel));
        }

        Ok(true)
    }

    /// Open a fresh upstream source and start relaying it.
    ///
    /// A no-op returning `Ok(false)` if the session already closed.
    pub async fn activate_relay(
        &self,
        sources: &dyn FrameSourceFactory,
    ) -> Result<bool, SessionError> {
        if !self.is_live() {
            return Ok(false);
        }
        if self.upstream_running() {
            return Err(SessionError::RelayAlreadyActive(self.id));
        }

        let source = sources.open().await?;
        self.start_upstream(source)
    }

    pub fn upstream_running(&self) -> bool {
        self.lock_consumers()
            .iter()
            .any(|t| t.kind == TaskKind::Upstream && t.is_running())
    }

    /// Every task this session ever started, with its exit once joined
    pub fn task_exits(&self) -> Vec<(TaskKind, Option<TaskExit>)> {
        self.lock_consumers()
            .iter()
            .map(|t| (t.kind, t.exit.clone()))
            .collect()
    }

    /// Signal every owned task to stop without waiting for them
    pub fn cancel_tasks(&self) {
        self.cancel.cancel();
    }

    /// Mark negotiation as failed and tear the session down
    pub async fn fail(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            if !state.is_terminal() {
                *state = SessionState::Failed;
            }
        }
        self.close().await
    }

    /// Cancel and join every owned task, then close the peer connection.
    ///
    /// Concurrent and repeated calls wait for the same single close.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.closed
            .get_or_init(|| self.close_inner())
            .await
            .clone()
            .map_err(SessionError::Close)
    }

    async fn close_inner(&self) -> Result<(), String> {
        {
            let mut state = self.state.write().await;
            if !state.is_terminal() {
                *state = SessionState::Closed;
            }
        }
        self.cancel.cancel();

        let pending: Vec<(usize, JoinHandle<TaskExit>)> = self
            .lock_consumers()
            .iter_mut()
            .enumerate()
            .filter_map(|(index, task)| task.handle.take().map(|handle| (index, handle)))
            .collect();

        for (index, handle) in pending {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(e) if e.is_cancelled() => TaskExit::Cancelled,
                Err(e) => TaskExit::Failed(e.to_string()),
            };
            if let TaskExit::Failed(reason) = &exit {
                tracing::warn!("Session {} task ended with error: {}", self.id, reason);
            }
            self.lock_consumers()[index].exit = Some(exit);
        }

        let age = Utc::now() - self.created_at;
        tracing::info!(
            "Closing session {} after {}s ({} frames received, {} sent, {} dropped)",
            self.id,
            age.num_seconds(),
            self.stats.frames_received(),
            self.stats.frames_sent(),
            self.buffer.dropped()
        );
        self.peer_connection.close().await.map_err(|e| e.to_string())
    }

    fn push_task<F, Fut>(&self, consumers: &mut Vec<SessionTask>, kind: TaskKind, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskExit> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            tracing::debug!("Session {} is closing, not starting {:?}", self.id, kind);
            return false;
        }

        let handle = tokio::spawn(task(self.cancel.child_token()));
        consumers.push(SessionTask {
            kind,
            handle: Some(handle),
            exit: None,
        });
        true
    }

    fn lock_consumers(&self) -> MutexGuard<'_, Vec<SessionTask>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
