use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Session;
use crate::error::SessionError;

struct Registered {
    /// Registration order, used to keep snapshots stable
    seq: u64,
    session: Arc<Session>,
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    sessions: HashMap<Uuid, Registered>,
}

/// Process-wide table of live sessions
pub struct SessionRegistry {
    entries: RwLock<Entries>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    pub async fn register(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let mut entries = self.entries.write().await;
        let id = session.id();
        if entries.sessions.contains_key(&id) {
            tracing::error!("Session {} registered twice", id);
            return Err(SessionError::DuplicateSession(id));
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.sessions.insert(id, Registered { seq, session });

        tracing::info!(
            "Registered session {} ({} active)",
            id,
            entries.sessions.len()
        );
        Ok(())
    }

    pub async fn unregister(&self, id: Uuid) -> Option<Arc<Session>> {
        let mut entries = self.entries.write().await;
        let removed = entries.sessions.remove(&id).map(|r| r.session);
        if removed.is_some() {
            tracing::info!(
                "Unregistered session {} ({} active)",
                id,
                entries.sessions.len()
            );
        }
        removed
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.entries
            .read()
            .await
            .sessions
            .get(&id)
            .map(|r| r.session.clone())
    }

    /// Snapshot of every registered session in registration order
    pub async fn all(&self) -> Vec<Arc<Session>> {
        let entries = self.entries.read().await;
        let mut registered: Vec<&Registered> = entries.sessions.values().collect();
        registered.sort_by_key(|r| r.seq);
        registered.into_iter().map(|r| r.session.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
