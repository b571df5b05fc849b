//! Live session registry, indexed by user.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::session::{Session, SessionId};
use crate::domain::UserId;

/// All currently connected sessions, grouped by user.
///
/// A user may hold any number of concurrent sessions; each receives the
/// same frames.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<UserId, HashMap<SessionId, Arc<Session>>>>,
    replay_capacity: usize,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions buffer up to
    /// `replay_capacity` reliable frames.
    #[must_use]
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            replay_capacity,
        }
    }

    /// Registers a new session for `user_id`.
    pub fn connect(&self, user_id: UserId) -> Arc<Session> {
        let session = Arc::new(Session::new(user_id, self.replay_capacity));
        self.sessions
            .write()
            .entry(user_id)
            .or_default()
            .insert(session.id(), Arc::clone(&session));
        tracing::info!(session_id = %session.id(), %user_id, "session connected");
        session
    }

    /// Removes a session. Returns `false` if it was already gone.
    pub fn disconnect(&self, session: &Session) -> bool {
        let user_id = session.user_id();
        let mut sessions = self.sessions.write();
        let Some(by_id) = sessions.get_mut(&user_id) else {
            return false;
        };
        let removed = by_id.remove(&session.id()).is_some();
        if by_id.is_empty() {
            sessions.remove(&user_id);
        }
        if removed {
            tracing::info!(session_id = %session.id(), %user_id, "session disconnected");
        }
        removed
    }

    /// Collects the sessions of every listed user.
    #[must_use]
    pub fn sessions_for(&self, users: &[UserId]) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read();
        users
            .iter()
            .filter_map(|user| sessions.get(user))
            .flat_map(|by_id| by_id.values().map(Arc::clone))
            .collect()
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().values().map(HashMap::len).sum()
    }

    /// Number of users with at least one session.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.sessions.read().len()
    }
}
