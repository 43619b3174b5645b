// Session registry.
//
// Handlers receive the store by reference instead of touching a global map.
// Each session sits behind its own async mutex: holding the guard serializes
// uploads, analysis and export for that session while other sessions proceed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use super::{Session, SessionId};
use crate::error::SessionError;

pub type SessionHandle = Arc<Mutex<Session>>;

pub trait SessionStore: Send + Sync {
    /// Create, register and return a fresh empty session.
    fn create(&self) -> Result<SessionHandle, SessionError>;

    fn get(&self, id: &SessionId) -> Option<SessionHandle>;

    /// Register (or replace) a session under its own id.
    fn put(&self, session: Session) -> SessionHandle;

    /// Unregister a session. Its scratch storage is released once the last
    /// handle is dropped.
    fn delete(&self, id: &SessionId) -> Option<SessionHandle>;

    fn ids(&self) -> Vec<SessionId>;

    /// Delete every session unused for longer than `max_idle`. Sessions
    /// currently locked by a request are skipped. Returns the ids removed.
    fn expire_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let mut expired = Vec::new();
        for id in self.ids() {
            let Some(handle) = self.get(&id) else {
                continue;
            };
            let stale = match handle.try_lock() {
                Ok(session) => session.idle_for() > max_idle,
                Err(_) => false,
            };
            if stale && self.delete(&id).is_some() {
                expired.push(id);
            }
        }
        expired
    }
}

/// In-process store; sessions live until deleted or expired.
pub struct MemorySessionStore {
    scratch_root: PathBuf,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl MemorySessionStore {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> Result<SessionHandle, SessionError> {
        let session = Session::new(SessionId::generate(), &self.scratch_root)?;
        Ok(self.put(session))
    }

    fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(id).cloned()
    }

    fn put(&self, session: Session) -> SessionHandle {
        let id = session.id().clone();
        let handle = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(id, handle.clone());
        handle
    }

    fn delete(&self, id: &SessionId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let removed = sessions.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    fn ids(&self) -> Vec<SessionId> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<SessionId> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}
