//! Per-project shell sessions
//!
//! Sessions live only in process memory. A restart resets every project to
//! the workspace directory, and a multi-instance deployment needs sticky
//! routing so a project's commands reach the same process.

use chrono::{DateTime, Utc};
use devforge_config::SessionConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bootstrap::WORKSPACE_DIR;

/// Identifies one (user, project) session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub project_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.user_id, self.project_id)
    }
}

/// Emulated shell state for one project
#[derive(Debug, Clone)]
pub struct ShellSession {
    current_dir: String,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl ShellSession {
    fn new(entry_dir: &str) -> Self {
        Self {
            current_dir: entry_dir.to_string(),
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
        }
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    /// Only called once the container has confirmed the directory
    pub(crate) fn set_current_dir(&mut self, dir: impl Into<String>) {
        self.current_dir = dir.into();
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            current_dir: self.current_dir.clone(),
            last_activity: self.last_activity_at,
        }
    }
}

/// Snapshot returned by session queries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub current_dir: String,
    pub last_activity: DateTime<Utc>,
}

type SessionSlot = Arc<tokio::sync::Mutex<ShellSession>>;

/// Owns every live session and serializes commands per session
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
    timeout: Duration,
    entry_dir: String,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            entry_dir: WORKSPACE_DIR.to_string(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn entry_dir(&self) -> &str {
        &self.entry_dir
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Exclusive access to the session for `key`, creating it if needed.
    ///
    /// Holding the guard blocks other commands for the same project, so
    /// callers keep it for a whole command round-trip. An expired session is
    /// reset to the entry directory before being handed out.
    pub async fn lock(&self, key: &SessionKey) -> OwnedMutexGuard<ShellSession> {
        loop {
            let slot = self
                .map()
                .entry(key.clone())
                .or_insert_with(|| {
                    tracing::debug!("Creating shell session {}", key);
                    Arc::new(tokio::sync::Mutex::new(ShellSession::new(&self.entry_dir)))
                })
                .clone();

            let mut guard = slot.clone().lock_owned().await;

            // The slot may have been cleared or reaped while we waited
            let still_current = self
                .map()
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot));
            if !still_current {
                continue;
            }

            if guard.is_expired(self.timeout) {
                tracing::debug!(
                    "Shell session {} expired, resetting to {}",
                    key,
                    self.entry_dir
                );
                *guard = ShellSession::new(&self.entry_dir);
            }
            return guard;
        }
    }

    /// Current state of a session, creating it if needed
    pub async fn session(&self, user_id: &str, project_id: &str) -> SessionInfo {
        self.lock(&SessionKey::new(user_id, project_id)).await.info()
    }

    /// Forget a session. Returns true if one existed.
    pub fn clear(&self, user_id: &str, project_id: &str) -> bool {
        self.map()
            .remove(&SessionKey::new(user_id, project_id))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Drop idle sessions. Sessions busy running a command are skipped.
    pub fn reap_expired(&self) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, slot| match slot.try_lock() {
            Ok(session) => !session.is_expired(self.timeout),
            Err(_) => true,
        });
        before - map.len()
    }

    /// Run [`reap_expired`](Self::reap_expired) every `every` until the
    /// returned handle is dropped or the manager goes away
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> ReaperHandle {
        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let reaped = manager.reap_expired();
                if reaped > 0 {
                    tracing::debug!("Reaped {} idle shell sessions", reaped);
                }
            }
        });
        ReaperHandle { task }
    }
}

/// Stops the session sweep when dropped
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
