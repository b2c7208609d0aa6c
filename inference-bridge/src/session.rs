//! Session registry for sticky model selection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// A client session pinned to one model.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier. Never zero.
    pub id: u64,
    /// Model used by requests that do not name one.
    pub sticky_model: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Requests resolved through this session.
    pub request_count: u64,
}

#[derive(Debug)]
struct Sessions {
    next_id: u64,
    live: HashMap<u64, Session>,
}

/// Registry of live sessions.
///
/// Ids are handed out from a counter starting at 1 and are never reused, even
/// after the session is closed. Id 0 always means "no session".
#[derive(Debug)]
pub struct SessionRegistry {
    default_model: String,
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    /// Create an empty registry falling back to `default_model`.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            sessions: Mutex::new(Sessions {
                next_id: 1,
                live: HashMap::new(),
            }),
        }
    }

    /// Open a session pinned to `model`, or to the default model.
    pub async fn create(&self, model: Option<String>) -> u64 {
        let mut sessions = self.sessions.lock().await;
        let id = sessions.next_id;
        sessions.next_id += 1;

        let session = Session {
            id,
            sticky_model: model.unwrap_or_else(|| self.default_model.clone()),
            created_at: Utc::now(),
            request_count: 0,
        };
        tracing::info!(session_id = id, model = %session.sticky_model, "Session created");
        sessions.live.insert(id, session);

        id
    }

    /// Close a session. Unknown ids are ignored. Returns whether one was removed.
    pub async fn close(&self, id: u64) -> bool {
        let removed = self.sessions.lock().await.live.remove(&id).is_some();
        if removed {
            tracing::info!(session_id = id, "Session closed");
        }
        removed
    }

    /// Pick the model for a request on session `id`.
    ///
    /// An explicit model always wins but still counts as a request on a live
    /// session. Otherwise the session's sticky model is used, and the default
    /// model when `id` is 0 or not live.
    pub async fn resolve_model(&self, id: u64, explicit: Option<&str>) -> String {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.live.get_mut(&id);

        match (explicit, session) {
            (Some(model), Some(session)) => {
                session.request_count += 1;
                model.to_string()
            }
            (Some(model), None) => model.to_string(),
            (None, Some(session)) => {
                session.request_count += 1;
                session.sticky_model.clone()
            }
            (None, None) => self.default_model.clone(),
        }
    }

    /// Snapshot of a live session.
    pub async fn get(&self, id: u64) -> Option<Session> {
        self.sessions.lock().await.live.get(&id).cloned()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
