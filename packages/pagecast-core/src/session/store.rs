//! In-process session registry and receiver bindings.
//!
//! Both maps are deliberately simple: create/delete on the control-plane
//! path and short reads from status handlers, each behind a single mutex.
//! Cross-session coordination happens nowhere else.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::session::{Session, StartRequest};

/// Registry mapping session id to its record.
pub struct SessionStore {
    root: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory under which per-session directories are created.
    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Creates a session: fresh id, exclusive directory, `Starting` state.
    pub fn create(
        &self,
        display: String,
        request: StartRequest,
    ) -> std::io::Result<Arc<Session>> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir)?;

        let session = Arc::new(Session::new(id.clone(), dir, display, request));
        self.sessions.lock().insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Removes a session record and deletes its directory (best-effort).
    ///
    /// Returns the removed record, if any.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.lock().remove(id)?;
        session.cleanup();
        Some(session)
    }

    /// Snapshot of all live sessions.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }
}

/// Process-wide mapping asserting which session controls which receiver.
///
/// Lives outside the session record so teardown can release a binding even
/// after the record is gone.
#[derive(Default)]
pub struct ReceiverBindings {
    inner: Mutex<HashMap<String, String>>,
}

impl ReceiverBindings {
    /// Creates an empty binding registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `receiver_name` to `session_id` if the name is free.
    ///
    /// Returns `true` when the binding was inserted or already belongs to
    /// this session; `false` when another session holds the receiver.
    pub fn try_bind(&self, receiver_name: &str, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(receiver_name) {
            Some(holder) => holder == session_id,
            None => {
                inner.insert(receiver_name.to_string(), session_id.to_string());
                true
            }
        }
    }

    /// Removes the binding if it belongs to `session_id`.
    ///
    /// Returns whether a binding was removed.
    pub fn release_if(&self, receiver_name: &str, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(receiver_name) {
            Some(holder) if holder == session_id => {
                inner.remove(receiver_name);
                true
            }
            _ => false,
        }
    }

    /// The session currently bound to `receiver_name`, if any.
    #[must_use]
    pub fn holder(&self, receiver_name: &str) -> Option<String> {
        self.inner.lock().get(receiver_name).cloned()
    }
}
