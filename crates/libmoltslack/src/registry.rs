use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moltslack_protocol::{SessionId, SessionSummary};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::MoltError;
use crate::session::Session;

/// Owns every session in the process, keyed by identifier.
///
/// Dead sessions stay registered (with `alive = false`) until shutdown.
pub struct SessionRegistry {
    config: EngineConfig,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn open(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a shell in `working_directory` and register it.
    ///
    /// An empty title becomes `chat-<id>`; an empty directory falls back to
    /// the configured default, then the current directory.
    pub fn create(
        &self,
        title: &str,
        working_directory: &str,
    ) -> Result<SessionSummary, MoltError> {
        let cwd = if working_directory.trim().is_empty() {
            match &self.config.default_cwd {
                Some(dir) => resolve_working_directory(&dir.to_string_lossy())?,
                None => resolve_working_directory(".")?,
            }
        } else {
            resolve_working_directory(working_directory)?
        };

        let mut sessions = self.lock();
        let id = loop {
            let candidate = short_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let title = match title.trim() {
            "" => format!("chat-{id}"),
            t => t.to_string(),
        };

        let session = Session::start(id.clone(), title, cwd, &self.config)?;
        let summary = session.summary();
        sessions.insert(id, session);
        info!(session_id = %summary.id, title = %summary.title, "session registered");
        Ok(summary)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, MoltError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| MoltError::SessionNotFound(id.to_string()))
    }

    /// Snapshot of all sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| {
            a.created_at_epoch_ms
                .cmp(&b.created_at_epoch_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop every session. Safe to call more than once.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        for session in &sessions {
            session.stop();
        }
        info!(sessions = sessions.len(), "registry shut down");
    }
}

fn short_id() -> SessionId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Expand `~`, anchor relative paths at the current directory, and require
/// an existing directory.
pub fn resolve_working_directory(raw: &str) -> Result<PathBuf, MoltError> {
    let raw = raw.trim();
    let invalid = || MoltError::InvalidPath(raw.to_string());

    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = std::env::var_os("HOME").ok_or_else(invalid)?;
            PathBuf::from(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(raw),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    let resolved = absolute.canonicalize().map_err(|_| invalid())?;
    if !resolved.is_dir() {
        return Err(invalid());
    }
    Ok(resolved)
}
