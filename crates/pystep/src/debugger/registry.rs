//! The process-scoped store of debugging sessions.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{
    limits::DebugLimits,
    session::DebugSession,
    state::{Breakpoints, SessionState, SessionSummary, VariableEntry},
};

// =============================================================================
// Error types
// =============================================================================

/// Errors returned by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    /// No live session has the given id.
    NotFound(String),
}

impl fmt::Display for DebugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "session not found: {id}"),
        }
    }
}

impl std::error::Error for DebugError {}

// =============================================================================
// Registry
// =============================================================================

/// Owns every live session, keyed by id.
///
/// The map lock is only held to look up, insert or remove a session. Blocking
/// operations run on the session's own `Arc` so one slow step never stalls
/// other sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<DebugSession>>>,
    limits: DebugLimits,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(limits: DebugLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> DebugLimits {
        self.limits
    }

    /// Creates a session for `code`. `test_case` becomes the program's
    /// standard input.
    pub fn create_session(&self, code: &str, test_case: Option<&str>) -> SessionState {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(DebugSession::new(
            id.clone(),
            code,
            test_case.map(str::to_owned),
            BTreeSet::new(),
            self.limits,
        ));
        let state = session.state();
        self.map().insert(id.clone(), session);
        tracing::info!(%id, "session created");
        state
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn get_session(&self, id: &str) -> Result<SessionState, DebugError> {
        Ok(self.session(id)?.state())
    }

    /// Removes a session, cancelling its worker and deleting its artifact.
    /// Returns whether the session existed.
    pub fn delete_session(&self, id: &str) -> bool {
        let removed = self.map().remove(id);
        match removed {
            Some(session) => {
                session.cancel();
                tracing::info!(%id, "session deleted");
                true
            }
            None => false,
        }
    }

    /// Replaces a session with a fresh one that keeps its id, source, test
    /// case and breakpoints.
    ///
    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn reset_session(&self, id: &str) -> Result<SessionState, DebugError> {
        let mut sessions = self.map();
        let old = sessions.get(id).ok_or_else(|| DebugError::NotFound(id.to_owned()))?;
        old.cancel();
        let fresh = Arc::new(old.renewed());
        let state = fresh.state();
        sessions.insert(id.to_owned(), fresh);
        tracing::info!(%id, "session reset");
        Ok(state)
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn start_execution(&self, id: &str) -> Result<SessionState, DebugError> {
        Ok(self.session(id)?.start_execution())
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn step_forward(&self, id: &str) -> Result<SessionState, DebugError> {
        Ok(self.session(id)?.step_forward())
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn run_to_completion(&self, id: &str) -> Result<SessionState, DebugError> {
        Ok(self.session(id)?.run_to_completion())
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn continue_execution(&self, id: &str) -> Result<SessionState, DebugError> {
        Ok(self.session(id)?.continue_execution())
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn toggle_breakpoint(&self, id: &str, line: u32) -> Result<Breakpoints, DebugError> {
        Ok(self.session(id)?.toggle_breakpoint(line))
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn get_breakpoints(&self, id: &str) -> Result<Breakpoints, DebugError> {
        Ok(self.session(id)?.breakpoints())
    }

    /// The chronological variable log.
    ///
    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn get_variables(&self, id: &str) -> Result<Vec<VariableEntry>, DebugError> {
        Ok(self.session(id)?.variables())
    }

    /// The latest value of every logged name.
    ///
    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn get_latest_variables(&self, id: &str) -> Result<Vec<VariableEntry>, DebugError> {
        Ok(self.session(id)?.latest_variables())
    }

    /// # Errors
    ///
    /// Returns `DebugError::NotFound` if the session does not exist.
    pub fn get_execution_state(&self, id: &str) -> Result<SessionState, DebugError> {
        self.get_session(id)
    }

    /// Summaries of every live session, sorted by id.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<DebugSession>> = self.map().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = sessions.iter().map(|session| session.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Deletes every session idle for longer than the session TTL and
    /// returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.limits.session_ttl;
        let expired: Vec<Arc<DebugSession>> = {
            let mut sessions = self.map();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.idle() > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            session.cancel();
            tracing::info!(id = session.id(), "session expired");
        }
        expired.len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a session and marks it as used.
    fn session(&self, id: &str) -> Result<Arc<DebugSession>, DebugError> {
        let session = self
            .map()
            .get(id)
            .cloned()
            .ok_or_else(|| DebugError::NotFound(id.to_owned()))?;
        session.touch();
        Ok(session)
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<DebugSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
