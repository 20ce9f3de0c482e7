//! Timeouts, ceilings and expiry settings for debugging sessions.

use std::time::Duration;

/// Default wall-clock ceiling for one blocking start/step wait.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of steps `run_to_completion` takes before giving up.
pub const DEFAULT_MAX_RUN_STEPS: usize = 1000;

/// Default idle time after which `sweep_expired` removes a session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Stack size of session worker threads, large enough for the default
/// recursion limit of the tree-walking interpreter.
pub(crate) const WORKER_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Timeouts and ceilings shared by every session of a registry.
///
/// Use `DebugLimits::new()` for the defaults and the builder methods to
/// override individual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLimits {
    /// Maximum time `start_execution`/`step_forward` block waiting for the worker.
    pub step_timeout: Duration,
    /// Maximum number of steps one `run_to_completion` call takes.
    pub max_run_steps: usize,
    /// Idle time after which a session is considered expired.
    pub session_ttl: Duration,
}

impl Default for DebugLimits {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            max_run_steps: DEFAULT_MAX_RUN_STEPS,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl DebugLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-step wait ceiling.
    #[must_use]
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Sets the `run_to_completion` iteration ceiling.
    #[must_use]
    pub fn max_run_steps(mut self, steps: usize) -> Self {
        self.max_run_steps = steps;
        self
    }

    /// Sets the idle time after which sessions expire.
    #[must_use]
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let limits = DebugLimits::new().step_timeout(Duration::from_millis(250)).max_run_steps(7);
        assert_eq!(limits.step_timeout, Duration::from_millis(250));
        assert_eq!(limits.max_run_steps, 7);
        assert_eq!(limits.session_ttl, DEFAULT_SESSION_TTL);
    }
}
