//! One debugging session: its source artifact, its shared record and the
//! caller-facing operations that drive the worker.

use std::{
    collections::BTreeSet,
    io::{self, Write as _},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tempfile::NamedTempFile;

use super::{
    controller::{Record, ResumeMode, Shared, run_worker},
    limits::{DebugLimits, WORKER_STACK_SIZE},
    state::{Breakpoints, ErrorInfo, SessionState, SessionStatus, SessionSummary, VariableEntry, latest_by_name},
};
use crate::{ExcType, Exception, InputLines, Program};

/// Filename used when the artifact could not be created.
const NO_ARTIFACT: &str = "<string>";

const START_TIMEOUT_MESSAGE: &str = "Timeout waiting for execution to start";
const STEP_TIMEOUT_MESSAGE: &str = "Timeout waiting for next step";

/// A submitted program and everything observed while stepping through it.
///
/// Dropping a session cancels its worker and removes its artifact.
#[derive(Debug)]
pub struct DebugSession {
    id: String,
    /// Dedented source.
    source: String,
    test_case: Option<String>,
    artifact: Option<NamedTempFile>,
    filename: String,
    limits: DebugLimits,
    shared: Arc<Shared>,
    touched: Mutex<Instant>,
}

impl DebugSession {
    /// Creates a session and materializes its artifact. Nothing runs until
    /// `start_execution`.
    pub fn new(id: String, code: &str, test_case: Option<String>, breakpoints: BTreeSet<u32>, limits: DebugLimits) -> Self {
        let source = dedent(code);
        let mut record = Record::new(breakpoints);
        let artifact = match create_artifact(&source) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(%id, %err, "could not create source artifact");
                let exc = Exception::new(ExcType::OSError, Some(err.to_string()));
                record.fail(ErrorInfo::runtime(&exc));
                None
            }
        };
        let filename = artifact
            .as_ref()
            .map_or_else(|| NO_ARTIFACT.to_owned(), |file| file.path().display().to_string());
        Self {
            id,
            source,
            test_case,
            artifact,
            filename,
            limits,
            shared: Arc::new(Shared::new(record)),
            touched: Mutex::new(Instant::now()),
        }
    }

    /// A fresh session with the same id, source, test case and breakpoints.
    #[must_use]
    pub fn renewed(&self) -> Self {
        let breakpoints = self.shared.lock().breakpoints.clone();
        Self::new(self.id.clone(), &self.source, self.test_case.clone(), breakpoints, self.limits)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Path of the source artifact, while the session exists.
    #[must_use]
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(NamedTempFile::path)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Compiles the source and runs it up to the first pause.
    ///
    /// Returns the current state unchanged if the session already started.
    /// Empty source finishes immediately; a compile error finishes the session
    /// before any worker exists.
    pub fn start_execution(&self) -> SessionState {
        {
            let mut record = self.shared.lock();
            if record.has_started || record.status.is_finished() {
                return self.snapshot(&record);
            }
            record.has_started = true;
            if self.source.trim().is_empty() {
                record.status = SessionStatus::FinishedOk;
                return self.snapshot(&record);
            }
        }

        let program = match Program::compile(&self.source, &self.filename) {
            Ok(program) => program,
            Err(err) => {
                tracing::debug!(id = %self.id, %err, "compile failed");
                let mut record = self.shared.lock();
                record.fail(ErrorInfo::syntax(&err));
                return self.snapshot(&record);
            }
        };

        let mut record = self.shared.lock();
        record.status = SessionStatus::Running;
        record.mode = ResumeMode::Step;
        let generation = self.shared.generation();
        let shared = Arc::clone(&self.shared);
        let input = InputLines::new(self.test_case.as_deref().unwrap_or_default());
        let spawned = thread::Builder::new()
            .name(format!("pystep-{}", short_id(&self.id)))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || run_worker(&program, &shared, generation, input));
        if let Err(err) = spawned {
            tracing::warn!(id = %self.id, %err, "could not spawn worker");
            let exc = Exception::new(ExcType::RuntimeError, Some(format!("can't start new thread: {err}")));
            record.fail(ErrorInfo::runtime(&exc));
            return self.snapshot(&record);
        }
        tracing::debug!(id = %self.id, generation, "worker started");
        let record = self.wait_while_running(record, START_TIMEOUT_MESSAGE);
        self.snapshot(&record)
    }

    /// Runs to the next artifact line.
    ///
    /// Starts the session if needed; a finished or non-paused session is
    /// returned unchanged.
    pub fn step_forward(&self) -> SessionState {
        self.resume(ResumeMode::Step)
    }

    /// Runs to the next breakpoint or the end of the program.
    pub fn continue_execution(&self) -> SessionState {
        self.resume(ResumeMode::Continue)
    }

    /// Steps until the program finishes, a breakpoint line is reached or the
    /// step ceiling runs out. Hitting the ceiling leaves the session paused.
    ///
    /// If this call finishes the program cleanly while the last observed line
    /// carries a breakpoint, the returned state reports a breakpoint pause
    /// instead of a finish. The session itself stays finished.
    pub fn run_to_completion(&self) -> SessionState {
        let was_finished = self.shared.lock().status.is_finished();
        for _ in 0..self.limits.max_run_steps {
            let (status, line) = self.advance(ResumeMode::Step);
            if status != SessionStatus::Paused {
                break;
            }
            if self.is_breakpoint(line) {
                tracing::debug!(id = %self.id, line, "run stopped at breakpoint");
                break;
            }
        }
        let mut state = self.state();
        if !was_finished && state.status == SessionStatus::FinishedOk && self.is_breakpoint(state.current_line) {
            tracing::debug!(id = %self.id, line = state.current_line, "run finished on a breakpoint line");
            state.is_finished = false;
            state.status = SessionStatus::Paused;
            state.breakpoint_hit = true;
        }
        state
    }

    /// Adds `line` to the breakpoints, or removes it if present.
    pub fn toggle_breakpoint(&self, line: u32) -> Breakpoints {
        let mut record = self.shared.lock();
        if !record.breakpoints.remove(&line) {
            record.breakpoints.insert(line);
        }
        Breakpoints {
            breakpoints: record.breakpoints.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn breakpoints(&self) -> Breakpoints {
        Breakpoints {
            breakpoints: self.shared.lock().breakpoints.iter().copied().collect(),
        }
    }

    /// The chronological variable log.
    #[must_use]
    pub fn variables(&self) -> Vec<VariableEntry> {
        self.shared.lock().variables.clone()
    }

    /// The last logged value of every name.
    #[must_use]
    pub fn latest_variables(&self) -> Vec<VariableEntry> {
        latest_by_name(&self.shared.lock().variables)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshot(&self.shared.lock())
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Marks the session as used now.
    pub fn touch(&self) {
        *self.touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the session was last touched.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.touched.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let record = self.shared.lock();
        SessionSummary {
            id: self.id.clone(),
            status: record.status,
            current_line: record.current_line,
            idle_secs: self.idle().as_secs(),
        }
    }

    /// Stops the worker at its next line event. Its later writes are dropped.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn is_breakpoint(&self, line: i64) -> bool {
        u32::try_from(line).is_ok_and(|line| self.shared.lock().breakpoints.contains(&line))
    }

    fn resume(&self, mode: ResumeMode) -> SessionState {
        self.advance(mode);
        self.state()
    }

    /// Resumes the worker in `mode` and waits for its next transition.
    /// Returns the resulting status and current line.
    fn advance(&self, mode: ResumeMode) -> (SessionStatus, i64) {
        let has_started = self.shared.lock().has_started;
        if !has_started {
            let state = self.start_execution();
            let at_breakpoint = u32::try_from(state.current_line).is_ok_and(|line| state.breakpoints.contains(&line));
            if mode == ResumeMode::Step || state.status != SessionStatus::Paused || at_breakpoint {
                return (state.status, state.current_line);
            }
        }

        let mut record = self.shared.lock();
        if record.status != SessionStatus::Paused {
            return (record.status, record.current_line);
        }
        record.status = SessionStatus::Running;
        record.mode = mode;
        record.breakpoint_hit = false;
        tracing::debug!(id = %self.id, ?mode, "resuming");
        self.shared.changed.notify_all();
        let record = self.wait_while_running(record, STEP_TIMEOUT_MESSAGE);
        (record.status, record.current_line)
    }

    /// Blocks until the worker leaves `Running` or the step timeout expires,
    /// in which case the session finishes with a timeout error and the worker
    /// is cancelled. Returns early if the session is cancelled meanwhile.
    fn wait_while_running<'a>(&'a self, record: MutexGuard<'a, Record>, message: &str) -> MutexGuard<'a, Record> {
        let generation = self.shared.generation();
        let (mut record, wait) = self
            .shared
            .changed
            .wait_timeout_while(record, self.limits.step_timeout, |record| {
                record.status == SessionStatus::Running && self.shared.generation() == generation
            })
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.generation() != generation {
            tracing::debug!(id = %self.id, "session cancelled while waiting");
            return record;
        }
        if wait.timed_out() && record.status == SessionStatus::Running {
            tracing::warn!(id = %self.id, timeout = ?self.limits.step_timeout, "{message}");
            record.fail(ErrorInfo::timeout(message));
            self.shared.cancel_locked(&record);
        }
        record
    }

    fn snapshot(&self, record: &Record) -> SessionState {
        let mut output = record.output.clone();
        if !record.partial.is_empty() {
            output.push(record.partial.clone());
        }
        SessionState {
            id: self.id.clone(),
            current_line: record.current_line,
            variables: record.variables.clone(),
            has_started: record.has_started,
            is_finished: record.status.is_finished(),
            output,
            error: record.error.clone(),
            breakpoints: record.breakpoints.iter().copied().collect(),
            call_stack: record.call_stack.clone(),
            recursive_functions: record.recursive_functions.clone(),
            status: record.status,
            breakpoint_hit: record.breakpoint_hit,
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.cancel();
        tracing::debug!(id = %self.id, "session dropped");
    }
}

fn create_artifact(source: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("debug_").suffix(".py").tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ============================================================================
// Source normalization
// ============================================================================

/// Removes the whitespace prefix shared by every non-blank line, like
/// Python's `textwrap.dedent`. Lines of only spaces and tabs become empty.
#[must_use]
pub fn dedent(text: &str) -> String {
    let is_blank = |line: &str| line.trim_end_matches(['\n', '\r']).chars().all(|c| c == ' ' || c == '\t');

    let mut margin: Option<&str> = None;
    for line in text.split_inclusive('\n') {
        if is_blank(line) {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        margin = Some(match margin {
            None => indent,
            Some(margin) => common_prefix(margin, indent),
        });
    }
    let margin = margin.unwrap_or_default();

    text.split_inclusive('\n')
        .map(|line| {
            if is_blank(line) {
                &line[line.trim_end_matches(['\n', '\r']).len()..]
            } else {
                line.strip_prefix(margin).unwrap_or(line)
            }
        })
        .collect()
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count();
    &a[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_strips_common_margin() {
        assert_eq!(dedent("    a = 1\n    if a:\n        b = 2\n"), "a = 1\nif a:\n    b = 2\n");
    }

    #[test]
    fn dedent_ignores_blank_lines() {
        assert_eq!(dedent("  x = 1\n\n  \n  y = 2"), "x = 1\n\n\ny = 2");
    }

    #[test]
    fn dedent_keeps_mixed_indentation() {
        assert_eq!(dedent("\tx = 1\n  y = 2\n"), "\tx = 1\n  y = 2\n");
        assert_eq!(dedent("x = 1\n  y = 2\n"), "x = 1\n  y = 2\n");
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
