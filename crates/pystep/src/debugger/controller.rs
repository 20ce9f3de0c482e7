//! The execution controller: a [`Tracer`] that pauses the worker thread at
//! artifact lines and hands control back to the session's caller.
//!
//! The session record lives behind a `Mutex` paired with a `Condvar`. The
//! worker publishes each pause and then waits for the status to leave
//! `Paused`. Callers flip the status to `Running` and wait, with a timeout,
//! for it to leave `Running` again.
//!
//! Every worker carries the generation it was spawned with. Timeout, reset and
//! delete bump the shared generation; a worker that finds itself stale drops
//! its writes and aborts the program at its next line event.

use std::{
    borrow::Cow,
    collections::BTreeSet,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use super::{
    capture::{capture_stack, capture_variables},
    state::{ErrorInfo, SessionStatus, StackEntry, VariableEntry},
};
use crate::{
    ExcType, Exception, InputLines, Program, RunFailure,
    io::PrintWriter,
    tracer::{FrameRef, TraceAction, Tracer},
    value::Value,
};

/// How the worker proceeds after the caller resumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ResumeMode {
    /// Pause at the next artifact line.
    #[default]
    Step,
    /// Pause only at artifact lines with a breakpoint.
    Continue,
}

/// Mutable session state shared by the caller and the worker.
#[derive(Debug, Default)]
pub(crate) struct Record {
    pub(crate) status: SessionStatus,
    pub(crate) has_started: bool,
    pub(crate) current_line: i64,
    pub(crate) error: Option<ErrorInfo>,
    /// Completed output lines.
    pub(crate) output: Vec<String>,
    /// Output written since the last newline.
    pub(crate) partial: String,
    pub(crate) variables: Vec<VariableEntry>,
    pub(crate) call_stack: Vec<StackEntry>,
    pub(crate) recursive_functions: Vec<String>,
    pub(crate) breakpoints: BTreeSet<u32>,
    pub(crate) breakpoint_hit: bool,
    pub(crate) mode: ResumeMode,
}

impl Record {
    pub(crate) fn new(breakpoints: BTreeSet<u32>) -> Self {
        Self {
            current_line: -1,
            breakpoints,
            ..Self::default()
        }
    }

    fn append_output(&mut self, text: &str) {
        let mut lines = text.split('\n');
        if let Some(first) = lines.next() {
            self.partial.push_str(first);
        }
        for line in lines {
            let done = std::mem::replace(&mut self.partial, line.to_owned());
            self.output.push(done);
        }
    }

    /// Moves an unterminated last line into `output`.
    pub(crate) fn flush_output(&mut self) {
        if !self.partial.is_empty() {
            let last = std::mem::take(&mut self.partial);
            self.output.push(last);
        }
    }

    /// Records an error and finishes the session. The first error wins.
    pub(crate) fn fail(&mut self, error: ErrorInfo) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.status = SessionStatus::FinishedError;
        self.flush_output();
    }
}

/// The record, its change notification and the current worker generation.
#[derive(Debug)]
pub(crate) struct Shared {
    record: Mutex<Record>,
    pub(crate) changed: Condvar,
    generation: AtomicU64,
}

impl Shared {
    pub(crate) fn new(record: Record) -> Self {
        Self {
            record: Mutex::new(record),
            changed: Condvar::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Locks the record. A panic while the lock was held cannot leave the
    /// record half-written, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidates the running worker. Must be called with the record locked
    /// so a worker waiting on `changed` observes the new generation.
    pub(crate) fn cancel_locked(&self, _record: &Record) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub(crate) fn cancel(&self) {
        let record = self.lock();
        self.cancel_locked(&record);
    }
}

// ============================================================================
// Tracer
// ============================================================================

/// Drives one run of the program for a session.
#[derive(Debug)]
pub struct Controller {
    shared: Arc<Shared>,
    generation: u64,
    artifact: String,
}

impl Controller {
    pub(crate) fn new(shared: Arc<Shared>, generation: u64, artifact: String) -> Self {
        Self {
            shared,
            generation,
            artifact,
        }
    }

    fn is_stale(&self) -> bool {
        self.shared.generation() != self.generation
    }

    fn is_artifact(&self, frame: &FrameRef<'_>) -> bool {
        frame.filename() == self.artifact
    }

    /// Locks the record unless this worker has been superseded or the run
    /// has already finished. A finished record is never written again.
    fn lock_current(&self) -> Option<MutexGuard<'_, Record>> {
        let record = self.shared.lock();
        (!self.is_stale() && !record.status.is_finished()).then_some(record)
    }
}

impl Tracer for Controller {
    fn on_line(&mut self, frame: &FrameRef<'_>) -> TraceAction {
        if self.is_stale() {
            return TraceAction::Abort;
        }
        if !self.is_artifact(frame) {
            tracing::trace!(file = frame.filename(), line = frame.line(), "skipping non-artifact line");
            return TraceAction::Continue;
        }
        let line = frame.line();
        {
            let Some(record) = self.lock_current() else {
                return TraceAction::Abort;
            };
            if record.mode == ResumeMode::Continue && !record.breakpoints.contains(&line) {
                return TraceAction::Continue;
            }
        }

        let current_line = i64::from(line);
        let variables = capture_variables(frame, current_line);
        let (call_stack, recursive_functions) = capture_stack(frame);

        let Some(mut record) = self.lock_current() else {
            return TraceAction::Abort;
        };
        record.current_line = current_line;
        record.variables.extend(variables);
        record.call_stack = call_stack;
        record.recursive_functions = recursive_functions;
        record.breakpoint_hit = record.breakpoints.contains(&line);
        record.status = SessionStatus::Paused;
        tracing::debug!(line, breakpoint = record.breakpoint_hit, "paused");
        self.shared.changed.notify_all();

        let record = self
            .shared
            .changed
            .wait_while(record, |record| record.status == SessionStatus::Paused && !self.is_stale())
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_stale() {
            tracing::debug!(line, "stale worker aborting");
            return TraceAction::Abort;
        }
        tracing::debug!(line, mode = ?record.mode, "resumed");
        TraceAction::Continue
    }

    fn on_return(&mut self, frame: &FrameRef<'_>, _value: &Value) {
        if !self.is_artifact(frame) {
            return;
        }
        let line = match self.lock_current() {
            Some(record) => record.current_line,
            None => return,
        };
        let variables = capture_variables(frame, line);
        if let Some(mut record) = self.lock_current() {
            record.variables.extend(variables);
        }
    }

    fn on_exception(&mut self, frame: &FrameRef<'_>, exc: &Exception) {
        let in_artifact = self.is_artifact(frame);
        let line = match self.lock_current() {
            Some(_) if in_artifact => i64::from(frame.line()),
            Some(record) => record.current_line,
            None => return,
        };
        let variables = capture_variables(frame, line);
        let Some(mut record) = self.lock_current() else {
            return;
        };
        tracing::debug!(%exc, line, "uncaught exception");
        record.current_line = line;
        record.variables.extend(variables);
        record.fail(ErrorInfo::runtime(exc));
        self.shared.changed.notify_all();
    }
}

// ============================================================================
// Output
// ============================================================================

/// Routes the program's output into the session record, line by line.
#[derive(Debug)]
pub(crate) struct SessionPrint {
    shared: Arc<Shared>,
    generation: u64,
}

impl SessionPrint {
    pub(crate) fn new(shared: Arc<Shared>, generation: u64) -> Self {
        Self { shared, generation }
    }

    fn write(&self, text: &str) {
        let mut record = self.shared.lock();
        if self.shared.generation() == self.generation {
            record.append_output(text);
        }
    }
}

impl PrintWriter for SessionPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.write(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.write(end.encode_utf8(&mut [0; 4]));
        Ok(())
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Body of a session worker thread: runs `program` to its end and records
/// how it finished.
pub(crate) fn run_worker(program: &Program, shared: &Arc<Shared>, generation: u64, input: InputLines) {
    let mut controller = Controller::new(Arc::clone(shared), generation, program.filename().to_owned());
    let mut print = SessionPrint::new(Arc::clone(shared), generation);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| program.run(&mut controller, &mut print, input)));

    let mut record = shared.lock();
    if shared.generation() != generation {
        tracing::debug!(generation, "stale worker finished");
        return;
    }
    match outcome {
        Ok(Ok(())) => {
            if !record.status.is_finished() {
                record.flush_output();
                record.status = SessionStatus::FinishedOk;
            }
            tracing::debug!("worker finished");
        }
        Ok(Err(RunFailure::Exception(exc))) => {
            tracing::debug!(%exc, "worker finished with an exception");
            record.fail(ErrorInfo::runtime(&exc));
        }
        Ok(Err(RunFailure::Aborted)) => {
            tracing::debug!("worker aborted");
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::warn!(detail, "worker panicked");
            let exc = Exception::new(ExcType::RuntimeError, Some(format!("internal error: {detail}")));
            record.fail(ErrorInfo::runtime(&exc));
        }
    }
    shared.changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_split_into_lines() {
        let mut record = Record::new(BTreeSet::new());
        record.append_output("a");
        record.append_output("b\nc\n");
        record.append_output("d");
        assert_eq!(record.output, vec!["ab".to_owned(), "c".to_owned()]);
        assert_eq!(record.partial, "d");
        record.flush_output();
        assert_eq!(record.output.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn first_error_wins() {
        let mut record = Record::new(BTreeSet::new());
        record.fail(ErrorInfo::timeout("Timeout waiting for next step"));
        let exc = Exception::new(ExcType::ValueError, Some("late".to_owned()));
        record.fail(ErrorInfo::runtime(&exc));
        assert_eq!(record.error.map(|e| e.exc_type), Some("TimeoutError".to_owned()));
        assert_eq!(record.status, SessionStatus::FinishedError);
    }
}
