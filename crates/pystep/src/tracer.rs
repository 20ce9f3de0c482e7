//! Line tracing hooks for the interpreter.
//!
//! The interpreter is parameterized as `Interp<'a, T: Tracer, P: PrintWriter>`,
//! so callers choose the tracer at construction time and the hooks of
//! [`NoopTracer`] compile away entirely.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Plain execution, no hooks |
//! | [`RecordingTracer`] | Records every event, used by tests and `pystep --trace` |
//! | [`Controller`](crate::debugger::Controller) | Pauses at lines for an interactive session |
//!
//! Hooks receive a [`FrameRef`], a borrowed view of one live frame that can
//! walk to its callers and snapshot its bindings.

use std::{fmt, rc::Rc};

use crate::{exception::Exception, run::Frame, value::Value};

/// Tells the interpreter whether to keep running after a line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceAction {
    #[default]
    Continue,
    /// Unwind the program immediately. `try`/`finally` blocks do not run.
    Abort,
}

/// Hook points invoked by the interpreter.
///
/// All methods have default no-op implementations; implementations only
/// override the hooks they care about.
pub trait Tracer {
    /// Called before a statement starts a new source line in `frame`.
    ///
    /// Fires when the line changes and again on every loop back-edge, so a
    /// loop header reports once per iteration plus once at exhaustion.
    #[inline]
    fn on_line(&mut self, _frame: &FrameRef<'_>) -> TraceAction {
        TraceAction::Continue
    }

    /// Called when `frame` completes normally, before it is popped.
    ///
    /// The module frame reports with `None` once the program ends.
    #[inline]
    fn on_return(&mut self, _frame: &FrameRef<'_>, _value: &Value) {}

    /// Called once for an exception no active `try` can catch, with the
    /// frame that raised it still live.
    #[inline]
    fn on_exception(&mut self, _frame: &FrameRef<'_>, _exc: &Exception) {}
}

/// Tracer with no hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

// ============================================================================
// Frame introspection
// ============================================================================

/// A borrowed view of one frame on the interpreter's call stack.
#[derive(Clone, Copy)]
pub struct FrameRef<'a> {
    frames: &'a [Frame],
    index: usize,
}

impl<'a> FrameRef<'a> {
    pub(crate) fn new(frames: &'a [Frame], index: usize) -> Self {
        Self { frames, index }
    }

    fn frame(&self) -> &'a Frame {
        &self.frames[self.index]
    }

    /// Filename of the code running in this frame.
    #[must_use]
    pub fn filename(&self) -> &'a str {
        &self.frame().filename
    }

    /// 1-based line currently executing in this frame.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.frame().line
    }

    /// `<module>` for the module frame, otherwise the function or class name.
    #[must_use]
    pub fn function_name(&self) -> &'a str {
        &self.frame().name
    }

    /// Snapshot of the frame's local bindings in definition order.
    #[must_use]
    pub fn locals(&self) -> Vec<(String, Value)> {
        snapshot(&self.frame().locals)
    }

    /// Snapshot of the module namespace the frame runs in.
    #[must_use]
    pub fn globals(&self) -> Vec<(String, Value)> {
        snapshot(&self.frame().globals)
    }

    /// True for frames whose locals are the module namespace itself.
    #[must_use]
    pub fn locals_are_globals(&self) -> bool {
        let frame = self.frame();
        Rc::ptr_eq(&frame.locals, &frame.globals)
    }

    /// The frame that called this one, `None` for the outermost frame.
    #[must_use]
    pub fn caller(&self) -> Option<Self> {
        self.index.checked_sub(1).map(|index| Self::new(self.frames, index))
    }

    /// Number of frames below and including this one.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.index + 1
    }
}

impl fmt::Debug for FrameRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("function", &self.function_name())
            .field("filename", &self.filename())
            .field("line", &self.line())
            .finish()
    }
}

fn snapshot(namespace: &crate::function::Namespace) -> Vec<(String, Value)> {
    // A namespace is only mutably borrowed for the duration of a single store,
    // never across a hook call, so this borrow cannot fail.
    match namespace.try_borrow() {
        Ok(map) => map.iter().map(|(name, value)| (name.clone(), value.clone())).collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Trace event captured by [`RecordingTracer`].
///
/// Events hold rendered text rather than values so they can leave the
/// interpreter thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Line { filename: String, function: String, line: u32 },
    Return { function: String, line: u32, value: String },
    Exception { function: String, line: u32, message: String },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { filename, function, line } => write!(f, "line      {filename}:{line} in {function}"),
            Self::Return { function, line, value } => write!(f, "return    {function}:{line} -> {value}"),
            Self::Exception { function, line, message } => write!(f, "exception {function}:{line} {message}"),
        }
    }
}

/// Records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Line numbers of the line events for `filename`, in order.
    #[must_use]
    pub fn lines_in(&self, filename: &str) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Line { filename: f, line, .. } if f == filename => Some(*line),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl Tracer for RecordingTracer {
    fn on_line(&mut self, frame: &FrameRef<'_>) -> TraceAction {
        self.record(TraceEvent::Line {
            filename: frame.filename().to_owned(),
            function: frame.function_name().to_owned(),
            line: frame.line(),
        });
        TraceAction::Continue
    }

    fn on_return(&mut self, frame: &FrameRef<'_>, value: &Value) {
        self.record(TraceEvent::Return {
            function: frame.function_name().to_owned(),
            line: frame.line(),
            value: value.repr(),
        });
    }

    fn on_exception(&mut self, frame: &FrameRef<'_>, exc: &Exception) {
        self.record(TraceEvent::Exception {
            function: frame.function_name().to_owned(),
            line: frame.line(),
            message: exc.to_string(),
        });
    }
}
