//! Step-through debugging sessions for small Python programs.
//!
//! The crate has two layers:
//!
//! - a tree-walking interpreter for a teaching subset of Python ([`Program`]),
//!   which reports line, return and exception events to a [`Tracer`];
//! - the [`debugger`], which drives a program on a worker thread under
//!   step/breakpoint control and exposes the result as serializable
//!   [`SessionState`](debugger::SessionState) snapshots through a
//!   [`SessionRegistry`](debugger::SessionRegistry).
//!
//! ```no_run
//! use pystep::debugger::{DebugLimits, SessionRegistry};
//!
//! let registry = SessionRegistry::new(DebugLimits::new());
//! let state = registry.create_session("a = 1\nb = a + 1\nprint(b)\n", None);
//! let state = registry.run_to_completion(&state.id).unwrap();
//! assert_eq!(state.output, vec!["2".to_owned()]);
//! ```
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass values consistently")]
#![expect(clippy::float_cmp, reason = "Python semantics require exact float comparison")]

mod builtins;
mod call;
pub mod debugger;
mod eval;
mod exception;
mod expressions;
mod fstring;
mod function;
mod io;
mod methods;
mod modules;
mod ops;
mod parse;
mod run;
pub mod tracer;
mod value;

pub use crate::{
    exception::{CompileError, ExcType, Exception},
    io::{CollectStringPrint, InputLines, NoPrint, PrintWriter, StdPrint},
    run::{Program, RunFailure},
    tracer::{FrameRef, NoopTracer, RecordingTracer, TraceAction, TraceEvent, Tracer},
    value::Value,
};
