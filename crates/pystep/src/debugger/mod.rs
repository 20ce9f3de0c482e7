//! Step-through debugging sessions.
//!
//! A [`SessionRegistry`] owns [`DebugSession`]s. Each session runs its program
//! on a worker thread under a [`Controller`], which pauses before every line
//! of the submitted source and publishes variables, call stack and output as
//! a [`SessionState`].

mod capture;
mod controller;
mod format;
mod limits;
mod registry;
mod session;
mod state;

pub use self::{
    controller::Controller,
    format::{FORMAT_ERROR, FormattedValue, MAX_MAPPING_ITEMS, MAX_SEQUENCE_ITEMS, format_value},
    limits::{DEFAULT_MAX_RUN_STEPS, DEFAULT_SESSION_TTL, DEFAULT_STEP_TIMEOUT, DebugLimits},
    registry::{DebugError, SessionRegistry},
    session::{DebugSession, dedent},
    state::{
        Breakpoints, ErrorInfo, ErrorKind, SessionState, SessionStatus, SessionSummary, StackEntry, VariableEntry,
        latest_by_name,
    },
};
