use std::{fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{function::Instance, run::Frame, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Python exception types supported by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Root of the hierarchy.
    BaseException,
    /// Primary exception class, matches everything except the system-exit family.
    Exception,
    SystemExit,
    KeyboardInterrupt,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    RecursionError,

    // --- NameError hierarchy ---
    NameError,
    UnboundLocalError,

    // --- ImportError hierarchy ---
    ImportError,
    ModuleNotFoundError,

    // --- OSError hierarchy ---
    OSError,
    TimeoutError,

    AttributeError,
    TypeError,
    ValueError,
    AssertionError,
    StopIteration,
    EOFError,
    MemoryError,
    SyntaxError,
}

impl ExcType {
    /// Checks if this exception type is caught by a handler for `handler_type`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => !matches!(self, Self::BaseException | Self::KeyboardInterrupt | Self::SystemExit),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::RuntimeError => matches!(self, Self::RecursionError | Self::NotImplementedError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            Self::ImportError => matches!(self, Self::ModuleNotFoundError),
            Self::OSError => matches!(self, Self::TimeoutError),
            _ => false,
        }
    }

    /// Builds a raised error of this type with the given message.
    pub(crate) fn raise(self, message: impl Into<String>) -> RunError {
        RunError::from(Exception::new(self, Some(message.into())))
    }

    /// Shorthand for `Err(self.raise(message))`.
    pub(crate) fn err<T>(self, message: impl Into<String>) -> RunResult<T> {
        Err(self.raise(message))
    }
}

/// A Python exception as seen from outside the interpreter.
///
/// `type_name` differs from the `exc_type` name only for user-defined
/// exception classes, where it holds the class name and `exc_type` holds the
/// nearest builtin ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    exc_type: ExcType,
    type_name: String,
    message: Option<String>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            type_name: exc_type.to_string(),
            message,
        }
    }

    pub(crate) fn with_type_name(mut self, type_name: &str) -> Self {
        type_name.clone_into(&mut self.type_name);
        self
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// The class name, e.g. `ZeroDivisionError` or a user-defined subclass name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The exception message as `str(exc)` would render it.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {msg}", self.type_name),
            _ => write!(f, "{}", self.type_name),
        }
    }
}

impl std::error::Error for Exception {}

/// Runtime representation of an exception instance.
///
/// `instance` is set when a user-defined exception class was raised, so that
/// `except MyError:` can match on class identity and `as e` binds the instance.
#[derive(Debug)]
pub struct ExcObject {
    pub(crate) exc: Exception,
    pub(crate) instance: Option<Rc<Instance>>,
    pub(crate) args: Vec<Value>,
}

impl ExcObject {
    pub(crate) fn new(exc: Exception) -> Self {
        Self {
            exc,
            instance: None,
            args: Vec::new(),
        }
    }

    pub(crate) fn with_args(exc: Exception, args: Vec<Value>) -> Self {
        Self {
            exc,
            instance: None,
            args,
        }
    }
}

/// Error propagated through the interpreter.
#[derive(Debug)]
pub(crate) enum RunError {
    /// A catchable Python exception. `reported` is set once the tracer has
    /// been told about it, so it is only reported once.
    ///
    /// `traceback` holds the frames the exception has already unwound,
    /// innermost first, until it is reported or caught.
    Exc {
        object: Rc<ExcObject>,
        reported: bool,
        traceback: Vec<Frame>,
    },
    /// Execution was stopped by the tracer. Never caught by `try`.
    Abort,
}

impl RunError {
    pub(crate) fn from_object(object: Rc<ExcObject>) -> Self {
        Self::Exc {
            object,
            reported: false,
            traceback: Vec::new(),
        }
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::from_object(Rc::new(ExcObject::new(exc)))
    }
}

/// Error returned when source code cannot be compiled.
///
/// `exc_type` is `SyntaxError` for parser failures and `NotImplementedError`
/// for valid Python that uses a construct this interpreter does not support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub exc_type: ExcType,
    pub message: String,
    /// 1-based line of the failure.
    pub line: u32,
}

impl CompileError {
    pub(crate) fn syntax(message: impl Into<String>, line: u32) -> Self {
        Self {
            exc_type: ExcType::SyntaxError,
            message: message.into(),
            line,
        }
    }

    pub(crate) fn not_implemented(what: &str, line: u32) -> Self {
        Self {
            exc_type: ExcType::NotImplementedError,
            message: format!("{what} are not supported"),
            line,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {})", self.exc_type, self.message, self.line)
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_matches_cpython() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::KeyboardInterrupt.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::TypeError));
    }

    #[test]
    fn display_omits_empty_message() {
        let exc = Exception::new(ExcType::StopIteration, None);
        assert_eq!(exc.to_string(), "StopIteration");
        let exc = Exception::new(ExcType::ZeroDivisionError, Some("division by zero".to_owned()));
        assert_eq!(exc.to_string(), "ZeroDivisionError: division by zero");
    }
}
