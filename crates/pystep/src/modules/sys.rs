//! The `sys` module.
//!
//! - `stdout` / `stderr`: stream objects with `write` and `flush`, both
//!   writing into the run's output
//! - `maxsize`, `argv`, `version`, `platform`
//! - `exit(code=None)`: raises `SystemExit`
//! - `getrecursionlimit()` / `setrecursionlimit(n)`: the interpreter's frame limit

use std::{borrow::Cow, rc::Rc};

use strum::IntoStaticStr;

use crate::{
    builtins::{NativeFunction, check_arg_count},
    exception::{ExcObject, ExcType, Exception, RunError, RunResult},
    function::Module,
    io::PrintWriter,
    modules::{int_arg, native_module},
    run::Interp,
    tracer::Tracer,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum SysFunctions {
    Exit,
    Getrecursionlimit,
    Setrecursionlimit,
    #[strum(serialize = "write")]
    StdoutWrite,
    #[strum(serialize = "write")]
    StderrWrite,
    #[strum(serialize = "flush")]
    Flush,
}

/// Smallest limit `setrecursionlimit` accepts; the module frame plus a few calls.
const MIN_RECURSION_LIMIT: i64 = 5;

pub(crate) fn create_module(recursion_limit: usize) -> Rc<Module> {
    let stream = |name: &str, write: SysFunctions| {
        native_module(
            name,
            [
                ("write", Value::Native(NativeFunction::Sys(write))),
                ("flush", Value::Native(NativeFunction::Sys(SysFunctions::Flush))),
            ],
        )
    };
    tracing::trace!(recursion_limit, "creating sys module");
    native_module(
        "sys",
        [
            ("stdout", Value::Module(stream("sys.stdout", SysFunctions::StdoutWrite))),
            ("stderr", Value::Module(stream("sys.stderr", SysFunctions::StderrWrite))),
            ("maxsize", Value::Int(i64::MAX)),
            ("argv", Value::list(vec![Value::from("")])),
            ("version", Value::from("3.12.0 (pystep)")),
            ("platform", Value::from("pystep")),
            ("exit", Value::Native(NativeFunction::Sys(SysFunctions::Exit))),
            (
                "getrecursionlimit",
                Value::Native(NativeFunction::Sys(SysFunctions::Getrecursionlimit)),
            ),
            (
                "setrecursionlimit",
                Value::Native(NativeFunction::Sys(SysFunctions::Setrecursionlimit)),
            ),
        ],
    )
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn call_sys(&mut self, function: SysFunctions, args: &[Value]) -> RunResult<Value> {
        match function {
            SysFunctions::Exit => {
                check_arg_count("exit", args, 0, 1)?;
                let code = args.first().cloned().unwrap_or(Value::None);
                let message = match &code {
                    Value::None => String::new(),
                    other => self.py_str(other)?,
                };
                let exc = Exception::new(ExcType::SystemExit, Some(message));
                let args = if matches!(code, Value::None) { Vec::new() } else { vec![code] };
                Err(RunError::from_object(Rc::new(ExcObject::with_args(exc, args))))
            }
            SysFunctions::Getrecursionlimit => {
                check_arg_count("getrecursionlimit", args, 0, 0)?;
                Ok(Value::from(self.recursion_limit))
            }
            SysFunctions::Setrecursionlimit => {
                check_arg_count("setrecursionlimit", args, 1, 1)?;
                let limit = int_arg(&args[0])?;
                if limit < 1 {
                    return ExcType::ValueError.err("recursion limit must be greater or equal than 1");
                }
                let limit = limit.max(MIN_RECURSION_LIMIT);
                self.recursion_limit = usize::try_from(limit).unwrap_or(usize::MAX);
                Ok(Value::None)
            }
            SysFunctions::StdoutWrite | SysFunctions::StderrWrite => {
                check_arg_count("write", args, 1, 1)?;
                let Value::Str(text) = &args[0] else {
                    return ExcType::TypeError.err(format!(
                        "write() argument must be str, not {}",
                        args[0].type_name()
                    ));
                };
                if function == SysFunctions::StdoutWrite {
                    self.print.stdout_write(Cow::Borrowed(&**text))?;
                } else {
                    self.print.stderr_write(Cow::Borrowed(&**text))?;
                }
                Ok(Value::from(text.chars().count()))
            }
            SysFunctions::Flush => {
                check_arg_count("flush", args, 0, 0)?;
                Ok(Value::None)
            }
        }
    }
}
