//! Implementation of the `print()` and `input()` builtins.

use crate::{
    builtins::{reject_kwargs, take_kwarg},
    exception::{ExcType, RunResult},
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

enum Destination {
    Stdout,
    Stderr,
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    /// Implementation of the print() builtin function.
    ///
    /// Supports the following keyword arguments:
    /// - `sep`: separator between values (default: " ")
    /// - `end`: string appended after the last value (default: "\n")
    /// - `file`: `sys.stdout` or `sys.stderr`
    /// - `flush`: accepted but ignored
    pub(super) fn builtin_print(&mut self, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let sep = print_text_kwarg("sep", take_kwarg(&mut kwargs, "sep"))?;
        let end = print_text_kwarg("end", take_kwarg(&mut kwargs, "end"))?;
        let file = take_kwarg(&mut kwargs, "file");
        take_kwarg(&mut kwargs, "flush");
        reject_kwargs("print", &kwargs)?;

        let destination = match &file {
            None | Some(Value::None) => Destination::Stdout,
            Some(Value::Module(module)) if module.name == "sys.stdout" => Destination::Stdout,
            Some(Value::Module(module)) if module.name == "sys.stderr" => Destination::Stderr,
            Some(other) => {
                return ExcType::AttributeError.err(format!("'{}' object has no attribute 'write'", other.type_name()));
            }
        };

        // Build the whole line first so a failing __str__ prints nothing.
        let mut output = String::new();
        for (i, value) in args.iter().enumerate() {
            if i > 0 {
                output.push_str(sep.as_deref().unwrap_or(" "));
            }
            output.push_str(&self.py_str(value)?);
        }
        output.push_str(end.as_deref().unwrap_or("\n"));

        match destination {
            Destination::Stdout => self.print.stdout_write(output.into())?,
            Destination::Stderr => self.print.stderr_write(output.into())?,
        }
        Ok(Value::None)
    }

    /// `input([prompt])`: reads the next line of the session's test case.
    pub(super) fn builtin_input(&mut self, args: &[Value]) -> RunResult<Value> {
        super::check_arg_count("input", args, 0, 1)?;
        if let Some(prompt) = args.first() {
            let prompt = self.py_str(prompt)?;
            self.print.stdout_write(prompt.into())?;
        }
        match self.input.read_line() {
            Some(line) => Ok(Value::from(line)),
            None => ExcType::EOFError.err("EOF when reading a line"),
        }
    }
}

fn print_text_kwarg(name: &str, value: Option<Value>) -> RunResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => ExcType::TypeError.err(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        )),
    }
}
