use std::{
    borrow::Cow,
    collections::VecDeque,
    io::{self, Write as _},
};

use crate::exception::Exception;

/// Trait for handling output from the `print()` builtin function.
///
/// Implement this trait to capture or redirect the program's output. Writes to
/// `sys.stderr` default to the stdout methods so both streams land in one
/// ordered buffer.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print()`.
    ///
    /// Writes only the argument's text. Separators and the final terminator
    /// are emitted via [`stdout_push`](Self::stdout_push) or as their own write.
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Adds a single character to stdout, generally a space or newline.
    fn stdout_push(&mut self, end: char) -> Result<(), Exception>;

    /// Output of `print(..., file=sys.stderr)`.
    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.stdout_write(output)
    }

    fn stderr_push(&mut self, end: char) -> Result<(), Exception> {
        self.stdout_push(end)
    }
}

/// `PrintWriter` that writes straight to the process's stdout and stderr.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        let _ = io::stdout().write_all(output.as_bytes());
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{end}");
        if end == '\n' {
            let _ = stdout.flush();
        }
        Ok(())
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        let _ = io::stderr().write_all(output.as_bytes());
        Ok(())
    }

    fn stderr_push(&mut self, end: char) -> Result<(), Exception> {
        let _ = write!(io::stderr(), "{end}");
        Ok(())
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.0.push(end);
        Ok(())
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Exception> {
        Ok(())
    }
}

/// Lines served to `input()`, in order.
#[derive(Debug, Clone, Default)]
pub struct InputLines(VecDeque<String>);

impl InputLines {
    /// Splits `text` into lines; a trailing newline does not add an empty line.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self(text.lines().map(str::to_owned).collect())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Next line without its terminator, `None` at end of input.
    pub(crate) fn read_line(&mut self) -> Option<String> {
        self.0.pop_front()
    }
}
