//! Variable and call-stack capture at a paused frame.

use std::collections::HashSet;

use indexmap::IndexMap;

use super::{
    format::{FormattedValue, format_value},
    state::{StackEntry, VariableEntry},
};
use crate::{tracer::FrameRef, value::Value};

/// Names like `__name__` are interpreter bookkeeping, not user variables.
pub(crate) fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Formats the bindings visible in `frame`: its locals, then the globals
/// not shadowed by a local.
///
/// Module-valued globals are skipped. In the module frame the locals are the
/// globals, so they are enumerated once, with the same skip rules.
pub(crate) fn capture_variables(frame: &FrameRef<'_>, line: i64) -> Vec<VariableEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    let mut push = |name: String, value: &Value, skip_modules: bool| {
        if is_reserved(&name) || (skip_modules && matches!(value, Value::Module(_))) || !seen.insert(name.clone()) {
            return;
        }
        let FormattedValue { type_name, value } = format_value(value);
        entries.push(VariableEntry {
            name,
            type_name,
            value,
            line,
        });
    };

    let locals_are_globals = frame.locals_are_globals();
    for (name, value) in frame.locals() {
        push(name, &value, locals_are_globals);
    }
    if !locals_are_globals {
        for (name, value) in frame.globals() {
            push(name, &value, true);
        }
    }
    entries
}

/// Snapshot of the frame's own bindings, keyed by name.
fn capture_locals(frame: &FrameRef<'_>) -> IndexMap<String, FormattedValue> {
    let skip_modules = frame.locals_are_globals();
    frame
        .locals()
        .into_iter()
        .filter(|(name, value)| !is_reserved(name) && !(skip_modules && matches!(value, Value::Module(_))))
        .map(|(name, value)| {
            let formatted = format_value(&value);
            (name, formatted)
        })
        .collect()
}

/// Captures the call stack, outermost frame first, plus the names of
/// functions that appear in it more than once.
pub(crate) fn capture_stack(frame: &FrameRef<'_>) -> (Vec<StackEntry>, Vec<String>) {
    let mut occurrences: IndexMap<&str, usize> = IndexMap::new();
    let mut stack = Vec::with_capacity(frame.depth());
    let mut current = Some(*frame);
    while let Some(frame) = current {
        let count = occurrences.entry(frame.function_name()).or_insert(0);
        *count += 1;
        stack.push(StackEntry {
            function_name: frame.function_name().to_owned(),
            line: frame.line(),
            file: frame.filename().to_owned(),
            recursion_depth: *count,
            locals: capture_locals(&frame),
        });
        current = frame.caller();
    }
    stack.reverse();

    let mut tally: IndexMap<&str, usize> = IndexMap::new();
    for entry in &stack {
        *tally.entry(entry.function_name.as_str()).or_insert(0) += 1;
    }
    let recursive = tally
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_owned())
        .collect();
    (stack, recursive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names() {
        assert!(is_reserved("__name__"));
        assert!(is_reserved("__builtins__"));
        assert!(!is_reserved("__"));
        assert!(!is_reserved("____"));
        assert!(!is_reserved("_private"));
        assert!(!is_reserved("__mangled"));
    }
}
