//! Bounded, never-failing rendering of runtime values for session snapshots.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Sequences and sets longer than this render as a summary.
pub const MAX_SEQUENCE_ITEMS: usize = 10;

/// Dicts larger than this render as a summary.
pub const MAX_MAPPING_ITEMS: usize = 5;

/// Shown in place of a literal form that could not be produced.
pub const FORMAT_ERROR: &str = "Error getting value";

/// A value's type tag and display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
}

/// Renders `value` for display without running user code.
///
/// Scalars render as their `repr`; lists, tuples and sets up to
/// [`MAX_SEQUENCE_ITEMS`] and dicts up to [`MAX_MAPPING_ITEMS`] render as their
/// `repr`, larger ones as `"<type> with N items"`; anything else renders as
/// `"<type> object"`.
#[must_use]
pub fn format_value(value: &Value) -> FormattedValue {
    let type_name = value.type_name();
    let display = match value {
        Value::None | Value::Bool(_) | Value::Int(_) | Value::LongInt(_) | Value::Float(_) | Value::Str(_) => literal(value),
        Value::List(_) | Value::Tuple(_) | Value::Set(_) => bounded(value, &type_name, MAX_SEQUENCE_ITEMS),
        Value::Dict(_) => bounded(value, &type_name, MAX_MAPPING_ITEMS),
        _ => format!("{type_name} object"),
    };
    FormattedValue {
        type_name,
        value: display,
    }
}

fn literal(value: &Value) -> String {
    value.try_repr().unwrap_or_else(|_| FORMAT_ERROR.to_owned())
}

fn bounded(value: &Value, type_name: &str, max: usize) -> String {
    match value.builtin_len() {
        Some(len) if len <= max => literal(value),
        Some(len) => format!("{type_name} with {len} items"),
        None => FORMAT_ERROR.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::value::Dict;

    fn ints(n: i64) -> Vec<Value> {
        (0..n).map(Value::Int).collect()
    }

    #[test]
    fn scalars_render_as_repr() {
        assert_eq!(format_value(&Value::Int(3)).value, "3");
        assert_eq!(format_value(&Value::Float(3.0)).value, "3.0");
        assert_eq!(format_value(&Value::from("hi")).value, "'hi'");
        assert_eq!(format_value(&Value::None).value, "None");
        assert_eq!(format_value(&Value::Bool(true)).type_name, "bool");
    }

    #[test]
    fn sequences_are_bounded_at_ten() {
        assert_eq!(format_value(&Value::list(ints(10))).value, "[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]");
        assert_eq!(format_value(&Value::list(ints(11))).value, "list with 11 items");
        assert_eq!(format_value(&Value::tuple(ints(12))).value, "tuple with 12 items");
    }

    #[test]
    fn dicts_are_bounded_at_five() {
        let mut dict = Dict::new();
        for i in 0..5 {
            dict.insert(Value::Int(i), Value::Int(i)).unwrap();
        }
        assert_eq!(format_value(&Value::dict(dict.clone())).value, "{0: 0, 1: 1, 2: 2, 3: 3, 4: 4}");
        dict.insert(Value::Int(5), Value::Int(5)).unwrap();
        let formatted = format_value(&Value::dict(dict));
        assert_eq!(formatted.value, "dict with 6 items");
        assert_eq!(formatted.type_name, "dict");
    }

    #[test]
    fn other_values_render_as_objects() {
        let range = crate::builtins::lookup("range").unwrap();
        assert_eq!(format_value(&range).value, "type object");
    }

    #[test]
    fn busy_container_renders_sentinel() {
        let items = Rc::new(RefCell::new(ints(2)));
        let value = Value::List(Rc::clone(&items));
        let _guard = items.borrow_mut();
        assert_eq!(format_value(&value).value, FORMAT_ERROR);
    }

    #[test]
    fn self_referencing_list() {
        let value = Value::list(ints(1));
        if let Value::List(items) = &value {
            items.borrow_mut().push(value.clone());
        }
        assert_eq!(format_value(&value).value, "[0, [...]]");
    }
}
