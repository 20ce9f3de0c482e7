//! Builtin type constructors (`int(x)`, `list(x)`, `range(...)`, ...) and `type(x)`.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Num;

use crate::{
    builtins::{PyType, check_arg_count, reject_kwargs, take_kwarg},
    exception::{ExcType, RunResult},
    function::{BoundMethod, Class, new_namespace},
    io::PrintWriter,
    ops::float_to_bigint,
    run::Interp,
    tracer::Tracer,
    value::{Dict, RangeValue, Set, Value},
};

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    /// Calls a builtin type as a constructor.
    pub(crate) fn construct(&mut self, ty: PyType, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let name: &'static str = ty.into();
        if ty == PyType::Dict {
            return self.construct_dict(args, kwargs);
        }
        if ty == PyType::Int {
            let base = take_kwarg(&mut kwargs, "base");
            reject_kwargs(name, &kwargs)?;
            return self.construct_int(args, base);
        }
        crate::call::no_kwargs(name, &kwargs)?;
        match ty {
            PyType::Float => {
                check_arg_count(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(value) => self.to_float(value),
                }
            }
            PyType::Str => {
                check_arg_count(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::from("")),
                    Some(value) => Ok(Value::from(self.py_str(value)?)),
                }
            }
            PyType::Bool => {
                check_arg_count(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Bool(false)),
                    Some(value) => Ok(Value::Bool(self.truthy(value)?)),
                }
            }
            PyType::List | PyType::Tuple | PyType::Set => {
                check_arg_count(name, &args, 0, 1)?;
                let items = match args.first() {
                    None => Vec::new(),
                    Some(value) => self.iterate(value)?,
                };
                Ok(match ty {
                    PyType::List => Value::list(items),
                    PyType::Tuple => Value::tuple(items),
                    _ => Value::set(Set::from_values(items)?),
                })
            }
            PyType::Range => construct_range(&args),
            PyType::Object => {
                check_arg_count(name, &args, 0, 0)?;
                let class = Rc::new(Class {
                    name: "object".to_owned(),
                    bases: Vec::new(),
                    exc_base: None,
                    attrs: new_namespace(),
                });
                Ok(Value::Instance(Self::new_instance(&class)))
            }
            PyType::Type => match args.as_slice() {
                [value] => Ok(type_of(value)),
                _ => ExcType::TypeError.err("type() takes 1 argument"),
            },
            other => {
                let name: &'static str = other.into();
                ExcType::TypeError.err(format!("cannot create '{name}' instances"))
            }
        }
    }

    fn construct_int(&mut self, args: Vec<Value>, base: Option<Value>) -> RunResult<Value> {
        check_arg_count("int", &args, 0, 2)?;
        let mut args = args.into_iter();
        let value = args.next();
        let base = base.or_else(|| args.next());
        let Some(value) = value else {
            return Ok(Value::Int(0));
        };
        if let Some(base) = base {
            let Value::Str(text) = &value else {
                return ExcType::TypeError.err("int() can't convert non-string with explicit base");
            };
            let base = match base.as_i64() {
                Some(base) if base == 0 || (2..=36).contains(&base) => u32::try_from(base).unwrap_or(10),
                _ => return ExcType::ValueError.err("int() base must be >= 2 and <= 36, or 0"),
            };
            return parse_int(text, base);
        }
        match &value {
            Value::Bool(_) | Value::Int(_) | Value::LongInt(_) => Ok(Value::from_bigint(value.as_bigint().unwrap_or_default())),
            Value::Float(f) => Ok(Value::from_bigint(float_to_bigint(*f)?)),
            Value::Str(text) => parse_int(text, 10),
            Value::Instance(instance) => {
                for dunder in ["__int__", "__index__"] {
                    if let Some(result) = self.call_dunder(instance, dunder, Vec::new())? {
                        return Ok(result);
                    }
                }
                int_type_error(&value)
            }
            other => int_type_error(other),
        }
    }

    fn to_float(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Bool(_) | Value::Int(_) | Value::LongInt(_) => match value.as_f64() {
                Some(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => ExcType::OverflowError.err("int too large to convert to float"),
            },
            Value::Str(text) => parse_float(text).map(Value::Float),
            Value::Instance(instance) => match self.call_dunder(instance, "__float__", Vec::new())? {
                Some(result) => Ok(result),
                None => float_type_error(value),
            },
            other => float_type_error(other),
        }
    }

    fn construct_dict(&mut self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        check_arg_count("dict", &args, 0, 1)?;
        let mut dict = Dict::new();
        if let Some(source) = args.first() {
            self.dict_update(&mut dict, source)?;
        }
        for (key, value) in kwargs {
            dict.insert(Value::from(key), value)?;
        }
        Ok(Value::dict(dict))
    }

    /// Merges a mapping or an iterable of pairs into `dict`, as `dict.update` does.
    pub(crate) fn dict_update(&mut self, dict: &mut Dict, source: &Value) -> RunResult<()> {
        if let Value::Dict(other) = source {
            let items = other.borrow().items();
            for (key, value) in items {
                dict.insert(key, value)?;
            }
            return Ok(());
        }
        let items = self.iterate(source)?;
        for (i, item) in items.iter().enumerate() {
            let pair = match item {
                Value::List(_) | Value::Tuple(_) | Value::Str(_) => self.iterate(item)?,
                other => {
                    return ExcType::TypeError.err(format!(
                        "cannot convert dictionary update sequence element #{i} to a sequence ({} object)",
                        other.type_name()
                    ));
                }
            };
            let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                ExcType::ValueError.raise(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            dict.insert(key, value)?;
        }
        Ok(())
    }
}

/// `type(value)`.
pub(crate) fn type_of(value: &Value) -> Value {
    Value::Type(match value {
        Value::None => PyType::NoneType,
        Value::Ellipsis => PyType::Ellipsis,
        Value::Bool(_) => PyType::Bool,
        Value::Int(_) | Value::LongInt(_) => PyType::Int,
        Value::Float(_) => PyType::Float,
        Value::Str(_) => PyType::Str,
        Value::List(_) => PyType::List,
        Value::Tuple(_) => PyType::Tuple,
        Value::Dict(_) => PyType::Dict,
        Value::Set(_) => PyType::Set,
        Value::Range(_) => PyType::Range,
        Value::Iterator(_) => PyType::Iterator,
        Value::Function(_) => PyType::Function,
        Value::Native(_) => PyType::BuiltinFunction,
        Value::BoundMethod(method) => match &**method {
            BoundMethod::User { .. } => PyType::Method,
            BoundMethod::Native { .. } => PyType::BuiltinFunction,
        },
        Value::Type(_) | Value::ExcType(_) | Value::Class(_) => PyType::Type,
        Value::Super(_) => PyType::Super,
        Value::Module(_) => PyType::Module,
        Value::Instance(instance) => return Value::Class(Rc::clone(&instance.class)),
        Value::Exception(exc) => {
            return match &exc.instance {
                Some(instance) => Value::Class(Rc::clone(&instance.class)),
                None => Value::ExcType(exc.exc.exc_type()),
            };
        }
    })
}

fn construct_range(args: &[Value]) -> RunResult<Value> {
    check_arg_count("range", args, 1, 3)?;
    let mut ints = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Bool(_) | Value::Int(_) => ints.push(arg.as_i64().unwrap_or_default()),
            Value::LongInt(_) => return ExcType::OverflowError.err("Python int too large to convert to C ssize_t"),
            other => {
                return ExcType::TypeError.err(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                ));
            }
        }
    }
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("argument count checked above"),
    };
    if step == 0 {
        return ExcType::ValueError.err("range() arg 3 must not be zero");
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

/// Parses an `int()` literal: optional sign, surrounding whitespace,
/// underscores between digits, and base prefixes when `base` is 0 or matches.
fn parse_int(text: &str, base: u32) -> RunResult<Value> {
    let invalid = || {
        let mut repr = String::new();
        crate::value::string_repr(&mut repr, text);
        ExcType::ValueError.raise(format!("invalid literal for int() with base {base}: {repr}"))
    };
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, body[2..].strip_prefix('_').unwrap_or(&body[2..])),
        (0 | 8, Some("0o")) => (8, body[2..].strip_prefix('_').unwrap_or(&body[2..])),
        (0 | 2, Some("0b")) => (2, body[2..].strip_prefix('_').unwrap_or(&body[2..])),
        (0, _) => (10, body),
        (base, _) => (base, body),
    };
    if digits.is_empty() || digits.starts_with(['_', '+', '-']) || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    if base == 0 && radix == 10 && digits.len() > 1 && digits.starts_with('0') && digits.chars().any(|c| c != '0' && c != '_') {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let value = BigInt::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    Ok(Value::from_bigint(if negative { -value } else { value }))
}

fn parse_float(text: &str) -> RunResult<f64> {
    let invalid = || {
        let mut repr = String::new();
        crate::value::string_repr(&mut repr, text);
        ExcType::ValueError.raise(format!("could not convert string to float: {repr}"))
    };
    let trimmed = text.trim();
    let (sign, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    match body.to_ascii_lowercase().as_str() {
        "inf" | "infinity" => return Ok(sign * f64::INFINITY),
        "nan" => return Ok(f64::NAN),
        _ => {}
    }
    let valid_chars = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'));
    if body.is_empty() || !valid_chars || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().map(|f| sign * f).map_err(|_| invalid())
}

fn int_type_error(value: &Value) -> RunResult<Value> {
    ExcType::TypeError.err(format!(
        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
        value.type_name()
    ))
}

fn float_type_error(value: &Value) -> RunResult<Value> {
    ExcType::TypeError.err(format!(
        "float() argument must be a string or a real number, not '{}'",
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(text: &str, base: u32) -> Option<i64> {
        parse_int(text, base).ok().and_then(|v| v.as_i64())
    }

    #[test]
    fn parse_int_literals() {
        assert_eq!(int(" 42 ", 10), Some(42));
        assert_eq!(int("-1_000", 10), Some(-1000));
        assert_eq!(int("0x1F", 0), Some(31));
        assert_eq!(int("ff", 16), Some(255));
        assert_eq!(int("0b101", 2), Some(5));
        assert_eq!(int("12abc", 10), None);
        assert_eq!(int("", 10), None);
        assert_eq!(int("1__0", 10), None);
        assert_eq!(int("010", 0), None);
    }

    #[test]
    fn parse_int_error_message() {
        let err = parse_int("abc", 10).unwrap_err();
        let crate::exception::RunError::Exc { object, .. } = err else {
            panic!("expected exception")
        };
        assert_eq!(object.exc.message(), "invalid literal for int() with base 10: 'abc'");
    }

    #[test]
    fn parse_float_literals() {
        assert_eq!(parse_float(" 2.5 ").unwrap(), 2.5);
        assert_eq!(parse_float("1e3").unwrap(), 1000.0);
        assert_eq!(parse_float("-inf").unwrap(), f64::NEG_INFINITY);
        assert!(parse_float("nan").unwrap().is_nan());
        assert!(parse_float("abc").is_err());
    }
}
