//! Python builtin functions and types.
//!
//! Each group of builtins has its own submodule; this module owns the name
//! tables and the dispatch from a [`NativeFunction`] to its implementation.

mod convert;
mod iterables;
mod numeric;
mod print;
mod reflect;

pub(crate) use convert::type_of;

use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    exception::{ExcType, RunResult},
    io::PrintWriter,
    modules::{math::MathFunctions, random_mod::RandomFunctions, sys::SysFunctions},
    run::Interp,
    tracer::Tracer,
    value::Value,
};

/// Builtin types, as returned by `type()` and callable as constructors.
///
/// Only the first block of variants is reachable by name from Python code;
/// the rest exist so `type(x)` has something to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PyType {
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Object,
    Type,

    #[strum(serialize = "NoneType")]
    NoneType,
    Ellipsis,
    Function,
    #[strum(serialize = "builtin_function_or_method")]
    BuiltinFunction,
    Method,
    Module,
    Super,
    Iterator,
}

impl PyType {
    fn is_builtin_name(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Float
                | Self::Str
                | Self::Bool
                | Self::List
                | Self::Tuple
                | Self::Dict
                | Self::Set
                | Self::Range
                | Self::Object
                | Self::Type
        )
    }
}

/// Interpreter-native builtin functions.
///
/// All variants serialize to lowercase (e.g., `Print` -> "print").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Print,
    Input,
    Len,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Map,
    Filter,
    Any,
    All,
    Iter,
    Next,
    Isinstance,
    Issubclass,
    Repr,
    Format,
    Round,
    Divmod,
    Pow,
    Chr,
    Ord,
    Hex,
    Bin,
    Oct,
    Hash,
    Id,
    Callable,
    Getattr,
    Setattr,
    Hasattr,
    Delattr,
    Super,
}

/// A function implemented in Rust, either a builtin or a member of a native module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeFunction {
    Builtin(Builtin),
    Math(MathFunctions),
    Random(RandomFunctions),
    Sys(SysFunctions),
}

impl NativeFunction {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Builtin(b) => b.into(),
            Self::Math(f) => f.into(),
            Self::Random(f) => f.into(),
            Self::Sys(f) => f.into(),
        }
    }
}

/// Resolves a name in the builtins namespace.
pub(crate) fn lookup(name: &str) -> Option<Value> {
    if let Ok(builtin) = Builtin::from_str(name) {
        return Some(Value::Native(NativeFunction::Builtin(builtin)));
    }
    if let Ok(ty) = PyType::from_str(name) {
        return ty.is_builtin_name().then_some(Value::Type(ty));
    }
    ExcType::from_str(name).ok().map(Value::ExcType)
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn call_native(
        &mut self,
        native: NativeFunction,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        if let NativeFunction::Builtin(builtin) = native {
            return self.call_builtin(builtin, args, kwargs);
        }
        crate::call::no_kwargs(native.name(), &kwargs)?;
        match native {
            NativeFunction::Math(function) => self.call_math(function, &args),
            NativeFunction::Random(function) => self.call_random(function, args),
            NativeFunction::Sys(function) => self.call_sys(function, &args),
            NativeFunction::Builtin(_) => unreachable!("handled above"),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let name: &'static str = builtin.into();
        match builtin {
            Builtin::Print => self.builtin_print(args, kwargs),
            Builtin::Input => {
                crate::call::no_kwargs(name, &kwargs)?;
                self.builtin_input(&args)
            }
            Builtin::Min | Builtin::Max => self.builtin_min_max(builtin == Builtin::Max, args, kwargs),
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse");
                reject_kwargs(name, &kwargs)?;
                let [iterable] = exact_args::<1>(name, args)?;
                let items = self.iterate(&iterable)?;
                let reverse = match reverse {
                    Some(value) => self.truthy(&value)?,
                    None => false,
                };
                Ok(Value::list(self.sort_values(items, key.as_ref(), reverse)?))
            }
            Builtin::Enumerate => {
                let start = take_kwarg(&mut kwargs, "start");
                reject_kwargs(name, &kwargs)?;
                self.builtin_enumerate(args, start)
            }
            Builtin::Sum => {
                let start = take_kwarg(&mut kwargs, "start");
                reject_kwargs(name, &kwargs)?;
                self.builtin_sum(args, start)
            }
            Builtin::Zip => {
                let strict = take_kwarg(&mut kwargs, "strict");
                reject_kwargs(name, &kwargs)?;
                self.builtin_zip(args, strict)
            }
            Builtin::Round => {
                let ndigits = take_kwarg(&mut kwargs, "ndigits");
                reject_kwargs(name, &kwargs)?;
                self.builtin_round(args, ndigits)
            }
            Builtin::Pow => {
                let modulus = take_kwarg(&mut kwargs, "mod");
                reject_kwargs(name, &kwargs)?;
                self.builtin_pow(args, modulus)
            }
            Builtin::Super => {
                crate::call::no_kwargs(name, &kwargs)?;
                self.make_super(&args)
            }
            _ => {
                crate::call::no_kwargs(name, &kwargs)?;
                self.call_positional_builtin(builtin, args)
            }
        }
    }

    /// Builtins that take positional arguments only.
    fn call_positional_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> RunResult<Value> {
        let name: &'static str = builtin.into();
        match builtin {
            Builtin::Len => {
                let [value] = exact_args::<1>(name, args)?;
                Ok(Value::from(self.len_of(&value)?))
            }
            Builtin::Abs => {
                let [value] = exact_args::<1>(name, args)?;
                self.builtin_abs(&value)
            }
            Builtin::Reversed => {
                let [value] = exact_args::<1>(name, args)?;
                self.builtin_reversed(&value)
            }
            Builtin::Map => self.builtin_map(args),
            Builtin::Filter => {
                let [function, iterable] = exact_args::<2>(name, args)?;
                self.builtin_filter(&function, &iterable)
            }
            Builtin::Any | Builtin::All => {
                let [iterable] = exact_args::<1>(name, args)?;
                let want = builtin == Builtin::Any;
                let mut iter = self.for_iter(&iterable)?;
                while let Some(item) = self.next_item(&mut iter)? {
                    if self.truthy(&item)? == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            Builtin::Iter => {
                let [value] = exact_args::<1>(name, args)?;
                self.builtin_iter(&value)
            }
            Builtin::Next => self.builtin_next(args),
            Builtin::Isinstance => {
                let [value, class] = exact_args::<2>(name, args)?;
                Ok(Value::Bool(self.isinstance(&value, &class)?))
            }
            Builtin::Issubclass => {
                let [class, parent] = exact_args::<2>(name, args)?;
                Ok(Value::Bool(issubclass(&class, &parent)?))
            }
            Builtin::Repr => {
                let [value] = exact_args::<1>(name, args)?;
                Ok(Value::from(self.py_repr(&value)?))
            }
            Builtin::Format => {
                check_arg_count(name, &args, 1, 2)?;
                let mut args = args.into_iter();
                let value = args.next().unwrap_or(Value::None);
                let spec = match args.next() {
                    Some(Value::Str(spec)) => spec.to_string(),
                    Some(other) => {
                        return ExcType::TypeError.err(format!(
                            "format() argument 2 must be str, not {}",
                            other.type_name()
                        ));
                    }
                    None => String::new(),
                };
                let parsed = crate::fstring::ParsedFormatSpec::from_str(&spec).map_err(|err| ExcType::ValueError.raise(err))?;
                Ok(Value::from(self.format_value(&value, &parsed)?))
            }
            Builtin::Divmod => {
                let [a, b] = exact_args::<2>(name, args)?;
                let quotient = self.binary_op(&a, crate::expressions::Operator::FloorDiv, &b)?;
                let remainder = self.binary_op(&a, crate::expressions::Operator::Mod, &b)?;
                Ok(Value::tuple(vec![quotient, remainder]))
            }
            Builtin::Chr => {
                let [value] = exact_args::<1>(name, args)?;
                numeric::chr(&value)
            }
            Builtin::Ord => {
                let [value] = exact_args::<1>(name, args)?;
                numeric::ord(&value)
            }
            Builtin::Hex | Builtin::Bin | Builtin::Oct => {
                let [value] = exact_args::<1>(name, args)?;
                numeric::radix_string(builtin, &value)
            }
            Builtin::Hash => {
                let [value] = exact_args::<1>(name, args)?;
                self.builtin_hash(&value)
            }
            Builtin::Id => {
                let [value] = exact_args::<1>(name, args)?;
                Ok(Value::Int(reflect::object_id(&value)))
            }
            Builtin::Callable => {
                let [value] = exact_args::<1>(name, args)?;
                Ok(Value::Bool(reflect::is_callable(&value)))
            }
            Builtin::Getattr => self.builtin_getattr(args),
            Builtin::Hasattr => {
                let [object, attr] = exact_args::<2>(name, args)?;
                let attr = attr_name(name, &attr)?;
                Ok(Value::Bool(self.lookup_attr(&object, &attr)?.is_some()))
            }
            Builtin::Setattr => {
                let [object, attr, value] = exact_args::<3>(name, args)?;
                let attr = attr_name(name, &attr)?;
                self.set_attr(&object, &attr, value)?;
                Ok(Value::None)
            }
            Builtin::Delattr => {
                let [object, attr] = exact_args::<2>(name, args)?;
                let attr = attr_name(name, &attr)?;
                self.delete_attr(&object, &attr)?;
                Ok(Value::None)
            }
            Builtin::Print
            | Builtin::Input
            | Builtin::Min
            | Builtin::Max
            | Builtin::Sorted
            | Builtin::Enumerate
            | Builtin::Sum
            | Builtin::Zip
            | Builtin::Round
            | Builtin::Pow
            | Builtin::Super => unreachable!("dispatched by call_builtin"),
        }
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Removes and returns keyword argument `name`.
pub(crate) fn take_kwarg(kwargs: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let index = kwargs.iter().position(|(key, _)| key == name)?;
    Some(kwargs.remove(index).1)
}

/// Fails on any keyword argument left over after the known ones were taken.
pub(crate) fn reject_kwargs(function: &str, kwargs: &[(String, Value)]) -> RunResult<()> {
    match kwargs.first() {
        Some((key, _)) => ExcType::TypeError.err(format!("'{key}' is an invalid keyword argument for {function}()")),
        None => Ok(()),
    }
}

pub(crate) fn check_arg_count(function: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    let given = args.len();
    if given < min {
        return ExcType::TypeError.err(format!(
            "{function} expected at least {min} argument{}, got {given}",
            crate::call::plural(min)
        ));
    }
    if given > max {
        return ExcType::TypeError.err(format!(
            "{function} expected at most {max} argument{}, got {given}",
            crate::call::plural(max)
        ));
    }
    Ok(())
}

/// Destructures exactly `N` positional arguments.
pub(crate) fn exact_args<const N: usize>(function: &str, args: Vec<Value>) -> RunResult<[Value; N]> {
    let given = args.len();
    args.try_into().map_err(|_| {
        let message = if N == 0 {
            format!("{function}() takes no arguments ({given} given)")
        } else if N == 1 {
            format!("{function}() takes exactly one argument ({given} given)")
        } else {
            format!("{function} expected {N} arguments, got {given}")
        };
        ExcType::TypeError.raise(message)
    })
}

fn attr_name(function: &str, attr: &Value) -> RunResult<String> {
    match attr {
        Value::Str(s) => Ok(s.to_string()),
        other => ExcType::TypeError.err(format!(
            "{function}(): attribute name must be string, not '{}'",
            other.type_name()
        )),
    }
}

/// `isinstance`/`issubclass` checks for class-like values other than user classes.
pub(crate) fn issubclass(class: &Value, parent: &Value) -> RunResult<bool> {
    if let Value::Tuple(options) = parent {
        for option in options.iter() {
            if issubclass(class, option)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(match (class, parent) {
        (_, Value::Type(PyType::Object)) => matches!(class, Value::Type(_) | Value::ExcType(_) | Value::Class(_)),
        (Value::Type(a), Value::Type(b)) => a == b || (*a == PyType::Bool && *b == PyType::Int),
        (Value::ExcType(a), Value::ExcType(b)) => a.is_subclass_of(*b),
        (Value::Class(a), Value::Class(b)) => a.is_subclass_of(b),
        (Value::Class(a), Value::ExcType(b)) => a.exc_base.is_some_and(|base| base.is_subclass_of(*b)),
        (Value::Type(_) | Value::ExcType(_) | Value::Class(_), Value::Type(_) | Value::ExcType(_) | Value::Class(_)) => false,
        (Value::Type(_) | Value::ExcType(_) | Value::Class(_), _) => {
            return ExcType::TypeError.err("issubclass() arg 2 must be a class, a tuple of classes, or a union");
        }
        _ => return ExcType::TypeError.err("issubclass() arg 1 must be a class"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_exposes_builtin_names_only() {
        assert!(matches!(lookup("print"), Some(Value::Native(NativeFunction::Builtin(Builtin::Print)))));
        assert!(matches!(lookup("int"), Some(Value::Type(PyType::Int))));
        assert!(matches!(lookup("ValueError"), Some(Value::ExcType(ExcType::ValueError))));
        assert!(lookup("NoneType").is_none());
        assert!(lookup("function").is_none());
        assert!(lookup("undefined_name").is_none());
    }

    #[test]
    fn builtin_subclass_relations() {
        let bool_ty = Value::Type(PyType::Bool);
        assert!(issubclass(&bool_ty, &Value::Type(PyType::Int)).unwrap());
        assert!(!issubclass(&Value::Type(PyType::Int), &bool_ty).unwrap());
        assert!(
            issubclass(
                &Value::ExcType(ExcType::ZeroDivisionError),
                &Value::ExcType(ExcType::ArithmeticError)
            )
            .unwrap()
        );
    }
}
