//! Methods of builtin types (`list.append`, `str.split`, `dict.get`, ...).
//!
//! `has_method` decides whether attribute access produces a bound native
//! method, and `call_method` runs it. Dict views (`keys`, `values`, `items`)
//! are returned as lists.

use std::{cell::RefCell, rc::Rc};

use num_traits::Signed;

use crate::{
    builtins::{PyType, check_arg_count, exact_args, reject_kwargs, take_kwarg, type_of},
    call::no_kwargs,
    exception::{ExcType, RunResult},
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::{Dict, Set, Value},
};

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear", "copy",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "clear", "copy", "fromkeys",
];

const SET_METHODS: &[&str] = &[
    "add",
    "remove",
    "discard",
    "pop",
    "clear",
    "copy",
    "update",
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "intersection_update",
    "difference_update",
    "issubset",
    "issuperset",
    "isdisjoint",
];

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "casefold",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "rsplit",
    "splitlines",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "rfind",
    "index",
    "rindex",
    "count",
    "format",
    "isdigit",
    "isdecimal",
    "isnumeric",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
    "istitle",
    "title",
    "capitalize",
    "swapcase",
    "center",
    "ljust",
    "rjust",
    "zfill",
    "partition",
    "rpartition",
    "removeprefix",
    "removesuffix",
];

const INT_METHODS: &[&str] = &["bit_length"];

const FLOAT_METHODS: &[&str] = &["is_integer"];

fn methods_of_type(ty: PyType) -> &'static [&'static str] {
    match ty {
        PyType::List => LIST_METHODS,
        PyType::Tuple => TUPLE_METHODS,
        PyType::Dict => DICT_METHODS,
        PyType::Set => SET_METHODS,
        PyType::Str => STR_METHODS,
        PyType::Int | PyType::Bool => INT_METHODS,
        PyType::Float => FLOAT_METHODS,
        _ => &[],
    }
}

/// Whether `object.name` is a native method.
pub(crate) fn has_method(object: &Value, name: &str) -> bool {
    let methods = match object {
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Bool(_) | Value::Int(_) | Value::LongInt(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Type(ty) => methods_of_type(*ty),
        _ => return false,
    };
    methods.contains(&name)
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    /// Runs the native method `name` on `receiver`.
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        match receiver {
            Value::List(items) => self.list_method(items, name, args, kwargs),
            Value::Tuple(items) => {
                no_kwargs(name, &kwargs)?;
                self.sequence_search(items, "tuple", name, args)
            }
            Value::Dict(dict) => self.dict_method(dict, name, args, kwargs),
            Value::Set(set) => {
                no_kwargs(name, &kwargs)?;
                self.set_method(set, name, args)
            }
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::Bool(_) | Value::Int(_) | Value::LongInt(_) if name == "bit_length" => {
                exact_args::<0>("int.bit_length", args)?;
                let bits = receiver.as_bigint().unwrap_or_default().abs().bits();
                Ok(Value::Int(i64::try_from(bits).unwrap_or(i64::MAX)))
            }
            Value::Float(f) if name == "is_integer" => {
                exact_args::<0>("float.is_integer", args)?;
                Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
            }
            Value::Type(ty) => self.call_unbound(*ty, name, args, kwargs),
            Value::Instance(instance) if name == "__init__" => {
                no_kwargs("__init__", &kwargs)?;
                if instance.class.exc_base.is_some() {
                    instance.attrs.borrow_mut().insert("args".to_owned(), Value::tuple(args));
                } else if !args.is_empty() {
                    return ExcType::TypeError
                        .err("object.__init__() takes exactly one argument (the instance to initialize)");
                }
                Ok(Value::None)
            }
            other => ExcType::AttributeError.err(format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            )),
        }
    }

    /// `str.upper("a")`, `dict.fromkeys(keys)` and other calls through the type.
    fn call_unbound(&mut self, ty: PyType, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let type_name: &'static str = ty.into();
        if ty == PyType::Dict && name == "fromkeys" {
            no_kwargs("fromkeys", &kwargs)?;
            check_arg_count("fromkeys", &args, 1, 2)?;
            let keys = self.iterate(&args[0])?;
            let value = args.get(1).cloned().unwrap_or(Value::None);
            let mut dict = Dict::new();
            for key in keys {
                dict.insert(key, value.clone())?;
            }
            return Ok(Value::dict(dict));
        }
        let mut args = args.into_iter();
        let Some(receiver) = args.next() else {
            return ExcType::TypeError.err(format!(
                "unbound method {type_name}.{name}() needs an argument"
            ));
        };
        let matches_type = match type_of(&receiver) {
            Value::Type(actual) => actual == ty || (ty == PyType::Int && actual == PyType::Bool),
            _ => false,
        };
        if !matches_type {
            return ExcType::TypeError.err(format!(
                "descriptor '{name}' for '{type_name}' objects doesn't apply to a '{}' object",
                receiver.type_name()
            ));
        }
        self.call_method(&receiver, name, args.collect(), kwargs)
    }

    // ========================================================================
    // list and tuple
    // ========================================================================

    fn list_method(
        &mut self,
        items: &Rc<RefCell<Vec<Value>>>,
        name: &str,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        if name == "sort" {
            if !args.is_empty() {
                return ExcType::TypeError.err("sort() takes no positional arguments");
            }
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse");
            reject_kwargs("sort", &kwargs)?;
            let reverse = match reverse {
                Some(value) => self.truthy(&value)?,
                None => false,
            };
            let current = std::mem::take(&mut *items.borrow_mut());
            let sorted = self.sort_values(current.clone(), key.as_ref(), reverse);
            // A failed sort leaves the list as it was.
            *items.borrow_mut() = match &sorted {
                Ok(sorted) => sorted.clone(),
                Err(_) => current,
            };
            return sorted.map(|_| Value::None);
        }
        no_kwargs(name, &kwargs)?;
        let qualified = format!("list.{name}");
        match name {
            "append" => {
                let [value] = exact_args::<1>(&qualified, args)?;
                items.borrow_mut().push(value);
                Ok(Value::None)
            }
            "extend" => {
                let [iterable] = exact_args::<1>(&qualified, args)?;
                let extra = self.iterate(&iterable)?;
                items.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                let [index, value] = exact_args::<2>("insert", args)?;
                let index = index_arg(&index)?;
                let mut items = items.borrow_mut();
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(usize::try_from(position).unwrap_or(0), value);
                Ok(Value::None)
            }
            "pop" => {
                check_arg_count("pop", &args, 0, 1)?;
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    return ExcType::IndexError.err("pop from empty list");
                }
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = match args.first() {
                    Some(index) => index_arg(index)?,
                    None => -1,
                };
                let position = if index < 0 { index + len } else { index };
                if !(0..len).contains(&position) {
                    return ExcType::IndexError.err("pop index out of range");
                }
                Ok(items.remove(usize::try_from(position).unwrap_or(0)))
            }
            "remove" => {
                let [value] = exact_args::<1>(&qualified, args)?;
                let snapshot = items.borrow().clone();
                for (i, item) in snapshot.iter().enumerate() {
                    if item.is_same(&value) || self.values_eq(item, &value)? {
                        items.borrow_mut().remove(i);
                        return Ok(Value::None);
                    }
                }
                ExcType::ValueError.err("list.remove(x): x not in list")
            }
            "index" | "count" => {
                let snapshot = items.borrow().clone();
                self.sequence_search(&snapshot, "list", name, args)
            }
            "reverse" => {
                exact_args::<0>(&qualified, args)?;
                items.borrow_mut().reverse();
                Ok(Value::None)
            }
            "clear" => {
                exact_args::<0>(&qualified, args)?;
                items.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                exact_args::<0>(&qualified, args)?;
                Ok(Value::list(items.borrow().clone()))
            }
            _ => no_such_method("list", name),
        }
    }

    /// `index` and `count` shared by lists and tuples.
    fn sequence_search(&mut self, items: &[Value], type_name: &str, name: &str, args: Vec<Value>) -> RunResult<Value> {
        if name == "count" {
            let [value] = exact_args::<1>(&format!("{type_name}.count"), args)?;
            let mut count = 0;
            for item in items {
                if item.is_same(&value) || self.values_eq(item, &value)? {
                    count += 1;
                }
            }
            return Ok(Value::Int(count));
        }
        if name != "index" {
            return no_such_method(type_name, name);
        }
        check_arg_count("index", &args, 1, 3)?;
        let len = items.len();
        let start = args.get(1).map(|v| clamp_index(v, len)).transpose()?.unwrap_or(0);
        let end = args.get(2).map(|v| clamp_index(v, len)).transpose()?.unwrap_or(len);
        for (i, item) in items.iter().enumerate().take(end).skip(start) {
            if item.is_same(&args[0]) || self.values_eq(item, &args[0])? {
                return Ok(Value::from(i));
            }
        }
        if type_name == "list" {
            let repr = self.py_repr(&args[0])?;
            ExcType::ValueError.err(format!("{repr} is not in list"))
        } else {
            ExcType::ValueError.err("tuple.index(x): x not in tuple")
        }
    }

    // ========================================================================
    // dict
    // ========================================================================

    fn dict_method(&mut self, dict: &Rc<RefCell<Dict>>, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        if name == "update" {
            check_arg_count("update", &args, 0, 1)?;
            let mut updated = dict.borrow().clone();
            if let Some(source) = args.first() {
                self.dict_update(&mut updated, source)?;
            }
            for (key, value) in kwargs {
                updated.insert(Value::from(key), value)?;
            }
            *dict.borrow_mut() = updated;
            return Ok(Value::None);
        }
        no_kwargs(name, &kwargs)?;
        match name {
            "get" => {
                check_arg_count("get", &args, 1, 2)?;
                let found = dict.borrow().get(&args[0])?;
                Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
            }
            "keys" => {
                exact_args::<0>("dict.keys", args)?;
                Ok(Value::list(dict.borrow().keys()))
            }
            "values" => {
                exact_args::<0>("dict.values", args)?;
                Ok(Value::list(dict.borrow().values()))
            }
            "items" => {
                exact_args::<0>("dict.items", args)?;
                let items = dict.borrow().items();
                Ok(Value::list(
                    items.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect(),
                ))
            }
            "pop" => {
                check_arg_count("pop", &args, 1, 2)?;
                let removed = dict.borrow_mut().remove(&args[0])?;
                match (removed, args.get(1)) {
                    (Some(value), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(self.key_error(&args[0])),
                }
            }
            "popitem" => {
                exact_args::<0>("dict.popitem", args)?;
                let last = dict.borrow_mut().pop_last();
                match last {
                    Some((key, value)) => Ok(Value::tuple(vec![key, value])),
                    None => ExcType::KeyError.err("'popitem(): dictionary is empty'"),
                }
            }
            "setdefault" => {
                check_arg_count("setdefault", &args, 1, 2)?;
                let existing = dict.borrow().get(&args[0])?;
                match existing {
                    Some(value) => Ok(value),
                    None => {
                        let value = args.get(1).cloned().unwrap_or(Value::None);
                        dict.borrow_mut().insert(args[0].clone(), value.clone())?;
                        Ok(value)
                    }
                }
            }
            "clear" => {
                exact_args::<0>("dict.clear", args)?;
                dict.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                exact_args::<0>("dict.copy", args)?;
                Ok(Value::dict(dict.borrow().clone()))
            }
            "fromkeys" => self.call_unbound(PyType::Dict, name, args, Vec::new()),
            _ => no_such_method("dict", name),
        }
    }

    // ========================================================================
    // set
    // ========================================================================

    fn set_method(&mut self, set: &Rc<RefCell<Set>>, name: &str, args: Vec<Value>) -> RunResult<Value> {
        let qualified = format!("set.{name}");
        match name {
            "add" => {
                let [value] = exact_args::<1>(&qualified, args)?;
                set.borrow_mut().add(value)?;
                Ok(Value::None)
            }
            "remove" => {
                let [value] = exact_args::<1>(&qualified, args)?;
                let removed = set.borrow_mut().remove(&value)?;
                if removed { Ok(Value::None) } else { Err(self.key_error(&value)) }
            }
            "discard" => {
                let [value] = exact_args::<1>(&qualified, args)?;
                set.borrow_mut().remove(&value)?;
                Ok(Value::None)
            }
            "pop" => {
                exact_args::<0>(&qualified, args)?;
                let popped = set.borrow_mut().pop_first();
                popped.ok_or_else(|| ExcType::KeyError.raise("'pop from an empty set'"))
            }
            "clear" => {
                exact_args::<0>(&qualified, args)?;
                set.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                exact_args::<0>(&qualified, args)?;
                Ok(Value::set(set.borrow().clone()))
            }
            "update" | "intersection_update" | "difference_update" => {
                let current = set.borrow().values();
                let mut others = Vec::with_capacity(args.len());
                for arg in &args {
                    others.push(Set::from_values(self.iterate(arg)?)?);
                }
                let mut result = Set::new();
                match name {
                    "update" => {
                        for value in current.into_iter().chain(others.iter().flat_map(Set::values)) {
                            result.add(value)?;
                        }
                    }
                    _ => {
                        let keep_common = name == "intersection_update";
                        'values: for value in current {
                            for other in &others {
                                if other.contains(&value)? != keep_common {
                                    continue 'values;
                                }
                            }
                            result.add(value)?;
                        }
                    }
                }
                *set.borrow_mut() = result;
                Ok(Value::None)
            }
            "union" | "intersection" | "difference" | "symmetric_difference" => {
                let mut result = set.borrow().clone();
                for arg in &args {
                    let other = Set::from_values(self.iterate(arg)?)?;
                    result = combine_sets(&result, &other, name)?;
                }
                Ok(Value::set(result))
            }
            "issubset" | "issuperset" | "isdisjoint" => {
                let [other] = exact_args::<1>(&qualified, args)?;
                let other = Set::from_values(self.iterate(&other)?)?;
                let this = set.borrow();
                let outcome = match name {
                    "issubset" => all_contained(&this, &other)?,
                    "issuperset" => all_contained(&other, &this)?,
                    _ => combine_sets(&this, &other, "intersection")?.len() == 0,
                };
                Ok(Value::Bool(outcome))
            }
            _ => no_such_method("set", name),
        }
    }

    // ========================================================================
    // str
    // ========================================================================

    fn str_method(&mut self, s: &Rc<str>, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        if name == "format" {
            return Ok(Value::from(self.str_format(s, &args, &kwargs)?));
        }
        if name == "split" || name == "rsplit" {
            return str_split(s, name == "rsplit", args, kwargs);
        }
        no_kwargs(name, &kwargs)?;
        let qualified = format!("str.{name}");
        let text: &str = s;
        Ok(match name {
            "upper" => Value::from(check_no_args(&qualified, args, text.to_uppercase())?),
            "lower" | "casefold" => Value::from(check_no_args(&qualified, args, text.to_lowercase())?),
            "swapcase" => {
                let swapped = text
                    .chars()
                    .flat_map(|c| {
                        if c.is_uppercase() {
                            c.to_lowercase().collect::<Vec<_>>()
                        } else {
                            c.to_uppercase().collect::<Vec<_>>()
                        }
                    })
                    .collect::<String>();
                Value::from(check_no_args(&qualified, args, swapped)?)
            }
            "title" => Value::from(check_no_args(&qualified, args, title_case(text))?),
            "capitalize" => {
                let mut chars = text.chars();
                let capitalized = match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                    None => String::new(),
                };
                Value::from(check_no_args(&qualified, args, capitalized)?)
            }
            "strip" | "lstrip" | "rstrip" => {
                check_arg_count(name, &args, 0, 1)?;
                let chars: Option<Vec<char>> = match args.first() {
                    None | Some(Value::None) => None,
                    Some(Value::Str(chars)) => Some(chars.chars().collect()),
                    Some(other) => {
                        return ExcType::TypeError.err(format!(
                            "{name} arg must be None or str, not {}",
                            other.type_name()
                        ));
                    }
                };
                let matcher = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
                Value::from(match name {
                    "strip" => text.trim_matches(matcher),
                    "lstrip" => text.trim_start_matches(matcher),
                    _ => text.trim_end_matches(matcher),
                })
            }
            "splitlines" => {
                check_arg_count(name, &args, 0, 1)?;
                let keepends = args.first().is_some_and(Value::is_truthy);
                Value::list(split_lines(text, keepends).into_iter().map(Value::from).collect())
            }
            "join" => {
                let [iterable] = exact_args::<1>(&qualified, args)?;
                let items = self.iterate(&iterable)?;
                let mut parts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(part) => parts.push(part.to_string()),
                        other => {
                            return ExcType::TypeError.err(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            ));
                        }
                    }
                }
                Value::from(parts.join(text))
            }
            "replace" => {
                check_arg_count("replace", &args, 2, 3)?;
                let old = str_arg("replace", &args[0])?;
                let new = str_arg("replace", &args[1])?;
                let count = match args.get(2) {
                    Some(count) => index_arg(count)?,
                    None => -1,
                };
                Value::from(match usize::try_from(count) {
                    Ok(count) => text.replacen(old, new, count),
                    Err(_) => text.replace(old, new),
                })
            }
            "startswith" | "endswith" => {
                check_arg_count(name, &args, 1, 3)?;
                let region = char_region(text, args.get(1), args.get(2))?;
                let candidates = match &args[0] {
                    Value::Tuple(options) => options.to_vec(),
                    other => vec![other.clone()],
                };
                let mut found = false;
                for candidate in &candidates {
                    let Value::Str(affix) = candidate else {
                        return ExcType::TypeError.err(format!(
                            "{name} first arg must be str or a tuple of str, not {}",
                            candidate.type_name()
                        ));
                    };
                    found |= if name == "startswith" { region.starts_with(&**affix) } else { region.ends_with(&**affix) };
                }
                Value::Bool(found)
            }
            "find" | "rfind" | "index" | "rindex" => {
                check_arg_count(name, &args, 1, 3)?;
                let needle = str_arg(name, &args[0])?;
                let offset = char_offset(text, args.get(1))?;
                let region = char_region(text, args.get(1), args.get(2))?;
                let found = if name.starts_with('r') { region.rfind(needle) } else { region.find(needle) };
                match found {
                    Some(byte) => Value::from(offset + region[..byte].chars().count()),
                    None if name.ends_with("index") => return ExcType::ValueError.err("substring not found"),
                    None => Value::Int(-1),
                }
            }
            "count" => {
                check_arg_count(name, &args, 1, 3)?;
                let needle = str_arg(name, &args[0])?;
                let region = char_region(text, args.get(1), args.get(2))?;
                let count = if needle.is_empty() { region.chars().count() + 1 } else { region.matches(needle).count() };
                Value::from(count)
            }
            "isdigit" | "isdecimal" | "isnumeric" => {
                exact_args::<0>(&qualified, args)?;
                Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || (name == "isnumeric" && c.is_numeric())))
            }
            "isalpha" => {
                exact_args::<0>(&qualified, args)?;
                Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))
            }
            "isalnum" => {
                exact_args::<0>(&qualified, args)?;
                Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))
            }
            "isspace" => {
                exact_args::<0>(&qualified, args)?;
                Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))
            }
            "isupper" | "islower" => {
                exact_args::<0>(&qualified, args)?;
                let cased: Vec<char> = text.chars().filter(|c| c.is_lowercase() || c.is_uppercase()).collect();
                let want_upper = name == "isupper";
                Value::Bool(!cased.is_empty() && cased.iter().all(|c| c.is_uppercase() == want_upper))
            }
            "istitle" => {
                exact_args::<0>(&qualified, args)?;
                Value::Bool(text.chars().any(char::is_alphabetic) && title_case(text) == text)
            }
            "center" | "ljust" | "rjust" => {
                check_arg_count(name, &args, 1, 2)?;
                let width = usize::try_from(index_arg(&args[0])?).unwrap_or(0);
                let fill = match args.get(1) {
                    None => ' ',
                    Some(Value::Str(fill)) if fill.chars().count() == 1 => fill.chars().next().unwrap_or(' '),
                    Some(_) => {
                        return ExcType::TypeError.err("The fill character must be exactly one character long");
                    }
                };
                Value::from(pad(text, width, fill, name))
            }
            "zfill" => {
                let [width] = exact_args::<1>(&qualified, args)?;
                let width = usize::try_from(index_arg(&width)?).unwrap_or(0);
                let len = text.chars().count();
                if len >= width {
                    Value::from(text)
                } else {
                    let (sign, digits) = match text.chars().next() {
                        Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                        _ => (String::new(), text),
                    };
                    Value::from(format!("{sign}{}{digits}", "0".repeat(width - len)))
                }
            }
            "partition" | "rpartition" => {
                let [sep] = exact_args::<1>(&qualified, args)?;
                let sep = str_arg(name, &sep)?;
                if sep.is_empty() {
                    return ExcType::ValueError.err("empty separator");
                }
                let found = if name == "partition" { text.find(sep) } else { text.rfind(sep) };
                let parts = match found {
                    Some(i) => [&text[..i], sep, &text[i + sep.len()..]],
                    None if name == "partition" => [text, "", ""],
                    None => ["", "", text],
                };
                Value::tuple(parts.into_iter().map(Value::from).collect())
            }
            "removeprefix" => {
                let [prefix] = exact_args::<1>(&qualified, args)?;
                let prefix = str_arg(name, &prefix)?;
                Value::from(text.strip_prefix(prefix).unwrap_or(text))
            }
            "removesuffix" => {
                let [suffix] = exact_args::<1>(&qualified, args)?;
                let suffix = str_arg(name, &suffix)?;
                Value::from(text.strip_suffix(suffix).unwrap_or(text))
            }
            _ => return no_such_method("str", name),
        })
    }

    // ========================================================================
    // str.format
    // ========================================================================

    /// `template.format(*args, **kwargs)`.
    pub(crate) fn str_format(&mut self, template: &str, args: &[Value], kwargs: &[(String, Value)]) -> RunResult<String> {
        let mut numbering = FieldNumbering::default();
        self.format_template(template, args, kwargs, &mut numbering, 0)
    }

    fn format_template(
        &mut self,
        template: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        numbering: &mut FieldNumbering,
        depth: usize,
    ) -> RunResult<String> {
        if depth > 1 {
            return ExcType::ValueError.err("Max string recursion exceeded");
        }
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    out.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    out.push('}');
                    i += 2;
                }
                '}' => return ExcType::ValueError.err("Single '}' encountered in format string"),
                '{' => {
                    let mut level = 1;
                    let mut end = i + 1;
                    while end < chars.len() {
                        match chars[end] {
                            '{' => level += 1,
                            '}' => {
                                level -= 1;
                                if level == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        end += 1;
                    }
                    if end >= chars.len() {
                        return ExcType::ValueError.err("expected '}' before end of string");
                    }
                    let field: String = chars[i + 1..end].iter().collect();
                    let text = self.format_field(&field, args, kwargs, numbering, depth)?;
                    out.push_str(&text);
                    i = end + 1;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    fn format_field(
        &mut self,
        field: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        numbering: &mut FieldNumbering,
        depth: usize,
    ) -> RunResult<String> {
        let (head, spec) = match field.find(':') {
            Some(i) => (&field[..i], Some(&field[i + 1..])),
            None => (field, None),
        };
        let (name, conversion) = match head.find('!') {
            Some(i) => (&head[..i], Some(&head[i + 1..])),
            None => (head, None),
        };
        let first_len = name.find(['.', '[']).unwrap_or(name.len());
        let (first, mut rest) = name.split_at(first_len);

        let mut value = if first.is_empty() {
            let index = numbering.next_auto()?;
            positional(args, index)?
        } else if let Ok(index) = first.parse::<usize>() {
            numbering.manual()?;
            positional(args, index)?
        } else {
            match kwargs.iter().find(|(key, _)| key == first) {
                Some((_, value)) => value.clone(),
                None => {
                    let mut repr = String::new();
                    crate::value::string_repr(&mut repr, first);
                    return ExcType::KeyError.err(repr);
                }
            }
        };

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                value = self.get_attr(&value, &after[..end])?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(close) = after.find(']') else {
                    return ExcType::ValueError.err("Missing ']' in format string");
                };
                let key = &after[..close];
                let key = key.parse::<i64>().map_or_else(|_| Value::from(key), Value::Int);
                value = self.get_item(&value, &key)?;
                rest = &after[close + 1..];
            } else {
                return ExcType::ValueError.err("Only '.' or '[' may follow ']' in format field specifier");
            }
        }

        let value = match conversion {
            None => value,
            Some("r") => Value::from(self.py_repr(&value)?),
            Some("s") => Value::from(self.py_str(&value)?),
            Some(other) => {
                return ExcType::ValueError.err(format!("Unknown conversion specifier {other}"));
            }
        };
        let spec = match spec {
            Some(spec) if spec.contains('{') => self.format_template(spec, args, kwargs, numbering, depth + 1)?,
            Some(spec) => spec.to_owned(),
            None => String::new(),
        };
        let parsed = spec
            .parse::<crate::fstring::ParsedFormatSpec>()
            .map_err(|err| ExcType::ValueError.raise(err))?;
        self.format_value(&value, &parsed)
    }
}

/// Tracks automatic (`{}`) versus manual (`{0}`) field numbering in `str.format`.
#[derive(Default)]
struct FieldNumbering {
    next: usize,
    manual: bool,
    auto: bool,
}

impl FieldNumbering {
    fn next_auto(&mut self) -> RunResult<usize> {
        if self.manual {
            return ExcType::ValueError.err("cannot switch from manual field specification to automatic field numbering");
        }
        self.auto = true;
        self.next += 1;
        Ok(self.next - 1)
    }

    fn manual(&mut self) -> RunResult<()> {
        if self.auto {
            return ExcType::ValueError.err("cannot switch from automatic field numbering to manual field specification");
        }
        self.manual = true;
        Ok(())
    }
}

fn positional(args: &[Value], index: usize) -> RunResult<Value> {
    args.get(index).cloned().ok_or_else(|| {
        ExcType::IndexError.raise(format!(
            "Replacement index {index} out of range for positional args tuple"
        ))
    })
}

fn no_such_method(type_name: &str, name: &str) -> RunResult<Value> {
    ExcType::AttributeError.err(format!("'{type_name}' object has no attribute '{name}'"))
}

fn check_no_args(name: &str, args: Vec<Value>, result: String) -> RunResult<String> {
    exact_args::<0>(name, args)?;
    Ok(result)
}

fn index_arg(value: &Value) -> RunResult<i64> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(value.as_i64().unwrap_or_default()),
        Value::LongInt(i) => Ok(if i.is_negative() { i64::MIN } else { i64::MAX }),
        other => ExcType::TypeError.err(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        )),
    }
}

fn str_arg<'v>(function: &str, value: &'v Value) -> RunResult<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => ExcType::TypeError.err(format!(
            "{function}() argument must be str, not {}",
            other.type_name()
        )),
    }
}

/// Resolves a `start`/`end` argument to a char index clamped to `0..=len`.
fn clamp_index(value: &Value, len: usize) -> RunResult<usize> {
    if matches!(value, Value::None) {
        return Ok(len);
    }
    let index = index_arg(value)?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let index = if index < 0 { (index + len_i).max(0) } else { index.min(len_i) };
    Ok(usize::try_from(index).unwrap_or(0))
}

fn char_offset(text: &str, start: Option<&Value>) -> RunResult<usize> {
    match start {
        None | Some(Value::None) => Ok(0),
        Some(start) => clamp_index(start, text.chars().count()),
    }
}

/// The substring selected by optional `start`/`end` char indices.
fn char_region<'t>(text: &'t str, start: Option<&Value>, end: Option<&Value>) -> RunResult<&'t str> {
    let len = text.chars().count();
    let start = char_offset(text, start)?;
    let end = match end {
        None => len,
        Some(end) => clamp_index(end, len)?,
    };
    if start >= end {
        return Ok("");
    }
    let byte = |index: usize| text.char_indices().nth(index).map_or(text.len(), |(b, _)| b);
    Ok(&text[byte(start)..byte(end)])
}

fn str_split(text: &str, from_right: bool, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let name = if from_right { "rsplit" } else { "split" };
    let sep = take_kwarg(&mut kwargs, "sep");
    let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
    reject_kwargs(name, &kwargs)?;
    check_arg_count(name, &args, 0, 2)?;
    let mut args = args.into_iter();
    let sep = sep.or_else(|| args.next());
    let maxsplit = match maxsplit.or_else(|| args.next()) {
        Some(value) => index_arg(&value)?,
        None => -1,
    };
    let limit = usize::try_from(maxsplit).ok();

    let parts: Vec<String> = match sep {
        None | Some(Value::None) => split_whitespace(text, limit, from_right),
        Some(Value::Str(sep)) => {
            if sep.is_empty() {
                return ExcType::ValueError.err("empty separator");
            }
            match (limit, from_right) {
                (None, _) => text.split(&*sep).map(str::to_owned).collect(),
                (Some(n), false) => text.splitn(n + 1, &*sep).map(str::to_owned).collect(),
                (Some(n), true) => {
                    let mut parts: Vec<String> = text.rsplitn(n + 1, &*sep).map(str::to_owned).collect();
                    parts.reverse();
                    parts
                }
            }
        }
        Some(other) => {
            return ExcType::TypeError.err(format!("must be str or None, not {}", other.type_name()));
        }
    };
    Ok(Value::list(parts.into_iter().map(Value::from).collect()))
}

/// Whitespace splitting with an optional split limit, as `str.split()` does.
fn split_whitespace(text: &str, limit: Option<usize>, from_right: bool) -> Vec<String> {
    let Some(limit) = limit else {
        return text.split_whitespace().map(str::to_owned).collect();
    };
    let mut parts = Vec::new();
    if from_right {
        let mut rest = text.trim_end();
        while !rest.is_empty() {
            if parts.len() == limit {
                parts.push(rest.to_owned());
                break;
            }
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                    parts.push(rest[i + ws_len..].to_owned());
                    rest = rest[..i].trim_end();
                }
                None => {
                    parts.push(rest.to_owned());
                    break;
                }
            }
        }
        parts.reverse();
    } else {
        let mut rest = text.trim_start();
        while !rest.is_empty() {
            if parts.len() == limit {
                parts.push(rest.to_owned());
                break;
            }
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    parts.push(rest[..i].to_owned());
                    rest = rest[i..].trim_start();
                }
                None => {
                    parts.push(rest.to_owned());
                    break;
                }
            }
        }
    }
    parts
}

fn split_lines(text: &str, keepends: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c, '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}') {
            if keepends {
                current.push(c);
            }
            if c == '\r' && chars.peek() == Some(&'\n') {
                chars.next();
                if keepends {
                    current.push('\n');
                }
            }
            lines.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn pad(text: &str, width: usize, fill: char, mode: &str) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_owned();
    }
    let total = width - len;
    let (left, right) = match mode {
        "ljust" => (0, total),
        "rjust" => (total, 0),
        // CPython puts the extra character on the left when the text length is odd.
        _ => {
            let left = total / 2 + (total & width & 1);
            (left, total - left)
        }
    };
    let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    format!("{}{text}{}", fill_str(left), fill_str(right))
}

fn combine_sets(a: &Set, b: &Set, op: &str) -> RunResult<Set> {
    let mut result = Set::new();
    match op {
        "union" => {
            for value in a.values().into_iter().chain(b.values()) {
                result.add(value)?;
            }
        }
        "intersection" => {
            for value in a.values() {
                if b.contains(&value)? {
                    result.add(value)?;
                }
            }
        }
        "difference" => {
            for value in a.values() {
                if !b.contains(&value)? {
                    result.add(value)?;
                }
            }
        }
        _ => {
            for value in a.values() {
                if !b.contains(&value)? {
                    result.add(value)?;
                }
            }
            for value in b.values() {
                if !a.contains(&value)? {
                    result.add(value)?;
                }
            }
        }
    }
    Ok(result)
}

fn all_contained(inner: &Set, outer: &Set) -> RunResult<bool> {
    for value in inner.values() {
        if !outer.contains(&value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_split_with_limits() {
        assert_eq!(split_whitespace("  a b  c ", None, false), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", Some(1), false), vec!["a", "b c"]);
        assert_eq!(split_whitespace("a b c", Some(1), true), vec!["a b", "c"]);
        assert!(split_whitespace("   ", Some(2), false).is_empty());
    }

    #[test]
    fn splitlines_handles_crlf() {
        assert_eq!(split_lines("a\r\nb\nc", false), vec!["a", "b", "c"]);
        assert_eq!(split_lines("a\nb\n", true), vec!["a\n", "b\n"]);
    }

    #[test]
    fn padding_matches_cpython() {
        assert_eq!(pad("ab", 5, '*', "center"), "**ab*");
        assert_eq!(pad("abc", 6, '*', "center"), "*abc**");
        assert_eq!(pad("x", 3, '-', "ljust"), "x--");
        assert_eq!(pad("x", 3, '-', "rjust"), "--x");
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("hello world"), "Hello World");
        assert_eq!(title_case("they're"), "They'Re");
    }

    #[test]
    fn method_tables() {
        assert!(has_method(&Value::list(Vec::new()), "append"));
        assert!(has_method(&Value::from("x"), "join"));
        assert!(has_method(&Value::Type(PyType::Dict), "fromkeys"));
        assert!(!has_method(&Value::Int(1), "append"));
    }
}
