//! Builtins that consume or produce iterables: `min`, `max`, `sum`,
//! `enumerate`, `zip`, `map`, `filter`, `reversed`, `iter` and `next`.
//!
//! Lazy iterators are produced eagerly and wrapped in a one-shot iterator
//! object, which is observably the same for programs without side effects in
//! their mapped functions.

use std::rc::Rc;

use crate::{
    builtins::{check_arg_count, reject_kwargs, take_kwarg},
    exception::{ExcType, RunError, RunResult},
    expressions::Operator,
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(super) fn builtin_min_max(&mut self, is_max: bool, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let name = if is_max { "max" } else { "min" };
        let key = take_kwarg(&mut kwargs, "key").filter(|key| !matches!(key, Value::None));
        let default = take_kwarg(&mut kwargs, "default");
        reject_kwargs(name, &kwargs)?;

        let items = match args.len() {
            0 => return ExcType::TypeError.err(format!("{name} expected at least 1 argument, got 0")),
            1 => self.iterate(&args[0])?,
            _ => {
                if default.is_some() {
                    return ExcType::TypeError.err(format!(
                        "Cannot specify a default for {name}() with multiple positional arguments"
                    ));
                }
                args
            }
        };

        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let rank = match &key {
                Some(key) => self.call_value(key, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_rank, _)) if is_max => self.less_than(best_rank, &rank)?,
                Some((best_rank, _)) => self.less_than(&rank, best_rank)?,
            };
            if replace {
                best = Some((rank, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => ExcType::ValueError.err(format!("{name}() arg is an empty sequence")),
        }
    }

    pub(super) fn builtin_sum(&mut self, args: Vec<Value>, start: Option<Value>) -> RunResult<Value> {
        check_arg_count("sum", &args, 1, 2)?;
        let mut args = args.into_iter();
        let iterable = args.next().unwrap_or(Value::None);
        let mut total = start.or_else(|| args.next()).unwrap_or(Value::Int(0));
        if matches!(total, Value::Str(_)) {
            return ExcType::TypeError.err("sum() can't sum strings [use ''.join(seq) instead]");
        }
        let mut iter = self.for_iter(&iterable)?;
        while let Some(item) = self.next_item(&mut iter)? {
            total = self.binary_op(&total, Operator::Add, &item)?;
        }
        Ok(total)
    }

    pub(super) fn builtin_enumerate(&mut self, args: Vec<Value>, start: Option<Value>) -> RunResult<Value> {
        check_arg_count("enumerate", &args, 1, 2)?;
        let mut args = args.into_iter();
        let iterable = args.next().unwrap_or(Value::None);
        let start = match start.or_else(|| args.next()) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                ExcType::TypeError.raise(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name()
                ))
            })?,
        };
        let items = self.iterate(&iterable)?;
        let pairs = items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]));
        Ok(Value::iterator("enumerate", pairs))
    }

    pub(super) fn builtin_zip(&mut self, args: Vec<Value>, strict: Option<Value>) -> RunResult<Value> {
        let strict = match strict {
            Some(value) => self.truthy(&value)?,
            None => false,
        };
        let mut columns = Vec::with_capacity(args.len());
        for arg in &args {
            columns.push(self.iterate(arg)?);
        }
        let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
        if strict {
            let first = columns.first().map_or(0, Vec::len);
            if let Some(position) = columns.iter().position(|column| column.len() != first) {
                let relation = if columns[position].len() < first { "shorter" } else { "longer" };
                let previous = if position == 1 { "argument 1".to_owned() } else { format!("arguments 1-{position}") };
                return ExcType::ValueError.err(format!(
                    "zip() argument {} is {relation} than {previous}",
                    position + 1
                ));
            }
        }
        let mut columns: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
        let rows = (0..shortest).map(|_| Value::tuple(columns.iter_mut().filter_map(Iterator::next).collect()));
        Ok(Value::iterator("zip", rows.collect::<Vec<_>>()))
    }

    pub(super) fn builtin_map(&mut self, args: Vec<Value>) -> RunResult<Value> {
        if args.len() < 2 {
            return ExcType::TypeError.err("map() must have at least two arguments.");
        }
        let mut args = args.into_iter();
        let function = args.next().unwrap_or(Value::None);
        let mut columns = Vec::new();
        for iterable in args {
            columns.push(self.iterate(&iterable)?);
        }
        let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
        let mut results = Vec::with_capacity(shortest);
        for i in 0..shortest {
            let call_args = columns.iter().map(|column| column[i].clone()).collect();
            results.push(self.call_value(&function, call_args, Vec::new())?);
        }
        Ok(Value::iterator("map", results))
    }

    pub(super) fn builtin_filter(&mut self, function: &Value, iterable: &Value) -> RunResult<Value> {
        let items = self.iterate(iterable)?;
        let mut kept = Vec::new();
        for item in items {
            let keep = match function {
                Value::None => item.clone(),
                function => self.call_value(function, vec![item.clone()], Vec::new())?,
            };
            if self.truthy(&keep)? {
                kept.push(item);
            }
        }
        Ok(Value::iterator("filter", kept))
    }

    pub(super) fn builtin_reversed(&mut self, value: &Value) -> RunResult<Value> {
        let (kind, mut items) = match value {
            Value::List(_) => ("list_reverseiterator", self.iterate(value)?),
            Value::Tuple(_) | Value::Str(_) => ("reversed", self.iterate(value)?),
            Value::Range(_) => ("range_iterator", self.iterate(value)?),
            Value::Dict(_) => ("dict_reversekeyiterator", self.iterate(value)?),
            Value::Instance(instance) => {
                if let Some(result) = self.call_dunder(instance, "__reversed__", Vec::new())? {
                    return Ok(result);
                }
                let len = self.len_of(value)?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    items.push(self.get_item(value, &Value::from(i))?);
                }
                ("reversed", items)
            }
            other => {
                return ExcType::TypeError.err(format!("'{}' object is not reversible", other.type_name()));
            }
        };
        items.reverse();
        Ok(Value::iterator(kind, items))
    }

    pub(super) fn builtin_iter(&mut self, value: &Value) -> RunResult<Value> {
        let kind = match value {
            Value::Iterator(_) => return Ok(value.clone()),
            Value::Instance(instance) => {
                return match self.call_dunder(instance, "__iter__", Vec::new())? {
                    Some(iterator) => Ok(iterator),
                    None => ExcType::TypeError.err(format!("'{}' object is not iterable", value.type_name())),
                };
            }
            Value::List(_) => "list_iterator",
            Value::Tuple(_) => "tuple_iterator",
            Value::Str(_) => "str_ascii_iterator",
            Value::Range(_) => "range_iterator",
            Value::Dict(_) => "dict_keyiterator",
            Value::Set(_) => "set_iterator",
            other => return ExcType::TypeError.err(format!("'{}' object is not iterable", other.type_name())),
        };
        Ok(Value::iterator(kind, self.iterate(value)?))
    }

    pub(super) fn builtin_next(&mut self, args: Vec<Value>) -> RunResult<Value> {
        check_arg_count("next", &args, 1, 2)?;
        let mut args = args.into_iter();
        let iterator = args.next().unwrap_or(Value::None);
        let default = args.next();
        let next = match &iterator {
            Value::Iterator(iter) => iter.items.borrow_mut().pop_front(),
            Value::Instance(instance) if instance.class.lookup("__next__").is_some() => {
                let instance = Rc::clone(instance);
                if default.is_none() {
                    return self
                        .call_dunder(&instance, "__next__", Vec::new())
                        .map(|value| value.unwrap_or(Value::None));
                }
                self.try_depth += 1;
                let result = self.call_dunder(&instance, "__next__", Vec::new());
                self.try_depth -= 1;
                match result {
                    Ok(value) => value,
                    Err(RunError::Exc { object, .. }) if object.exc.exc_type() == ExcType::StopIteration => None,
                    Err(err) => return Err(err),
                }
            }
            other => {
                return ExcType::TypeError.err(format!("'{}' object is not an iterator", other.type_name()));
            }
        };
        match (next, default) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(ExcType::StopIteration.raise(String::new())),
        }
    }
}
