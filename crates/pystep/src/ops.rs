//! Operators, truthiness, string conversion, subscripts and iteration.

use std::{cmp::Ordering, rc::Rc};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use crate::{
    eval::SliceBounds,
    exception::{ExcType, RunError, RunResult},
    expressions::{CmpOperator, Operator},
    fstring::{Align, ParsedFormatSpec, format_with_spec},
    function::Instance,
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::{Dict, RangeValue, ReprHook, Set, Value, float_mod},
};

/// Largest sequence the interpreter will materialize in one go.
const MAX_SEQUENCE_LEN: usize = 50_000_000;

/// Iteration state for `for` loops and everything that consumes an iterable.
pub(crate) enum ForIter {
    Range { range: RangeValue, next: usize },
    /// Lists are iterated live by index, so appends during the loop are seen.
    List { items: Rc<std::cell::RefCell<Vec<Value>>>, next: usize },
    Items(std::vec::IntoIter<Value>),
    Iter(Rc<crate::value::PyIter>),
    /// A user object implementing `__next__`.
    Protocol(Rc<Instance>),
}

impl<T: Tracer, P: PrintWriter> ReprHook for Interp<'_, T, P> {
    fn instance_text(&mut self, instance: &Rc<Instance>, use_str: bool) -> RunResult<Option<String>> {
        let names: &[&str] = if use_str { &["__str__", "__repr__"] } else { &["__repr__"] };
        for name in names {
            if let Some(result) = self.call_dunder(instance, name, Vec::new())? {
                return match result {
                    Value::Str(text) => Ok(Some(text.to_string())),
                    other => ExcType::TypeError.err(format!(
                        "{name} returned non-string (type {})",
                        other.type_name()
                    )),
                };
            }
        }
        let Some(base) = instance.class.exc_base else {
            return Ok(None);
        };
        let args = match instance.attrs.borrow().get("args") {
            Some(Value::Tuple(args)) => args.to_vec(),
            _ => Vec::new(),
        };
        if use_str {
            return Ok(Some(self.exception_message(base, &args)?.unwrap_or_default()));
        }
        let mut text = format!("{}(", instance.class.name);
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(&self.py_repr(arg)?);
        }
        text.push(')');
        Ok(Some(text))
    }
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn py_str(&mut self, value: &Value) -> RunResult<String> {
        value.render(self, true)
    }

    pub(crate) fn py_repr(&mut self, value: &Value) -> RunResult<String> {
        value.render(self, false)
    }

    pub(crate) fn truthy(&mut self, value: &Value) -> RunResult<bool> {
        let Value::Instance(instance) = value else {
            return Ok(value.is_truthy());
        };
        if let Some(result) = self.call_dunder(instance, "__bool__", Vec::new())? {
            return match result {
                Value::Bool(b) => Ok(b),
                other => ExcType::TypeError.err(format!(
                    "__bool__ should return bool, returned {}",
                    other.type_name()
                )),
            };
        }
        if instance.class.lookup("__len__").is_some() {
            return Ok(self.len_of(value)? > 0);
        }
        Ok(true)
    }

    pub(crate) fn len_of(&mut self, value: &Value) -> RunResult<usize> {
        if let Some(len) = value.builtin_len() {
            return Ok(len);
        }
        if let Value::Instance(instance) = value {
            if let Some(result) = self.call_dunder(instance, "__len__", Vec::new())? {
                return match result.as_i64() {
                    Some(len) if len >= 0 => Ok(usize::try_from(len).unwrap_or(usize::MAX)),
                    Some(_) => ExcType::ValueError.err("__len__() should return >= 0"),
                    None => ExcType::TypeError.err(format!(
                        "'{}' object cannot be interpreted as an integer",
                        result.type_name()
                    )),
                };
            }
        }
        ExcType::TypeError.err(format!("object of type '{}' has no len()", value.type_name()))
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    pub(crate) fn binary_op(&mut self, lhs: &Value, op: Operator, rhs: &Value) -> RunResult<Value> {
        if let (Value::Str(fmt), Operator::Mod) = (lhs, op) {
            return Ok(Value::from(self.percent_format(fmt, rhs)?));
        }
        if matches!(lhs, Value::Instance(_)) || matches!(rhs, Value::Instance(_)) {
            if let Some(result) = self.instance_binary(lhs, op, rhs)? {
                return Ok(result);
            }
        }
        match builtin_binary(lhs, op, rhs)? {
            Some(result) => Ok(result),
            None => Err(binary_type_error(lhs, op, rhs)),
        }
    }

    /// `a op= b`: lists extend in place, everything else rebinds.
    pub(crate) fn inplace_op(&mut self, lhs: &Value, op: Operator, rhs: &Value) -> RunResult<Value> {
        match (lhs, op) {
            (Value::List(items), Operator::Add) => {
                let extra = self.iterate(rhs)?;
                items.borrow_mut().extend(extra);
                Ok(lhs.clone())
            }
            (Value::Set(set), Operator::BitOr) => {
                let extra = self.iterate(rhs)?;
                let mut set = set.borrow_mut();
                for value in extra {
                    set.add(value)?;
                }
                drop(set);
                Ok(lhs.clone())
            }
            (Value::Instance(instance), _) => {
                let name = format!("__i{}", &dunder_names(op).0[2..]);
                match self.call_dunder(instance, &name, vec![rhs.clone()])? {
                    Some(result) => Ok(result),
                    None => self.binary_op(lhs, op, rhs),
                }
            }
            _ => self.binary_op(lhs, op, rhs),
        }
    }

    fn instance_binary(&mut self, lhs: &Value, op: Operator, rhs: &Value) -> RunResult<Option<Value>> {
        let (name, reflected) = dunder_names(op);
        if let Value::Instance(instance) = lhs {
            if let Some(result) = self.call_dunder(instance, name, vec![rhs.clone()])? {
                return Ok(Some(result));
            }
        }
        if let Value::Instance(instance) = rhs {
            return self.call_dunder(instance, reflected, vec![lhs.clone()]);
        }
        Ok(None)
    }

    pub(crate) fn negate(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Bool(_) | Value::Int(_) => {
                let i = value.as_i64().unwrap_or_default();
                Ok(i.checked_neg().map_or_else(|| Value::from_bigint(-BigInt::from(i)), Value::Int))
            }
            Value::LongInt(i) => Ok(Value::from_bigint(-(**i).clone())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Instance(instance) => self.unary_dunder(instance, "__neg__", "-", value),
            other => ExcType::TypeError.err(format!("bad operand type for unary -: '{}'", other.type_name())),
        }
    }

    pub(crate) fn positive(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Int(_) | Value::LongInt(_) | Value::Float(_) => Ok(value.clone()),
            Value::Instance(instance) => self.unary_dunder(instance, "__pos__", "+", value),
            other => ExcType::TypeError.err(format!("bad operand type for unary +: '{}'", other.type_name())),
        }
    }

    pub(crate) fn invert(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Bool(_) | Value::Int(_) => Ok(Value::Int(!value.as_i64().unwrap_or_default())),
            Value::LongInt(i) => Ok(Value::from_bigint(-((**i).clone() + 1_i32))),
            Value::Instance(instance) => self.unary_dunder(instance, "__invert__", "~", value),
            other => ExcType::TypeError.err(format!("bad operand type for unary ~: '{}'", other.type_name())),
        }
    }

    fn unary_dunder(&mut self, instance: &Rc<Instance>, name: &str, symbol: &str, value: &Value) -> RunResult<Value> {
        match self.call_dunder(instance, name, Vec::new())? {
            Some(result) => Ok(result),
            None => ExcType::TypeError.err(format!(
                "bad operand type for unary {symbol}: '{}'",
                value.type_name()
            )),
        }
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    pub(crate) fn compare(&mut self, lhs: &Value, op: CmpOperator, rhs: &Value) -> RunResult<bool> {
        match op {
            CmpOperator::Eq => self.values_eq(lhs, rhs),
            CmpOperator::NotEq => {
                if let Value::Instance(instance) = lhs {
                    if let Some(result) = self.call_dunder(instance, "__ne__", vec![rhs.clone()])? {
                        return self.truthy(&result);
                    }
                }
                Ok(!self.values_eq(lhs, rhs)?)
            }
            CmpOperator::Lt | CmpOperator::LtE | CmpOperator::Gt | CmpOperator::GtE => self.order(lhs, op, rhs),
            CmpOperator::Is => Ok(lhs.is_same(rhs)),
            CmpOperator::IsNot => Ok(!lhs.is_same(rhs)),
            CmpOperator::In => self.contains(rhs, lhs),
            CmpOperator::NotIn => Ok(!self.contains(rhs, lhs)?),
        }
    }

    /// `==` including user `__eq__` and element-wise comparison of sequences.
    pub(crate) fn values_eq(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        for (receiver, other) in [(lhs, rhs), (rhs, lhs)] {
            if let Value::Instance(instance) = receiver {
                if let Some(result) = self.call_dunder(instance, "__eq__", vec![other.clone()])? {
                    return self.truthy(&result);
                }
            }
        }
        let pair = match (lhs, rhs) {
            (Value::List(a), Value::List(b)) => Some((a.borrow().clone(), b.borrow().clone())),
            (Value::Tuple(a), Value::Tuple(b)) => Some((a.to_vec(), b.to_vec())),
            _ => None,
        };
        match pair {
            Some((a, b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(&b) {
                    if !x.is_same(y) && !self.values_eq(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            None => lhs.py_eq(rhs),
        }
    }

    fn order(&mut self, lhs: &Value, op: CmpOperator, rhs: &Value) -> RunResult<bool> {
        let (name, reflected) = match op {
            CmpOperator::Lt => ("__lt__", "__gt__"),
            CmpOperator::LtE => ("__le__", "__ge__"),
            CmpOperator::Gt => ("__gt__", "__lt__"),
            _ => ("__ge__", "__le__"),
        };
        if let Value::Instance(instance) = lhs {
            if let Some(result) = self.call_dunder(instance, name, vec![rhs.clone()])? {
                return self.truthy(&result);
            }
        }
        if let Value::Instance(instance) = rhs {
            if let Some(result) = self.call_dunder(instance, reflected, vec![lhs.clone()])? {
                return self.truthy(&result);
            }
        }
        if lhs.is_number() && rhs.is_number() && !(lhs.is_int_like() && rhs.is_int_like()) {
            let (a, b) = (lhs.as_f64().unwrap_or(f64::NAN), rhs.as_f64().unwrap_or(f64::NAN));
            return Ok(match op {
                CmpOperator::Lt => a < b,
                CmpOperator::LtE => a <= b,
                CmpOperator::Gt => a > b,
                _ => a >= b,
            });
        }
        let ordering = match (lhs, rhs) {
            (Value::List(_) | Value::Tuple(_), Value::List(_) | Value::Tuple(_))
                if std::mem::discriminant(lhs) == std::mem::discriminant(rhs) =>
            {
                self.sequence_order(lhs, rhs)?
            }
            _ => lhs.py_cmp(rhs)?,
        };
        match ordering {
            Some(ordering) => Ok(match op {
                CmpOperator::Lt => ordering == Ordering::Less,
                CmpOperator::LtE => ordering != Ordering::Greater,
                CmpOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
            None => ExcType::TypeError.err(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )),
        }
    }

    /// Lexicographic ordering that honours user `__eq__`/`__lt__` on elements.
    fn sequence_order(&mut self, lhs: &Value, rhs: &Value) -> RunResult<Option<Ordering>> {
        let items = |value: &Value| match value {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            _ => Vec::new(),
        };
        let (a, b) = (items(lhs), items(rhs));
        for (x, y) in a.iter().zip(&b) {
            if x.is_same(y) || self.values_eq(x, y)? {
                continue;
            }
            return Ok(Some(if self.less_than(x, y)? {
                Ordering::Less
            } else {
                Ordering::Greater
            }));
        }
        Ok(Some(a.len().cmp(&b.len())))
    }

    pub(crate) fn less_than(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        self.order(lhs, CmpOperator::Lt, rhs)
    }

    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                other => ExcType::TypeError.err(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::Dict(dict) => dict.borrow().contains(item),
            Value::Set(set) => set.borrow().contains(item),
            Value::Range(range) => Ok(match item.as_i64() {
                Some(i) if item.is_int_like() => {
                    let (lo, hi) = if range.step > 0 { (range.start, range.stop) } else { (range.stop + 1, range.start + 1) };
                    i >= lo && i < hi && (i - range.start) % range.step == 0
                }
                _ => false,
            }),
            Value::Instance(instance) => {
                if let Some(result) = self.call_dunder(instance, "__contains__", vec![item.clone()])? {
                    return self.truthy(&result);
                }
                self.contains_by_iteration(container, item)
            }
            Value::List(_) | Value::Tuple(_) | Value::Iterator(_) => self.contains_by_iteration(container, item),
            other => ExcType::TypeError.err(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    fn contains_by_iteration(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        let mut iter = self.for_iter(container)?;
        while let Some(value) = self.next_item(&mut iter)? {
            if value.is_same(item) || self.values_eq(&value, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Subscripts
    // ========================================================================

    pub(crate) fn get_item(&mut self, object: &Value, index: &Value) -> RunResult<Value> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let i = seq_index(index, items.len(), "list")?;
                i.map(|i| items[i].clone())
                    .ok_or_else(|| ExcType::IndexError.raise("list index out of range"))
            }
            Value::Tuple(items) => {
                let i = seq_index(index, items.len(), "tuple")?;
                i.map(|i| items[i].clone())
                    .ok_or_else(|| ExcType::IndexError.raise("tuple index out of range"))
            }
            Value::Str(s) => {
                if !index.is_int_like() {
                    return ExcType::TypeError.err(format!(
                        "string indices must be integers, not '{}'",
                        index.type_name()
                    ));
                }
                let len = s.chars().count();
                seq_index(index, len, "string")?
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| ExcType::IndexError.raise("string index out of range"))
            }
            Value::Range(range) => seq_index(index, range.len(), "range")?
                .and_then(|i| range.get(i))
                .map(Value::Int)
                .ok_or_else(|| ExcType::IndexError.raise("range object index out of range")),
            Value::Dict(dict) => {
                let found = dict.borrow().get(index)?;
                match found {
                    Some(value) => Ok(value),
                    None => Err(self.key_error(index)),
                }
            }
            Value::Instance(instance) => match self.call_dunder(instance, "__getitem__", vec![index.clone()])? {
                Some(value) => Ok(value),
                None => not_subscriptable(object),
            },
            _ => not_subscriptable(object),
        }
    }

    /// `KeyError` whose message is the key's repr, as CPython renders it.
    pub(crate) fn key_error(&mut self, key: &Value) -> RunError {
        let message = match self.py_repr(key) {
            Ok(message) => message,
            Err(err) => return err,
        };
        RunError::from_object(Rc::new(crate::exception::ExcObject::with_args(
            crate::exception::Exception::new(ExcType::KeyError, Some(message)),
            vec![key.clone()],
        )))
    }

    pub(crate) fn set_item(&mut self, object: &Value, index: Value, value: Value) -> RunResult<()> {
        match object {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                match seq_index(&index, items.len(), "list")? {
                    Some(i) => {
                        items[i] = value;
                        Ok(())
                    }
                    None => ExcType::IndexError.err("list assignment index out of range"),
                }
            }
            Value::Dict(dict) => dict.borrow_mut().insert(index, value),
            Value::Instance(instance) => match self.call_dunder(instance, "__setitem__", vec![index, value])? {
                Some(_) => Ok(()),
                None => item_assignment_error(object),
            },
            _ => item_assignment_error(object),
        }
    }

    pub(crate) fn delete_item(&mut self, object: &Value, index: &Value) -> RunResult<()> {
        match object {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                match seq_index(index, items.len(), "list")? {
                    Some(i) => {
                        items.remove(i);
                        Ok(())
                    }
                    None => ExcType::IndexError.err("list assignment index out of range"),
                }
            }
            Value::Dict(dict) => {
                let removed = dict.borrow_mut().remove(index)?;
                match removed {
                    Some(_) => Ok(()),
                    None => Err(self.key_error(index)),
                }
            }
            Value::Instance(instance) => match self.call_dunder(instance, "__delitem__", vec![index.clone()])? {
                Some(_) => Ok(()),
                None => ExcType::TypeError.err(format!("'{}' object does not support item deletion", object.type_name())),
            },
            other => ExcType::TypeError.err(format!("'{}' object does not support item deletion", other.type_name())),
        }
    }

    pub(crate) fn get_slice(&mut self, object: &Value, bounds: &SliceBounds) -> RunResult<Value> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let indices = slice_indices(items.len(), bounds)?;
                Ok(Value::list(indices.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let indices = slice_indices(items.len(), bounds)?;
                Ok(Value::tuple(indices.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let indices = slice_indices(chars.len(), bounds)?;
                Ok(Value::from(indices.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(range) => {
                let indices = slice_indices(range.len(), bounds)?;
                let step = slice_step(bounds)?;
                let sliced = match (indices.first().and_then(|i| range.get(*i)), i64::try_from(indices.len())) {
                    (Some(start), Ok(len)) => {
                        let step = range.step.saturating_mul(step);
                        RangeValue {
                            start,
                            stop: start.saturating_add(len.saturating_mul(step)),
                            step,
                        }
                    }
                    _ => RangeValue { start: 0, stop: 0, step: 1 },
                };
                Ok(Value::Range(sliced))
            }
            _ => not_subscriptable(object),
        }
    }

    pub(crate) fn set_slice(&mut self, object: &Value, bounds: SliceBounds, value: &Value) -> RunResult<()> {
        let Value::List(items) = object else {
            return item_assignment_error(object);
        };
        let replacement = self.iterate(value)?;
        let mut items = items.borrow_mut();
        let step = slice_step(&bounds)?;
        if step == 1 {
            let len = items.len();
            let start = clamp_bound(bounds.lower.as_ref(), len, 0)?;
            let stop = clamp_bound(bounds.upper.as_ref(), len, len)?.max(start);
            items.splice(start..stop, replacement);
            return Ok(());
        }
        let indices = slice_indices(items.len(), &bounds)?;
        if indices.len() != replacement.len() {
            return ExcType::ValueError.err(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            ));
        }
        for (i, value) in indices.into_iter().zip(replacement) {
            items[i] = value;
        }
        Ok(())
    }

    pub(crate) fn delete_slice(&mut self, object: &Value, bounds: SliceBounds) -> RunResult<()> {
        let Value::List(items) = object else {
            return ExcType::TypeError.err(format!("'{}' object does not support item deletion", object.type_name()));
        };
        let mut items = items.borrow_mut();
        let mut indices = slice_indices(items.len(), &bounds)?;
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for i in indices {
            items.remove(i);
        }
        Ok(())
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    pub(crate) fn for_iter(&mut self, value: &Value) -> RunResult<ForIter> {
        Ok(match value {
            Value::Range(range) => ForIter::Range { range: *range, next: 0 },
            Value::List(items) => ForIter::List {
                items: Rc::clone(items),
                next: 0,
            },
            Value::Tuple(items) => ForIter::Items(items.to_vec().into_iter()),
            Value::Str(s) => ForIter::Items(s.chars().map(|c| Value::from(c.to_string())).collect::<Vec<_>>().into_iter()),
            Value::Dict(dict) => ForIter::Items(dict.borrow().keys().into_iter()),
            Value::Set(set) => ForIter::Items(set.borrow().values().into_iter()),
            Value::Iterator(iter) => ForIter::Iter(Rc::clone(iter)),
            Value::Instance(instance) => match self.call_dunder(instance, "__iter__", Vec::new())? {
                Some(Value::Instance(iterator)) if iterator.class.lookup("__next__").is_some() => {
                    ForIter::Protocol(iterator)
                }
                Some(other) => self.for_iter(&other)?,
                None => return not_iterable(value),
            },
            _ => return not_iterable(value),
        })
    }

    pub(crate) fn next_item(&mut self, iter: &mut ForIter) -> RunResult<Option<Value>> {
        Ok(match iter {
            ForIter::Range { range, next } => {
                let item = range.get(*next).map(Value::Int);
                *next += 1;
                item
            }
            ForIter::List { items, next } => {
                let item = items.borrow().get(*next).cloned();
                *next += 1;
                item
            }
            ForIter::Items(items) => items.next(),
            ForIter::Iter(iter) => iter.items.borrow_mut().pop_front(),
            ForIter::Protocol(instance) => {
                let instance = Rc::clone(instance);
                // StopIteration ends the loop, so it must not be reported as uncaught.
                self.try_depth += 1;
                let result = self.call_dunder(&instance, "__next__", Vec::new());
                self.try_depth -= 1;
                match result {
                    Ok(value) => value,
                    Err(RunError::Exc { object, .. }) if object.exc.exc_type() == ExcType::StopIteration => None,
                    Err(err) => return Err(err),
                }
            }
        })
    }

    /// Collects every item of an iterable.
    pub(crate) fn iterate(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        match value {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            Value::Range(range) if range.len() > MAX_SEQUENCE_LEN => {
                return ExcType::MemoryError.err("range too large to materialize");
            }
            _ => {}
        }
        let mut iter = self.for_iter(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&mut iter)? {
            items.push(item);
        }
        Ok(items)
    }

    /// Stable merge sort with a fallible comparison, as `list.sort` needs.
    pub(crate) fn sort_values(&mut self, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> RunResult<Vec<Value>> {
        let keys = match key {
            Some(key) if !matches!(key, Value::None) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call_value(key, vec![item.clone()], Vec::new())?);
                }
                keys
            }
            _ => items.clone(),
        };
        let pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
        let sorted = self.merge_sort(pairs, reverse)?;
        Ok(sorted.into_iter().map(|(_, value)| value).collect())
    }

    fn merge_sort(&mut self, mut pairs: Vec<(Value, Value)>, reverse: bool) -> RunResult<Vec<(Value, Value)>> {
        if pairs.len() <= 1 {
            return Ok(pairs);
        }
        let right = pairs.split_off(pairs.len() / 2);
        let left = self.merge_sort(pairs, reverse)?;
        let right = self.merge_sort(right, reverse)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            let take_right = if reverse {
                self.less_than(&l.0, &r.0)?
            } else {
                self.less_than(&r.0, &l.0)?
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    // ========================================================================
    // printf-style formatting
    // ========================================================================

    fn percent_format(&mut self, fmt: &str, args: &Value) -> RunResult<String> {
        let mapping = matches!(args, Value::Dict(_)).then(|| args.clone());
        let mut values = match args {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        }
        .into_iter();
        let chars: Vec<char> = fmt.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        let mut used_mapping = false;
        while i < chars.len() {
            if chars[i] != '%' {
                out.push(chars[i]);
                i += 1;
                continue;
            }
            let start = i;
            i += 1;
            let mut key = None;
            if chars.get(i) == Some(&'(') {
                let close = chars[i..].iter().position(|c| *c == ')').map(|p| p + i);
                let Some(close) = close else {
                    return ExcType::ValueError.err("incomplete format key");
                };
                key = Some(chars[i + 1..close].iter().collect::<String>());
                i = close + 1;
            }
            let mut spec = ParsedFormatSpec::default();
            while let Some(flag) = chars.get(i).filter(|c| matches!(c, '-' | '+' | ' ' | '0' | '#')) {
                match flag {
                    '-' => spec.align = Some(Align::Left),
                    '0' => spec.zero = true,
                    '#' => spec.alternate = true,
                    sign => spec.sign = Some(*sign),
                }
                i += 1;
            }
            let mut width = String::new();
            while let Some(digit) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                width.push(*digit);
                i += 1;
            }
            spec.width = width.parse().ok();
            if chars.get(i) == Some(&'.') {
                i += 1;
                let mut precision = String::new();
                while let Some(digit) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                    precision.push(*digit);
                    i += 1;
                }
                spec.precision = Some(precision.parse().unwrap_or(0));
            }
            let Some(&conversion) = chars.get(i) else {
                return ExcType::ValueError.err("incomplete format");
            };
            i += 1;
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let value = match (&key, &mapping) {
                (Some(key), Some(mapping)) => {
                    used_mapping = true;
                    self.get_item(mapping, &Value::from(key.as_str()))?
                }
                (Some(_), None) => return ExcType::TypeError.err("format requires a mapping"),
                (None, _) => match values.next() {
                    Some(value) => value,
                    None => return ExcType::TypeError.err("not enough arguments for format string"),
                },
            };
            out.push_str(&self.percent_conversion(&value, conversion, spec, start)?);
        }
        if !used_mapping && values.next().is_some() && mapping.is_none() {
            return ExcType::TypeError.err("not all arguments converted during string formatting");
        }
        Ok(out)
    }

    fn percent_conversion(&mut self, value: &Value, conversion: char, mut spec: ParsedFormatSpec, at: usize) -> RunResult<String> {
        if spec.align.is_none() && !spec.zero {
            spec.align = Some(Align::Right);
        }
        match conversion {
            's' | 'r' | 'a' => {
                let text = if conversion == 's' { self.py_str(value)? } else { self.py_repr(value)? };
                spec.zero = false;
                let text = Value::from(text);
                let plain = text.py_str();
                format_with_spec(&text, &plain, &spec)
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' => {
                let number = match value {
                    Value::Float(f) => Value::from_bigint(float_to_bigint(*f)?),
                    v if v.is_int_like() => v.clone(),
                    Value::Str(s) if conversion == 'c' => return Ok(s.to_string()),
                    other => {
                        return ExcType::TypeError.err(format!(
                            "%{conversion} format: a real number is required, not {}",
                            other.type_name()
                        ));
                    }
                };
                spec.ty = Some(if matches!(conversion, 'i' | 'u') { 'd' } else { conversion });
                spec.precision = None;
                format_with_spec(&number, "", &spec)
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                if !value.is_number() {
                    return ExcType::TypeError.err(format!(
                        "must be real number, not {}",
                        value.type_name()
                    ));
                }
                spec.ty = Some(conversion);
                format_with_spec(&Value::Float(value.as_f64().unwrap_or_default()), "", &spec)
            }
            other => ExcType::ValueError.err(format!(
                "unsupported format character '{other}' ({:#x}) at index {at}",
                other as u32
            )),
        }
    }
}

/// `(__op__, __rop__)` for a binary operator.
fn dunder_names(op: Operator) -> (&'static str, &'static str) {
    match op {
        Operator::Add => ("__add__", "__radd__"),
        Operator::Sub => ("__sub__", "__rsub__"),
        Operator::Mult => ("__mul__", "__rmul__"),
        Operator::Div => ("__truediv__", "__rtruediv__"),
        Operator::FloorDiv => ("__floordiv__", "__rfloordiv__"),
        Operator::Mod => ("__mod__", "__rmod__"),
        Operator::Pow => ("__pow__", "__rpow__"),
        Operator::LShift => ("__lshift__", "__rlshift__"),
        Operator::RShift => ("__rshift__", "__rrshift__"),
        Operator::BitOr => ("__or__", "__ror__"),
        Operator::BitXor => ("__xor__", "__rxor__"),
        Operator::BitAnd => ("__and__", "__rand__"),
    }
}

fn binary_type_error(lhs: &Value, op: Operator, rhs: &Value) -> RunError {
    let message = match (lhs, op) {
        (Value::Str(_), Operator::Add) => format!("can only concatenate str (not \"{}\") to str", rhs.type_name()),
        (Value::List(_), Operator::Add) => format!("can only concatenate list (not \"{}\") to list", rhs.type_name()),
        (Value::Tuple(_), Operator::Add) => {
            format!("can only concatenate tuple (not \"{}\") to tuple", rhs.type_name())
        }
        (Value::Str(_) | Value::List(_) | Value::Tuple(_), Operator::Mult) => {
            format!("can't multiply sequence by non-int of type '{}'", rhs.type_name())
        }
        _ => format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ),
    };
    ExcType::TypeError.raise(message)
}

/// Arithmetic on builtin values; `None` when the operand types do not support `op`.
pub(crate) fn builtin_binary(lhs: &Value, op: Operator, rhs: &Value) -> RunResult<Option<Value>> {
    if lhs.is_int_like() && rhs.is_int_like() {
        if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
            match op {
                Operator::BitAnd => return Ok(Some(Value::Bool(a & b))),
                Operator::BitOr => return Ok(Some(Value::Bool(a | b))),
                Operator::BitXor => return Ok(Some(Value::Bool(a ^ b))),
                _ => {}
            }
        }
        return int_binary(lhs, op, rhs).map(Some);
    }
    if lhs.is_number() && rhs.is_number() {
        let (a, b) = (lhs.as_f64().unwrap_or_default(), rhs.as_f64().unwrap_or_default());
        return float_binary(a, op, b);
    }
    Ok(match (lhs, op, rhs) {
        (Value::Str(a), Operator::Add, Value::Str(b)) => Some(Value::from(format!("{a}{b}"))),
        (Value::Str(s), Operator::Mult, n) | (n, Operator::Mult, Value::Str(s)) if n.is_int_like() => {
            let count = repeat_count(n, s.len())?;
            Some(Value::from(s.repeat(count)))
        }
        (Value::List(a), Operator::Add, Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Value::list(items))
        }
        (Value::List(items), Operator::Mult, n) | (n, Operator::Mult, Value::List(items)) if n.is_int_like() => {
            let items = items.borrow();
            let count = repeat_count(n, items.len())?;
            Some(Value::list(repeat_items(&items, count)))
        }
        (Value::Tuple(a), Operator::Add, Value::Tuple(b)) => {
            Some(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(items), Operator::Mult, n) | (n, Operator::Mult, Value::Tuple(items)) if n.is_int_like() => {
            let count = repeat_count(n, items.len())?;
            Some(Value::tuple(repeat_items(items, count)))
        }
        (Value::Set(a), Operator::BitOr | Operator::BitAnd | Operator::Sub | Operator::BitXor, Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            let mut result = Set::new();
            match op {
                Operator::BitOr => {
                    for value in a.values().into_iter().chain(b.values()) {
                        result.add(value)?;
                    }
                }
                Operator::BitAnd => {
                    for value in a.values() {
                        if b.contains(&value)? {
                            result.add(value)?;
                        }
                    }
                }
                Operator::Sub => {
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
            Some(Value::set(result))
        }
        (Value::Dict(a), Operator::BitOr, Value::Dict(b)) => {
            let mut result = Dict::new();
            for (key, value) in a.borrow().items().into_iter().chain(b.borrow().items()) {
                result.insert(key, value)?;
            }
            Some(Value::dict(result))
        }
        _ => None,
    })
}

fn repeat_count(n: &Value, item_len: usize) -> RunResult<usize> {
    let count = usize::try_from(n.as_i64().unwrap_or(i64::MAX).max(0)).unwrap_or(usize::MAX);
    if count.saturating_mul(item_len.max(1)) > MAX_SEQUENCE_LEN {
        return ExcType::MemoryError.err("repeated sequence is too large");
    }
    Ok(count)
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_binary(lhs: &Value, op: Operator, rhs: &Value) -> RunResult<Value> {
    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        if let Some(result) = small_int_binary(a, op, b)? {
            return Ok(result);
        }
    }
    let a = lhs.as_bigint().unwrap_or_default();
    let b = rhs.as_bigint().unwrap_or_default();
    big_int_binary(&a, op, &b)
}

/// i64 fast path; `None` means the result needs arbitrary precision.
fn small_int_binary(a: i64, op: Operator, b: i64) -> RunResult<Option<Value>> {
    Ok(match op {
        Operator::Add => a.checked_add(b).map(Value::Int),
        Operator::Sub => a.checked_sub(b).map(Value::Int),
        Operator::Mult => a.checked_mul(b).map(Value::Int),
        Operator::Div => {
            if b == 0 {
                return ExcType::ZeroDivisionError.err("division by zero");
            }
            Some(Value::Float(a as f64 / b as f64))
        }
        Operator::FloorDiv => {
            if b == 0 {
                return ExcType::ZeroDivisionError.err("integer division or modulo by zero");
            }
            if a == i64::MIN && b == -1 { None } else { Some(Value::Int(a.div_floor(&b))) }
        }
        Operator::Mod => {
            if b == 0 {
                return ExcType::ZeroDivisionError.err("integer modulo by zero");
            }
            if b == -1 { Some(Value::Int(0)) } else { Some(Value::Int(a.mod_floor(&b))) }
        }
        Operator::Pow => {
            if b < 0 {
                return float_binary(a as f64, op, b as f64);
            }
            u32::try_from(b).ok().and_then(|b| a.checked_pow(b)).map(Value::Int)
        }
        Operator::LShift => {
            if b < 0 {
                return ExcType::ValueError.err("negative shift count");
            }
            if b < 63 { a.checked_mul(1_i64 << b).map(Value::Int) } else if a == 0 { Some(Value::Int(0)) } else { None }
        }
        Operator::RShift => {
            if b < 0 {
                return ExcType::ValueError.err("negative shift count");
            }
            Some(Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }))
        }
        Operator::BitOr => Some(Value::Int(a | b)),
        Operator::BitXor => Some(Value::Int(a ^ b)),
        Operator::BitAnd => Some(Value::Int(a & b)),
    })
}

fn big_int_binary(a: &BigInt, op: Operator, b: &BigInt) -> RunResult<Value> {
    Ok(Value::from_bigint(match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b.is_zero() {
                return ExcType::ZeroDivisionError.err("division by zero");
            }
            let result = a.to_f64().unwrap_or(f64::NAN) / b.to_f64().unwrap_or(f64::NAN);
            if !result.is_finite() {
                return ExcType::OverflowError.err("integer division result too large for a float");
            }
            return Ok(Value::Float(result));
        }
        Operator::FloorDiv => {
            if b.is_zero() {
                return ExcType::ZeroDivisionError.err("integer division or modulo by zero");
            }
            a.div_floor(b)
        }
        Operator::Mod => {
            if b.is_zero() {
                return ExcType::ZeroDivisionError.err("integer modulo by zero");
            }
            a.mod_floor(b)
        }
        Operator::Pow => {
            if b.is_negative() {
                return float_binary(a.to_f64().unwrap_or(f64::NAN), op, b.to_f64().unwrap_or(f64::NAN))
                    .map(|value| value.unwrap_or(Value::None));
            }
            let Some(exponent) = b.to_u32() else {
                return ExcType::OverflowError.err("exponent too large");
            };
            Pow::pow(a, exponent)
        }
        Operator::LShift | Operator::RShift => {
            if b.is_negative() {
                return ExcType::ValueError.err("negative shift count");
            }
            let Some(shift) = b.to_usize() else {
                return ExcType::OverflowError.err("shift count too large");
            };
            if op == Operator::LShift { a << shift } else { a >> shift }
        }
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::BitAnd => a & b,
    }))
}

fn float_binary(a: f64, op: Operator, b: f64) -> RunResult<Option<Value>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return ExcType::ZeroDivisionError.err("float division by zero");
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return ExcType::ZeroDivisionError.err("float floor division by zero");
            }
            (a / b).floor()
        }
        Operator::Mod => {
            if b == 0.0 {
                return ExcType::ZeroDivisionError.err("float modulo by zero");
            }
            float_mod(a, b)
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return ExcType::ZeroDivisionError.err("0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return ExcType::ValueError.err("negative number cannot be raised to a fractional power");
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return ExcType::OverflowError.err("(34, 'Numerical result out of range')");
            }
            result
        }
        Operator::LShift | Operator::RShift | Operator::BitOr | Operator::BitXor | Operator::BitAnd => return Ok(None),
    };
    Ok(Some(Value::Float(result)))
}

/// Truncates a float to an integer, as `int(x)` does.
pub(crate) fn float_to_bigint(f: f64) -> RunResult<BigInt> {
    if f.is_nan() {
        return ExcType::ValueError.err("cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return ExcType::OverflowError.err("cannot convert float infinity to integer");
    }
    Ok(num_traits::FromPrimitive::from_f64(f.trunc()).unwrap_or_default())
}

/// Resolves a sequence index; `Ok(None)` when it is out of range.
fn seq_index(index: &Value, len: usize, type_name: &str) -> RunResult<Option<usize>> {
    let i = match index {
        Value::Bool(_) | Value::Int(_) => index.as_i64().unwrap_or_default(),
        Value::LongInt(_) => return Ok(None),
        other => {
            return ExcType::TypeError.err(format!(
                "{type_name} indices must be integers or slices, not {}",
                other.type_name()
            ));
        }
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let i = if i < 0 { i + len } else { i };
    Ok(if (0..len).contains(&i) { usize::try_from(i).ok() } else { None })
}

fn slice_step(bounds: &SliceBounds) -> RunResult<i64> {
    match &bounds.step {
        None => Ok(1),
        Some(step) => match slice_int(step)? {
            0 => ExcType::ValueError.err("slice step cannot be zero"),
            step => Ok(step),
        },
    }
}

fn slice_int(value: &Value) -> RunResult<i64> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(value.as_i64().unwrap_or_default()),
        Value::LongInt(i) => Ok(if i.is_negative() { i64::MIN } else { i64::MAX }),
        _ => ExcType::TypeError.err("slice indices must be integers or None or have an __index__ method"),
    }
}

/// Clamps a step-1 slice bound into `0..=len`.
fn clamp_bound(bound: Option<&Value>, len: usize, default: usize) -> RunResult<usize> {
    let Some(bound) = bound else {
        return Ok(default);
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let mut i = slice_int(bound)?;
    if i < 0 {
        i = i.saturating_add(len_i).max(0);
    }
    Ok(usize::try_from(i.min(len_i)).unwrap_or(len))
}

/// Indices selected by a slice, following CPython's `PySlice_AdjustIndices`.
pub(crate) fn slice_indices(len: usize, bounds: &SliceBounds) -> RunResult<Vec<usize>> {
    let step = slice_step(bounds)?;
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let adjust = |bound: &Option<Value>, default: i64, low: i64, high: i64| -> RunResult<i64> {
        match bound {
            None => Ok(default),
            Some(value) => {
                let mut i = slice_int(value)?;
                if i < 0 {
                    i = i.saturating_add(len);
                    if i < 0 {
                        i = low;
                    }
                } else if i >= high {
                    i = high;
                }
                Ok(i)
            }
        }
    };
    let mut indices = Vec::new();
    if step > 0 {
        let start = adjust(&bounds.lower, 0, 0, len)?;
        let stop = adjust(&bounds.upper, len, 0, len)?;
        let mut i = start;
        while i < stop {
            indices.extend(usize::try_from(i).ok());
            i = i.saturating_add(step);
        }
    } else {
        let start = adjust(&bounds.lower, len - 1, -1, len - 1)?;
        let stop = adjust(&bounds.upper, -1, -1, len - 1)?;
        let mut i = start;
        while i > stop {
            indices.extend(usize::try_from(i).ok());
            i = i.saturating_add(step);
        }
    }
    Ok(indices)
}

fn not_subscriptable(object: &Value) -> RunResult<Value> {
    ExcType::TypeError.err(format!("'{}' object is not subscriptable", object.type_name()))
}

fn item_assignment_error(object: &Value) -> RunResult<()> {
    ExcType::TypeError.err(format!(
        "'{}' object does not support item assignment",
        object.type_name()
    ))
}

fn not_iterable<R>(value: &Value) -> RunResult<R> {
    ExcType::TypeError.err(format!("'{}' object is not iterable", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> SliceBounds {
        SliceBounds {
            lower: lower.map(Value::Int),
            upper: upper.map(Value::Int),
            step: step.map(Value::Int),
        }
    }

    #[test]
    fn slice_indices_follow_cpython() {
        assert_eq!(slice_indices(5, &bounds(Some(1), Some(3), None)).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, &bounds(None, None, Some(-1))).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, &bounds(Some(-2), None, None)).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, &bounds(Some(10), Some(-10), Some(-2))).unwrap(), vec![4, 2, 0]);
        assert!(slice_indices(5, &bounds(None, None, Some(0))).is_err());
    }

    #[test]
    fn int_arithmetic_promotes_on_overflow() {
        let big = builtin_binary(&Value::Int(i64::MAX), Operator::Add, &Value::Int(1)).unwrap().unwrap();
        assert_eq!(big.repr(), "9223372036854775808");
        let back = builtin_binary(&big, Operator::Sub, &Value::Int(1)).unwrap().unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
        let floor = builtin_binary(&Value::Int(-7), Operator::FloorDiv, &Value::Int(2)).unwrap().unwrap();
        assert!(matches!(floor, Value::Int(-4)));
        let rem = builtin_binary(&Value::Int(-7), Operator::Mod, &Value::Int(2)).unwrap().unwrap();
        assert!(matches!(rem, Value::Int(1)));
    }

    #[test]
    fn division_by_zero_messages() {
        let err = builtin_binary(&Value::Int(1), Operator::Div, &Value::Int(0)).unwrap_err();
        let RunError::Exc { object, .. } = err else { panic!("expected exception") };
        assert_eq!(object.exc.to_string(), "ZeroDivisionError: division by zero");
        let err = builtin_binary(&Value::Float(1.0), Operator::Div, &Value::Int(0)).unwrap_err();
        let RunError::Exc { object, .. } = err else { panic!("expected exception") };
        assert_eq!(object.exc.message(), "float division by zero");
    }
}
