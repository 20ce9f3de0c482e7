//! Expression evaluation.
//!
//! Each expression kind with a non-trivial body lives in its own helper so the
//! recursive `eval` frame stays small; deep Python recursion goes through it
//! once per call level.

use std::{borrow::Cow, str::FromStr};

use crate::{
    exception::{ExcType, RunResult},
    expressions::{Arg, CmpOperator, Comprehension, Conversion, Expr, FStringPart, Literal},
    fstring::{FormatSpec, ParsedFormatSpec, format_with_spec},
    function::new_namespace,
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::{Dict, Set, Value},
};

/// Evaluated `lower:upper:step` of a subscript; `None` for omitted parts.
pub(crate) struct SliceBounds {
    pub lower: Option<Value>,
    pub upper: Option<Value>,
    pub step: Option<Value>,
}

enum CompKind<'e> {
    List(&'e Expr),
    Set(&'e Expr),
    Dict(&'e Expr, &'e Expr),
}

enum CompOut {
    Items(Vec<Value>),
    Pairs(Vec<(Value, Value)>),
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> RunResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Name(name) => self.load_name(name),
            Expr::List(items) => Ok(Value::list(self.eval_items(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(items)?)),
            Expr::Set(items) => {
                let items = self.eval_items(items)?;
                Ok(Value::set(Set::from_values(items)?))
            }
            Expr::Dict(pairs) => self.eval_dict(pairs),
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary_op(&left, *op, &right)
            }
            Expr::BoolOp { and, values } => self.eval_bool_op(*and, values),
            Expr::Not(operand) => {
                let value = self.eval(operand)?;
                Ok(Value::Bool(!self.truthy(&value)?))
            }
            Expr::Neg(operand) => {
                let value = self.eval(operand)?;
                self.negate(&value)
            }
            Expr::Pos(operand) => {
                let value = self.eval(operand)?;
                self.positive(&value)
            }
            Expr::Invert(operand) => {
                let value = self.eval(operand)?;
                self.invert(&value)
            }
            Expr::Compare { left, ops } => self.eval_compare(left, ops),
            Expr::IfElse { test, body, orelse } => {
                let test = self.eval(test)?;
                if self.truthy(&test)? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Attribute { object, attr } => {
                let object = self.eval(object)?;
                self.get_attr(&object, attr)
            }
            Expr::Subscript { object, index } => self.eval_subscript(object, index),
            Expr::Slice { .. } => ExcType::TypeError.err("slices are only supported inside subscripts"),
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp { elt, generators } => self.eval_comprehension(CompKind::List(elt), generators),
            Expr::SetComp { elt, generators } => self.eval_comprehension(CompKind::Set(elt), generators),
            Expr::DictComp { key, value, generators } => {
                self.eval_comprehension(CompKind::Dict(key, value), generators)
            }
            Expr::Generator { elt, generators } => {
                let items = self.eval_comprehension(CompKind::List(elt), generators)?;
                let items = self.iterate(&items)?;
                Ok(Value::iterator("generator", items))
            }
            Expr::FString(parts) => Ok(Value::from(self.eval_fstring(parts)?)),
            Expr::Named { target, value } => {
                let value = self.eval(value)?;
                self.store_name(target, value.clone());
                Ok(value)
            }
        }
    }

    fn eval_items(&mut self, items: &[Expr]) -> RunResult<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(self.eval(item)?);
        }
        Ok(values)
    }

    fn eval_dict(&mut self, pairs: &[(Expr, Expr)]) -> RunResult<Value> {
        let mut dict = Dict::new();
        for (key, value) in pairs {
            let key = self.eval(key)?;
            let value = self.eval(value)?;
            dict.insert(key, value)?;
        }
        Ok(Value::dict(dict))
    }

    fn eval_bool_op(&mut self, and: bool, values: &[Expr]) -> RunResult<Value> {
        let mut result = Value::None;
        for expr in values {
            result = self.eval(expr)?;
            if self.truthy(&result)? != and {
                break;
            }
        }
        Ok(result)
    }

    fn eval_compare(&mut self, left: &Expr, ops: &[(CmpOperator, Expr)]) -> RunResult<Value> {
        let mut lhs = self.eval(left)?;
        for (op, right) in ops {
            let rhs = self.eval(right)?;
            if !self.compare(&lhs, *op, &rhs)? {
                return Ok(Value::Bool(false));
            }
            lhs = rhs;
        }
        Ok(Value::Bool(true))
    }

    fn eval_call(&mut self, func: &Expr, args: &[Arg], kwargs: &[(String, Expr)]) -> RunResult<Value> {
        let callee = self.eval(func)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Plain(expr) => values.push(self.eval(expr)?),
                Arg::Star(expr) => {
                    let iterable = self.eval(expr)?;
                    values.extend(self.iterate(&iterable)?);
                }
            }
        }
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            keywords.push((name.clone(), self.eval(expr)?));
        }
        self.call_value(&callee, values, keywords)
    }

    fn eval_subscript(&mut self, object: &Expr, index: &Expr) -> RunResult<Value> {
        let object = self.eval(object)?;
        if let Expr::Slice { lower, upper, step } = index {
            let bounds = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
            return self.get_slice(&object, &bounds);
        }
        let index = self.eval(index)?;
        self.get_item(&object, &index)
    }

    pub(crate) fn eval_slice_bounds(
        &mut self,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
        step: Option<&Expr>,
    ) -> RunResult<SliceBounds> {
        let mut eval_part = |part: Option<&Expr>| -> RunResult<Option<Value>> {
            match part {
                Some(expr) => match self.eval(expr)? {
                    Value::None => Ok(None),
                    value => Ok(Some(value)),
                },
                None => Ok(None),
            }
        };
        Ok(SliceBounds {
            lower: eval_part(lower)?,
            upper: eval_part(upper)?,
            step: eval_part(step)?,
        })
    }

    // ========================================================================
    // Comprehensions
    // ========================================================================

    /// Runs a comprehension in its own scope. The first iterable is evaluated
    /// in the enclosing scope, as CPython does.
    fn eval_comprehension(&mut self, kind: CompKind<'_>, generators: &[Comprehension]) -> RunResult<Value> {
        let Some(first) = generators.first() else {
            return ExcType::SyntaxError.err("comprehension without a for clause");
        };
        let iterable = self.eval(&first.iter)?;
        let items = self.iterate(&iterable)?;

        let mut out = match kind {
            CompKind::Dict(..) => CompOut::Pairs(Vec::new()),
            _ => CompOut::Items(Vec::new()),
        };
        self.frame_mut().comp_scopes.push(new_namespace());
        let result = self.comprehension_level(&kind, generators, 0, items, &mut out);
        self.frame_mut().comp_scopes.pop();
        result?;

        Ok(match (kind, out) {
            (CompKind::Set(_), CompOut::Items(items)) => Value::set(Set::from_values(items)?),
            (_, CompOut::Items(items)) => Value::list(items),
            (_, CompOut::Pairs(pairs)) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    dict.insert(key, value)?;
                }
                Value::dict(dict)
            }
        })
    }

    fn comprehension_level(
        &mut self,
        kind: &CompKind<'_>,
        generators: &[Comprehension],
        level: usize,
        items: Vec<Value>,
        out: &mut CompOut,
    ) -> RunResult<()> {
        let generator = &generators[level];
        'items: for item in items {
            self.assign_comprehension(&generator.target, item)?;
            for condition in &generator.ifs {
                let value = self.eval(condition)?;
                if !self.truthy(&value)? {
                    continue 'items;
                }
            }
            if let Some(next) = generators.get(level + 1) {
                let iterable = self.eval(&next.iter)?;
                let inner = self.iterate(&iterable)?;
                self.comprehension_level(kind, generators, level + 1, inner, out)?;
                continue;
            }
            match (kind, &mut *out) {
                (CompKind::List(elt) | CompKind::Set(elt), CompOut::Items(values)) => values.push(self.eval(elt)?),
                (CompKind::Dict(key, value), CompOut::Pairs(pairs)) => {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    pairs.push((key, value));
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // f-strings
    // ========================================================================

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> RunResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Interpolation {
                    expr,
                    conversion,
                    spec,
                    debug_prefix,
                } => {
                    if let Some(prefix) = debug_prefix {
                        out.push_str(prefix);
                    }
                    let value = self.eval(expr)?;
                    let text = self.format_interpolation(&value, *conversion, spec.as_ref(), debug_prefix.is_some())?;
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }

    fn format_interpolation(
        &mut self,
        value: &Value,
        conversion: Conversion,
        spec: Option<&FormatSpec>,
        debug: bool,
    ) -> RunResult<String> {
        let converted = match conversion {
            Conversion::Repr => Some(self.py_repr(value)?),
            Conversion::Str => Some(self.py_str(value)?),
            Conversion::None if debug && spec.is_none() => Some(self.py_repr(value)?),
            Conversion::None => None,
        };
        let Some(spec) = spec else {
            return match converted {
                Some(text) => Ok(text),
                None => self.py_str(value),
            };
        };
        let parsed = match spec {
            FormatSpec::Static(parsed) => Cow::Borrowed(parsed),
            FormatSpec::Dynamic(parts) => {
                let text = self.eval_fstring(parts)?;
                Cow::Owned(ParsedFormatSpec::from_str(&text).map_err(|err| ExcType::ValueError.raise(err))?)
            }
        };
        match converted {
            Some(text) => {
                let text = Value::from(text);
                let plain = text.py_str();
                format_with_spec(&text, &plain, &parsed)
            }
            None => self.format_value(value, &parsed),
        }
    }

    /// `format(value, spec)`; user instances are formatted through `str()`.
    pub(crate) fn format_value(&mut self, value: &Value, spec: &ParsedFormatSpec) -> RunResult<String> {
        let plain = self.py_str(value)?;
        if matches!(value, Value::Instance(_)) {
            return format_with_spec(&Value::from(plain.as_str()), &plain, spec);
        }
        format_with_spec(value, &plain, spec)
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Ellipsis => Value::Ellipsis,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::LongInt(i) => Value::from_bigint(i.clone()),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::from(s.as_str()),
    }
}
