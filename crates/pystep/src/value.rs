use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::VecDeque,
    fmt::Write as _,
    hash::{Hash, Hasher},
    rc::Rc,
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    builtins::{NativeFunction, PyType},
    exception::{ExcObject, ExcType, RunResult},
    function::{BoundMethod, Class, Function, Instance, Module, SuperProxy},
};

/// Nesting depth at which `repr()` gives up on a container.
pub(crate) const MAX_REPR_DEPTH: usize = 200;

/// Primary value type representing Python objects at runtime.
///
/// Immediate values are stored inline, everything with identity or interior
/// mutability is reference counted. Cloning a `Value` clones the reference,
/// never the object, so aliasing behaves like Python.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range. Always normalized back to `Int` when they fit.
    LongInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Range(RangeValue),
    Iterator(Rc<PyIter>),
    Function(Rc<Function>),
    Native(NativeFunction),
    Type(PyType),
    ExcType(ExcType),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Super(Rc<SuperProxy>),
    Module(Rc<Module>),
    Exception(Rc<ExcObject>),
}

/// `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub(crate) fn len(self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.stop, self.step)
        } else {
            (self.stop, self.start, -self.step)
        };
        if lo >= hi {
            return 0;
        }
        let span = i128::from(hi) - i128::from(lo);
        usize::try_from((span + i128::from(step) - 1) / i128::from(step)).unwrap_or(usize::MAX)
    }

    pub(crate) fn get(self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i64::try_from(index).ok()?.checked_mul(self.step)?;
        self.start.checked_add(offset)
    }

    pub(crate) fn iter(self) -> impl Iterator<Item = i64> {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

/// A one-shot iterator (`iter()`, `enumerate()`, `zip()`, generator
/// expressions, ...). Items are produced eagerly and consumed from the front.
#[derive(Debug)]
pub struct PyIter {
    pub(crate) kind: &'static str,
    pub(crate) items: RefCell<VecDeque<Value>>,
}

impl PyIter {
    pub(crate) fn new(kind: &'static str, items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            kind,
            items: RefCell::new(items.into_iter().collect()),
        }
    }
}

/// Hashable identity of a value, used as the key of dicts and sets.
///
/// Numbers that compare equal hash equal (`1`, `1.0` and `True` share a key).
/// User instances hash by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    BigInt(BigInt),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Named(&'static str),
    Identity(usize),
}

/// Insertion-ordered dict. Keys keep their original value alongside the hash key.
#[derive(Debug, Default, Clone)]
pub struct Dict {
    map: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        Ok(self.map.get(&key.hash_key()?).map(|(_, v)| v.clone()))
    }

    pub(crate) fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.map.contains_key(&key.hash_key()?))
    }

    pub(crate) fn insert(&mut self, key: Value, value: Value) -> RunResult<()> {
        let hash = key.hash_key()?;
        match self.map.get_mut(&hash) {
            Some(entry) => entry.1 = value,
            None => {
                self.map.insert(hash, (key, value));
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        Ok(self.map.shift_remove(&key.hash_key()?).map(|(_, v)| v))
    }

    pub(crate) fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.map.pop().map(|(_, pair)| pair)
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn keys(&self) -> Vec<Value> {
        self.map.values().map(|(k, _)| k.clone()).collect()
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.map.values().map(|(_, v)| v.clone()).collect()
    }

    pub(crate) fn items(&self) -> Vec<(Value, Value)> {
        self.map.values().cloned().collect()
    }
}

/// Insertion-ordered set.
#[derive(Debug, Default, Clone)]
pub struct Set {
    map: IndexMap<HashKey, Value>,
}

impl Set {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_values(values: impl IntoIterator<Item = Value>) -> RunResult<Self> {
        let mut set = Self::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn add(&mut self, value: Value) -> RunResult<()> {
        self.map.entry(value.hash_key()?).or_insert(value);
        Ok(())
    }

    pub(crate) fn contains(&self, value: &Value) -> RunResult<bool> {
        Ok(self.map.contains_key(&value.hash_key()?))
    }

    pub(crate) fn remove(&mut self, value: &Value) -> RunResult<bool> {
        Ok(self.map.shift_remove(&value.hash_key()?).is_some())
    }

    pub(crate) fn pop_first(&mut self) -> Option<Value> {
        self.map.shift_remove_index(0).map(|(_, v)| v)
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.map.values().cloned().collect()
    }
}

/// Supplies user-level `__repr__` / `__str__` results while rendering.
///
/// The interpreter implements this by calling the instance's methods; the
/// debugger's formatter uses [`DefaultRepr`], which never runs user code.
pub(crate) trait ReprHook {
    /// Returns the text for `instance`, or `None` to use the default form.
    fn instance_text(&mut self, instance: &Rc<Instance>, use_str: bool) -> RunResult<Option<String>>;
}

/// Renders every instance as `<__main__.Name object at 0x...>`.
pub(crate) struct DefaultRepr;

impl ReprHook for DefaultRepr {
    fn instance_text(&mut self, _instance: &Rc<Instance>, _use_str: bool) -> RunResult<Option<String>> {
        Ok(None)
    }
}

/// Tracks containers currently being rendered to detect cycles and runaway nesting.
#[derive(Default)]
struct ReprGuard {
    active: Vec<usize>,
}

impl ReprGuard {
    fn enter(&mut self, id: usize) -> RunResult<bool> {
        if self.active.contains(&id) {
            return Ok(false);
        }
        if self.active.len() >= MAX_REPR_DEPTH {
            return ExcType::RecursionError.err("maximum recursion depth exceeded while getting the repr of an object");
        }
        self.active.push(id);
        Ok(true)
    }

    fn leave(&mut self) {
        self.active.pop();
    }
}

fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

fn borrow_error() -> crate::exception::RunError {
    ExcType::RuntimeError.raise("object is being modified")
}

impl Value {
    pub(crate) fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub(crate) fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    pub(crate) fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub(crate) fn set(set: Set) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    pub(crate) fn iterator(kind: &'static str, items: impl IntoIterator<Item = Self>) -> Self {
        Self::Iterator(Rc::new(PyIter::new(kind, items)))
    }

    /// Python's `type(x).__name__`.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType".to_owned(),
            Self::Ellipsis => "ellipsis".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Int(_) | Self::LongInt(_) => "int".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Str(_) => "str".to_owned(),
            Self::List(_) => "list".to_owned(),
            Self::Tuple(_) => "tuple".to_owned(),
            Self::Dict(_) => "dict".to_owned(),
            Self::Set(_) => "set".to_owned(),
            Self::Range(_) => "range".to_owned(),
            Self::Iterator(it) => it.kind.to_owned(),
            Self::Function(_) => "function".to_owned(),
            Self::Native(_) => "builtin_function_or_method".to_owned(),
            Self::Type(_) | Self::ExcType(_) | Self::Class(_) => "type".to_owned(),
            Self::BoundMethod(m) => match &**m {
                BoundMethod::User { .. } => "method".to_owned(),
                BoundMethod::Native { .. } => "builtin_function_or_method".to_owned(),
            },
            Self::Instance(inst) => inst.class.name.clone(),
            Self::Super(_) => "super".to_owned(),
            Self::Module(_) => "module".to_owned(),
            Self::Exception(exc) => exc.exc.type_name().to_owned(),
        }
    }

    /// Number of elements for sized builtin containers.
    pub(crate) fn builtin_len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::List(items) => items.try_borrow().ok().map(|items| items.len()),
            Self::Tuple(items) => Some(items.len()),
            Self::Dict(dict) => dict.try_borrow().ok().map(|dict| dict.len()),
            Self::Set(set) => set.try_borrow().ok().map(|set| set.len()),
            Self::Range(range) => Some(range.len()),
            _ => None,
        }
    }

    /// Truthiness for everything except instances defining `__len__`,
    /// which the interpreter handles itself.
    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::LongInt(i) => !i.is_zero(),
            Self::Float(f) => *f != 0.0,
            _ => self.builtin_len().is_none_or(|len| len > 0),
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Bool(b) => Some(BigInt::from(i64::from(*b))),
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::LongInt(i) => Some((**i).clone()),
            _ => None,
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(i) => Some(*i as f64),
            Self::LongInt(i) => i.to_f64(),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub(crate) fn is_int_like(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::LongInt(_))
    }

    pub(crate) fn is_number(&self) -> bool {
        self.is_int_like() || matches!(self, Self::Float(_))
    }

    /// Wraps a `BigInt`, demoting it to `Int` when it fits.
    pub(crate) fn from_bigint(i: BigInt) -> Self {
        match i.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::LongInt(Rc::new(i)),
        }
    }

    pub(crate) fn hash_key(&self) -> RunResult<HashKey> {
        Ok(match self {
            Self::None => HashKey::None,
            Self::Ellipsis => HashKey::Ellipsis,
            Self::Bool(b) => HashKey::Int(i64::from(*b)),
            Self::Int(i) => HashKey::Int(*i),
            Self::LongInt(i) => HashKey::BigInt((**i).clone()),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Self::Str(s) => HashKey::Str(Rc::clone(s)),
            Self::Tuple(items) => HashKey::Tuple(items.iter().map(Self::hash_key).collect::<RunResult<_>>()?),
            Self::Range(r) => HashKey::Tuple(vec![HashKey::Int(r.start), HashKey::Int(r.stop), HashKey::Int(r.step)]),
            Self::List(_) | Self::Dict(_) | Self::Set(_) => {
                return ExcType::TypeError.err(format!("unhashable type: '{}'", self.type_name()));
            }
            Self::Native(f) => HashKey::Named(f.name()),
            Self::Type(t) => HashKey::Named(t.into()),
            Self::ExcType(t) => HashKey::Named(t.into()),
            Self::Iterator(rc) => HashKey::Identity(address(rc)),
            Self::Function(rc) => HashKey::Identity(address(rc)),
            Self::BoundMethod(rc) => HashKey::Identity(address(rc)),
            Self::Class(rc) => HashKey::Identity(address(rc)),
            Self::Instance(rc) => HashKey::Identity(address(rc)),
            Self::Super(rc) => HashKey::Identity(address(rc)),
            Self::Module(rc) => HashKey::Identity(address(rc)),
            Self::Exception(rc) => HashKey::Identity(address(rc)),
        })
    }

    /// `hash()` of the value, derived from its [`HashKey`].
    pub(crate) fn py_hash(&self) -> RunResult<i64> {
        let key = self.hash_key()?;
        if let HashKey::Int(i) = key {
            return Ok(i);
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        Ok(hasher.finish().cast_signed())
    }

    /// Python `is`.
    pub(crate) fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural `==` for builtin values; user instances compare by identity here.
    pub(crate) fn py_eq(&self, other: &Self) -> RunResult<bool> {
        Ok(match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Float(a), b) if b.is_number() => b.as_f64().is_some_and(|b| *a == b),
            (a, Self::Float(b)) if a.is_number() => a.as_f64().is_some_and(|a| a == *b),
            (a, b) if a.is_int_like() && b.is_int_like() => a.as_bigint() == b.as_bigint(),
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let a = a.try_borrow().map_err(|_| borrow_error())?.clone();
                let b = b.try_borrow().map_err(|_| borrow_error())?.clone();
                sequences_equal(&a, &b)?
            }
            (Self::Tuple(a), Self::Tuple(b)) => sequences_equal(a, b)?,
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let a = a.try_borrow().map_err(|_| borrow_error())?;
                let b = b.try_borrow().map_err(|_| borrow_error())?;
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, value) in a.items() {
                    match b.get(&key)? {
                        Some(other) if value.py_eq(&other)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Self::Set(a), Self::Set(b)) => {
                let a = a.try_borrow().map_err(|_| borrow_error())?;
                let b = b.try_borrow().map_err(|_| borrow_error())?;
                if a.len() != b.len() {
                    return Ok(false);
                }
                for value in a.values() {
                    if !b.contains(&value)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Self::Range(a), Self::Range(b)) => a.iter().eq(b.iter()),
            _ => self.is_same(other),
        })
    }

    /// Ordering for builtin values, `None` when the types are not orderable.
    pub(crate) fn py_cmp(&self, other: &Self) -> RunResult<Option<Ordering>> {
        Ok(match (self, other) {
            (a, b) if a.is_int_like() && b.is_int_like() => a.as_bigint().partial_cmp(&b.as_bigint()),
            (a, b) if a.is_number() && b.is_number() => a.as_f64().partial_cmp(&b.as_f64()),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => {
                let a = a.try_borrow().map_err(|_| borrow_error())?.clone();
                let b = b.try_borrow().map_err(|_| borrow_error())?.clone();
                sequences_cmp(&a, &b)?
            }
            (Self::Tuple(a), Self::Tuple(b)) => sequences_cmp(a, b)?,
            (Self::Set(a), Self::Set(b)) => {
                let a = a.try_borrow().map_err(|_| borrow_error())?;
                let b = b.try_borrow().map_err(|_| borrow_error())?;
                let a_in_b = a.values().iter().map(|v| b.contains(v)).collect::<RunResult<Vec<_>>>()?;
                let subset = a_in_b.iter().all(|x| *x);
                match (subset, a.len().cmp(&b.len())) {
                    (true, Ordering::Equal) => Some(Ordering::Equal),
                    (true, Ordering::Less) => Some(Ordering::Less),
                    _ => {
                        let b_in_a = b.values().iter().map(|v| a.contains(v)).collect::<RunResult<Vec<_>>>()?;
                        if b_in_a.iter().all(|x| *x) && b.len() < a.len() {
                            Some(Ordering::Greater)
                        } else {
                            None
                        }
                    }
                }
            }
            _ => None,
        })
    }

    /// `repr()` without running user code.
    ///
    /// Fails only for runaway nesting or a container that is mid-mutation.
    pub(crate) fn try_repr(&self) -> RunResult<String> {
        self.render(&mut DefaultRepr, false)
    }

    /// `repr()` without running user code, for display purposes.
    #[must_use]
    pub fn repr(&self) -> String {
        self.try_repr().unwrap_or_else(|_| format!("<{} object>", self.type_name()))
    }

    /// `str()` without running user code.
    #[must_use]
    pub fn py_str(&self) -> String {
        self.render(&mut DefaultRepr, true)
            .unwrap_or_else(|_| format!("<{} object>", self.type_name()))
    }

    /// Renders `str()` (`use_str`) or `repr()` using `hook` for user instances.
    pub(crate) fn render(&self, hook: &mut impl ReprHook, use_str: bool) -> RunResult<String> {
        let mut out = String::new();
        self.write_repr(&mut out, hook, &mut ReprGuard::default(), use_str)?;
        Ok(out)
    }

    fn write_repr(
        &self,
        out: &mut String,
        hook: &mut impl ReprHook,
        guard: &mut ReprGuard,
        use_str: bool,
    ) -> RunResult<()> {
        match self {
            Self::None => out.push_str("None"),
            Self::Ellipsis => out.push_str("Ellipsis"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::LongInt(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::Str(s) => {
                if use_str {
                    out.push_str(s);
                } else {
                    string_repr(out, s);
                }
            }
            Self::List(items) => {
                if !guard.enter(address(items))? {
                    out.push_str("[...]");
                    return Ok(());
                }
                let items = items.try_borrow().map_err(|_| borrow_error())?.clone();
                out.push('[');
                write_items(out, &items, hook, guard)?;
                out.push(']');
                guard.leave();
            }
            Self::Tuple(items) => {
                if !guard.enter(address(items))? {
                    out.push_str("(...)");
                    return Ok(());
                }
                out.push('(');
                write_items(out, items, hook, guard)?;
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                guard.leave();
            }
            Self::Dict(dict) => {
                if !guard.enter(address(dict))? {
                    out.push_str("{...}");
                    return Ok(());
                }
                let items = dict.try_borrow().map_err(|_| borrow_error())?.items();
                out.push('{');
                for (i, (key, value)) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, hook, guard, false)?;
                    out.push_str(": ");
                    value.write_repr(out, hook, guard, false)?;
                }
                out.push('}');
                guard.leave();
            }
            Self::Set(set) => {
                let values = set.try_borrow().map_err(|_| borrow_error())?.values();
                if values.is_empty() {
                    out.push_str("set()");
                } else if !guard.enter(address(set))? {
                    out.push_str("{...}");
                } else {
                    out.push('{');
                    write_items(out, &values, hook, guard)?;
                    out.push('}');
                    guard.leave();
                }
            }
            Self::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Self::Iterator(it) => {
                let _ = write!(out, "<{} object at {:#x}>", it.kind, address(it));
            }
            Self::Function(func) => {
                let _ = write!(out, "<function {} at {:#x}>", func.qualname, address(func));
            }
            Self::Native(f) => {
                let _ = write!(out, "<built-in function {}>", f.name());
            }
            Self::Type(t) => {
                let name: &'static str = t.into();
                let _ = write!(out, "<class '{name}'>");
            }
            Self::ExcType(t) => {
                let _ = write!(out, "<class '{t}'>");
            }
            Self::Class(class) => {
                let _ = write!(out, "<class '__main__.{}'>", class.name);
            }
            Self::BoundMethod(method) => match &**method {
                BoundMethod::User { receiver, function } => {
                    let _ = write!(out, "<bound method {} of ", function.qualname);
                    receiver.write_repr(out, hook, guard, false)?;
                    out.push('>');
                }
                BoundMethod::Native { receiver, name } => {
                    let _ = write!(out, "<built-in method {name} of {} object>", receiver.type_name());
                }
            },
            Self::Instance(inst) => match hook.instance_text(inst, use_str)? {
                Some(text) => out.push_str(&text),
                None => {
                    let _ = write!(out, "<__main__.{} object at {:#x}>", inst.class.name, address(inst));
                }
            },
            Self::Super(proxy) => {
                let _ = write!(out, "<super: <class '{}'>, <{} object>>", proxy.class.name, proxy.receiver.type_name());
            }
            Self::Module(module) => {
                let _ = write!(out, "<module '{}'>", module.name);
            }
            Self::Exception(exc) => {
                if use_str {
                    out.push_str(exc.exc.message());
                } else {
                    let _ = write!(out, "{}(", exc.exc.type_name());
                    if exc.args.is_empty() && !exc.exc.message().is_empty() {
                        string_repr(out, exc.exc.message());
                    } else {
                        write_items(out, &exc.args, hook, guard)?;
                    }
                    out.push(')');
                }
            }
        }
        Ok(())
    }
}

fn write_items(out: &mut String, items: &[Value], hook: &mut impl ReprHook, guard: &mut ReprGuard) -> RunResult<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, hook, guard, false)?;
    }
    Ok(())
}

fn sequences_equal(a: &[Value], b: &[Value]) -> RunResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sequences_cmp(a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y)? {
            return x.py_cmp(y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Writes a Python string literal, preferring single quotes like CPython.
pub(crate) fn string_repr(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Returns a string representation of a float matching CPython's `repr()` behavior.
///
/// Uses the `ryu` crate which produces the shortest decimal representation
/// that round-trips through `f64` parsing.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f.is_sign_negative() { "-inf" } else { "inf" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    let s = buffer.format(f);
    fix_ryu_exponent(s)
}

/// ryu produces "1e20" where CPython writes "1e+20", and "3" where CPython writes "3.0".
fn fix_ryu_exponent(s: &str) -> String {
    if let Some(e_pos) = s.find('e') {
        let (mantissa, exp_part) = s.split_at(e_pos);
        let exp = &exp_part[1..];
        let mantissa = mantissa.strip_suffix(".0").unwrap_or(mantissa);
        if let Some(digits) = exp.strip_prefix('-') {
            return format!("{mantissa}e-{digits:0>2}");
        }
        return format!("{mantissa}e+{exp:0>2}");
    }
    if !s.contains('.') {
        return format!("{s}.0");
    }
    s.to_owned()
}

/// Python integer division, rounding toward negative infinity.
pub(crate) fn floor_div(a: &BigInt, b: &BigInt) -> BigInt {
    num_integer::Integer::div_floor(a, b)
}

/// Python modulo, result takes the sign of the divisor.
pub(crate) fn floor_mod(a: &BigInt, b: &BigInt) -> BigInt {
    num_integer::Integer::mod_floor(a, b)
}

/// Python float modulo, result takes the sign of the divisor.
pub(crate) fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
}

pub(crate) fn bigint_is_negative(i: &BigInt) -> bool {
    i.is_negative()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or_else(|_| Self::from_bigint(BigInt::from(n)), Self::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_cpython() {
        assert_eq!(float_repr(3.0), "3.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn string_repr_picks_quotes() {
        assert_eq!(Value::from("hello").repr(), "'hello'");
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::from("a\nb").repr(), "'a\\nb'");
    }

    #[test]
    fn container_reprs() {
        let list = Value::list(vec![Value::Int(1), Value::from("x"), Value::None]);
        assert_eq!(list.repr(), "[1, 'x', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(Set::new()).repr(), "set()");
        let mut dict = Dict::new();
        dict.insert(Value::from("a"), Value::Float(1.5)).unwrap();
        assert_eq!(Value::dict(dict).repr(), "{'a': 1.5}");
    }

    #[test]
    fn self_referencing_list_renders_ellipsis() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
    }

    #[test]
    fn equal_numbers_share_hash_keys() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).unwrap().unwrap().py_str(), "bool");
        assert!(Value::list(vec![]).hash_key().is_err());
    }

    #[test]
    fn range_len_and_items() {
        let r = RangeValue { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![10, 7, 4, 1]);
    }
}
