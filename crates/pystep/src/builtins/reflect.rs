//! `isinstance`, `getattr`/`hasattr`, `callable` and `id`.

use std::rc::Rc;

use crate::{
    builtins::{PyType, check_arg_count, convert::type_of, issubclass},
    exception::{ExcType, RunError, RunResult},
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn isinstance(&mut self, value: &Value, class: &Value) -> RunResult<bool> {
        if let Value::Tuple(options) = class {
            for option in options.iter() {
                if self.isinstance(value, option)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if !matches!(class, Value::Type(_) | Value::ExcType(_) | Value::Class(_)) {
            return ExcType::TypeError.err("isinstance() arg 2 must be a type, a tuple of types, or a union");
        }
        if matches!(class, Value::Type(PyType::Object)) {
            return Ok(true);
        }
        issubclass(&type_of(value), class)
    }

    /// `getattr(obj, name)` that turns `AttributeError` into `None`.
    pub(crate) fn lookup_attr(&mut self, object: &Value, attr: &str) -> RunResult<Option<Value>> {
        match self.get_attr(object, attr) {
            Ok(value) => Ok(Some(value)),
            Err(RunError::Exc { object, .. }) if object.exc.exc_type() == ExcType::AttributeError => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub(super) fn builtin_getattr(&mut self, args: Vec<Value>) -> RunResult<Value> {
        check_arg_count("getattr", &args, 2, 3)?;
        let mut args = args.into_iter();
        let object = args.next().unwrap_or(Value::None);
        let attr = match args.next() {
            Some(Value::Str(attr)) => attr,
            Some(other) => {
                return ExcType::TypeError.err(format!(
                    "attribute name must be string, not '{}'",
                    other.type_name()
                ));
            }
            None => return ExcType::TypeError.err("getattr expected at least 2 arguments, got 1"),
        };
        match args.next() {
            Some(default) => Ok(self.lookup_attr(&object, &attr)?.unwrap_or(default)),
            None => self.get_attr(&object, &attr),
        }
    }
}

pub(super) fn is_callable(value: &Value) -> bool {
    match value {
        Value::Function(_)
        | Value::Native(_)
        | Value::BoundMethod(_)
        | Value::Type(_)
        | Value::ExcType(_)
        | Value::Class(_) => true,
        Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
        _ => false,
    }
}

/// `id(value)`: the address of reference-counted objects, the hash for immediates.
pub(super) fn object_id(value: &Value) -> i64 {
    fn address<T: ?Sized>(rc: &Rc<T>) -> i64 {
        Rc::as_ptr(rc).cast::<()>() as usize as i64
    }
    match value {
        Value::Str(rc) => address(rc),
        Value::List(rc) => address(rc),
        Value::Tuple(rc) => address(rc),
        Value::Dict(rc) => address(rc),
        Value::Set(rc) => address(rc),
        Value::Iterator(rc) => address(rc),
        Value::Function(rc) => address(rc),
        Value::BoundMethod(rc) => address(rc),
        Value::Class(rc) => address(rc),
        Value::Instance(rc) => address(rc),
        Value::Super(rc) => address(rc),
        Value::Module(rc) => address(rc),
        Value::Exception(rc) => address(rc),
        other => other.py_hash().unwrap_or_default(),
    }
}
