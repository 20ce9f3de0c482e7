//! Importable modules.
//!
//! `math`, `random` and `sys` are native: their functions are
//! [`NativeFunction`](crate::builtins::NativeFunction) values. `heapq` is
//! Python source executed on first import under a frozen pseudo-filename, so
//! its frames are visible to the tracer but are not part of the user program.
//! Modules are created once per run and cached.

pub(crate) mod heapq;
pub(crate) mod math;
pub(crate) mod random_mod;
pub(crate) mod sys;

use std::rc::Rc;

use strum::EnumString;

use crate::{
    exception::{ExcType, RunResult},
    function::{Module, new_namespace},
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

/// Modules that `import` can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BuiltinModule {
    Math,
    Random,
    Sys,
    Heapq,
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    /// Returns the module called `name`, creating it on first import.
    pub(crate) fn import_module(&mut self, name: &str) -> RunResult<Rc<Module>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Rc::clone(module));
        }
        let Ok(builtin) = name.parse::<BuiltinModule>() else {
            return ExcType::ModuleNotFoundError.err(format!("No module named '{name}'"));
        };
        tracing::debug!(module = name, "importing module");
        let module = match builtin {
            BuiltinModule::Math => math::create_module(),
            BuiltinModule::Random => random_mod::create_module(),
            BuiltinModule::Sys => sys::create_module(self.recursion_limit),
            BuiltinModule::Heapq => self.load_source_module("heapq", heapq::FILENAME, heapq::SOURCE)?,
        };
        self.modules.insert(name.to_owned(), Rc::clone(&module));
        Ok(module)
    }
}

/// Builds a native module from `(name, value)` pairs.
pub(crate) fn native_module(name: &str, attrs: impl IntoIterator<Item = (&'static str, Value)>) -> Rc<Module> {
    let namespace = new_namespace();
    {
        let mut namespace = namespace.borrow_mut();
        namespace.insert("__name__".to_owned(), Value::from(name));
        for (attr, value) in attrs {
            namespace.insert(attr.to_owned(), value);
        }
    }
    Rc::new(Module {
        name: name.to_owned(),
        namespace,
    })
}

/// Coerces a numeric argument to `f64` the way `math` functions do.
pub(crate) fn float_arg(function: &str, value: &Value) -> RunResult<f64> {
    match value {
        Value::LongInt(_) => value
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| ExcType::OverflowError.raise("int too large to convert to float")),
        _ => value.as_f64().ok_or_else(|| {
            ExcType::TypeError.raise(format!(
                "{function}() argument must be a real number, not '{}'",
                value.type_name()
            ))
        }),
    }
}

/// Coerces an integer argument, rejecting floats.
pub(crate) fn int_arg(value: &Value) -> RunResult<i64> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(value.as_i64().unwrap_or_default()),
        Value::LongInt(_) => ExcType::OverflowError.err("Python int too large to convert to C long"),
        other => ExcType::TypeError.err(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        )),
    }
}
