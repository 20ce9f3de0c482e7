//! Calls, argument binding, classes and attribute access.

use std::{rc::Rc, sync::Arc};

use crate::{
    exception::{ExcObject, ExcType, Exception, RunResult},
    function::{BoundMethod, Class, Function, Instance, SuperProxy, new_namespace},
    io::PrintWriter,
    methods,
    run::{Flow, Frame, FrameKind, Interp},
    tracer::Tracer,
    value::Value,
};

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    /// Calls any callable value.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::BoundMethod(method) => match &**method {
                BoundMethod::User { receiver, function } => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(receiver.clone());
                    full.extend(args);
                    self.call_function(function, full, kwargs)
                }
                BoundMethod::Native { receiver, name } => self.call_method(receiver, name, args, kwargs),
            },
            Value::Native(native) => self.call_native(*native, args, kwargs),
            Value::Type(ty) => self.construct(*ty, args, kwargs),
            Value::ExcType(exc_type) => {
                no_kwargs(&exc_type.to_string(), &kwargs)?;
                let message = self.exception_message(*exc_type, &args)?;
                Ok(Value::Exception(Rc::new(ExcObject::with_args(
                    Exception::new(*exc_type, message),
                    args,
                ))))
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            other => ExcType::TypeError.err(format!("'{}' object is not callable", other.type_name())),
        }
    }

    /// `str(exc)` for a builtin exception created with `args`.
    pub(crate) fn exception_message(&mut self, exc_type: ExcType, args: &[Value]) -> RunResult<Option<String>> {
        Ok(match args {
            [] => None,
            [single] if exc_type == ExcType::KeyError => Some(self.py_repr(single)?),
            [single] => Some(self.py_str(single)?),
            many => Some(self.py_repr(&Value::tuple(many.to_vec()))?),
        })
    }

    pub(crate) fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        let locals = new_namespace();
        Self::bind_args(function, args, kwargs, &mut locals.borrow_mut())?;
        let owner = function.owner.borrow().as_ref().and_then(std::rc::Weak::upgrade);
        let frame = Frame {
            name: function.name().to_owned(),
            filename: Rc::clone(&function.filename),
            line: function.def.line,
            last_traced: None,
            kind: FrameKind::Function,
            locals,
            globals: Rc::clone(&function.globals),
            closure: Rc::clone(&function.closure),
            def: Some(Arc::clone(&function.def)),
            owner,
            comp_scopes: Vec::new(),
        };
        self.push_frame(frame)?;
        let result = self.exec_block(&function.def.body).map(|flow| match flow {
            Flow::Return(value) => value,
            Flow::Normal | Flow::Break | Flow::Continue => Value::None,
        });
        if let Ok(value) = &result {
            self.fire_return(value);
        }
        self.pop_frame(result)
    }

    /// Binds call arguments to parameters, raising CPython's `TypeError`s.
    fn bind_args(
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        locals: &mut indexmap::IndexMap<String, Value>,
    ) -> RunResult<()> {
        let def = &function.def;
        let name = &function.qualname;
        let positional = def.params.len();

        let mut extra = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < positional {
                locals.insert(def.params[i].name.clone(), arg);
            } else {
                extra.push(arg);
            }
        }
        let given = locals.len() + extra.len();
        match &def.var_args {
            Some(var_args) => {
                locals.insert(var_args.clone(), Value::tuple(extra));
            }
            None if !extra.is_empty() => {
                let required = function.defaults.iter().filter(|d| d.is_none()).count();
                let takes = if required == positional {
                    format!("{positional} positional argument{}", plural(positional))
                } else {
                    format!("from {required} to {positional} positional arguments")
                };
                let was = if given == 1 { "was" } else { "were" };
                return ExcType::TypeError.err(format!("{name}() takes {takes} but {given} {was} given"));
            }
            None => {}
        }

        let mut var_kwargs = crate::value::Dict::new();
        for (key, value) in kwargs {
            let is_param = def.params.iter().any(|p| p.name == key) || def.kwonly.iter().any(|p| p.name == key);
            if is_param {
                if locals.contains_key(&key) {
                    return ExcType::TypeError.err(format!("{name}() got multiple values for argument '{key}'"));
                }
                locals.insert(key, value);
            } else if def.var_kwargs.is_some() {
                var_kwargs.insert(Value::from(key), value)?;
            } else {
                return ExcType::TypeError.err(format!("{name}() got an unexpected keyword argument '{key}'"));
            }
        }

        let mut missing = Vec::new();
        for (param, default) in def.params.iter().zip(&function.defaults) {
            if !locals.contains_key(&param.name) {
                match default {
                    Some(value) => {
                        locals.insert(param.name.clone(), value.clone());
                    }
                    None => missing.push(param.name.as_str()),
                }
            }
        }
        if !missing.is_empty() {
            return ExcType::TypeError.err(format!(
                "{name}() missing {} required positional argument{}: {}",
                missing.len(),
                plural(missing.len()),
                join_names(&missing)
            ));
        }
        for (param, default) in def.kwonly.iter().zip(&function.kw_defaults) {
            if !locals.contains_key(&param.name) {
                match default {
                    Some(value) => {
                        locals.insert(param.name.clone(), value.clone());
                    }
                    None => missing.push(param.name.as_str()),
                }
            }
        }
        if !missing.is_empty() {
            return ExcType::TypeError.err(format!(
                "{name}() missing {} required keyword-only argument{}: {}",
                missing.len(),
                plural(missing.len()),
                join_names(&missing)
            ));
        }
        if let Some(var_kwargs_name) = &def.var_kwargs {
            locals.insert(var_kwargs_name.clone(), Value::dict(var_kwargs));
        }
        Ok(())
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        let instance = Self::new_instance(class);
        if class.exc_base.is_some() {
            instance
                .attrs
                .borrow_mut()
                .insert("args".to_owned(), Value::tuple(args.clone()));
        }
        let value = Value::Instance(Rc::clone(&instance));
        match class.lookup("__init__") {
            Some(Value::Function(init)) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(value.clone());
                full.extend(args);
                let result = self.call_function(&init, full, kwargs)?;
                if !matches!(result, Value::None) {
                    return ExcType::TypeError.err(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    ));
                }
            }
            _ if class.exc_base.is_some() => no_kwargs(&class.name, &kwargs)?,
            _ => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return ExcType::TypeError.err(format!("{}() takes no arguments", class.name));
                }
            }
        }
        Ok(value)
    }

    /// Calls `name` on an instance if its class defines it.
    pub(crate) fn call_dunder(&mut self, instance: &Rc<Instance>, name: &str, args: Vec<Value>) -> RunResult<Option<Value>> {
        match instance.class.lookup(name) {
            Some(Value::Function(function)) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Instance(Rc::clone(instance)));
                full.extend(args);
                self.call_function(&function, full, Vec::new()).map(Some)
            }
            Some(other) => self.call_value(&other, args, Vec::new()).map(Some),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub(crate) fn get_attr(&mut self, object: &Value, attr: &str) -> RunResult<Value> {
        match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(attr) {
                    return Ok(value.clone());
                }
                if attr == "__class__" {
                    return Ok(Value::Class(Rc::clone(&instance.class)));
                }
                match instance.class.lookup(attr) {
                    Some(Value::Function(function)) => Ok(Value::BoundMethod(Rc::new(BoundMethod::User {
                        receiver: object.clone(),
                        function,
                    }))),
                    Some(value) => Ok(value),
                    None => ExcType::AttributeError.err(format!(
                        "'{}' object has no attribute '{attr}'",
                        instance.class.name
                    )),
                }
            }
            Value::Class(class) => match attr {
                "__name__" => Ok(Value::from(class.name.as_str())),
                _ => class.lookup(attr).ok_or_else(|| {
                    ExcType::AttributeError.raise(format!("type object '{}' has no attribute '{attr}'", class.name))
                }),
            },
            Value::Module(module) => module.namespace.borrow().get(attr).cloned().ok_or_else(|| {
                ExcType::AttributeError.raise(format!("module '{}' has no attribute '{attr}'", module.name))
            }),
            Value::Super(proxy) => self.super_attr(proxy, attr),
            Value::Exception(exc) if attr == "args" => {
                if exc.args.is_empty() && !exc.exc.message().is_empty() {
                    Ok(Value::tuple(vec![Value::from(exc.exc.message())]))
                } else {
                    Ok(Value::tuple(exc.args.clone()))
                }
            }
            Value::Type(ty) if attr == "__name__" => {
                let name: &'static str = ty.into();
                Ok(Value::from(name))
            }
            Value::ExcType(exc_type) if attr == "__name__" => Ok(Value::from(exc_type.to_string())),
            Value::Function(function) if attr == "__name__" => Ok(Value::from(function.name())),
            _ if methods::has_method(object, attr) => Ok(Value::BoundMethod(Rc::new(BoundMethod::Native {
                receiver: object.clone(),
                name: attr.to_owned(),
            }))),
            Value::Type(ty) => {
                let name: &'static str = ty.into();
                ExcType::AttributeError.err(format!("type object '{name}' has no attribute '{attr}'"))
            }
            Value::ExcType(exc_type) => {
                ExcType::AttributeError.err(format!("type object '{exc_type}' has no attribute '{attr}'"))
            }
            _ => ExcType::AttributeError.err(format!(
                "'{}' object has no attribute '{attr}'",
                object.type_name()
            )),
        }
    }

    fn super_attr(&mut self, proxy: &SuperProxy, attr: &str) -> RunResult<Value> {
        let receiver_class = match &proxy.receiver {
            Value::Instance(instance) => Rc::clone(&instance.class),
            Value::Class(class) => Rc::clone(class),
            other => {
                return ExcType::TypeError.err(format!(
                    "super(type, obj): obj must be an instance or subtype of type, not {}",
                    other.type_name()
                ));
            }
        };
        match receiver_class.lookup_after(&proxy.class, attr) {
            Some(Value::Function(function)) => Ok(Value::BoundMethod(Rc::new(BoundMethod::User {
                receiver: proxy.receiver.clone(),
                function,
            }))),
            Some(value) => Ok(value),
            None if attr == "__init__" => Ok(Value::BoundMethod(Rc::new(BoundMethod::Native {
                receiver: proxy.receiver.clone(),
                name: "__init__".to_owned(),
            }))),
            None => ExcType::AttributeError.err(format!("'super' object has no attribute '{attr}'")),
        }
    }

    pub(crate) fn set_attr(&mut self, object: &Value, attr: &str, value: Value) -> RunResult<()> {
        match object {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(attr.to_owned(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(attr.to_owned(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.namespace.borrow_mut().insert(attr.to_owned(), value);
                Ok(())
            }
            other => ExcType::AttributeError.err(format!(
                "'{}' object has no attribute '{attr}' and no __dict__ for setting new attributes",
                other.type_name()
            )),
        }
    }

    pub(crate) fn delete_attr(&mut self, object: &Value, attr: &str) -> RunResult<()> {
        let removed = match object {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(attr).is_some(),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(attr).is_some(),
            Value::Module(module) => module.namespace.borrow_mut().shift_remove(attr).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            ExcType::AttributeError.err(format!("'{}' object has no attribute '{attr}'", object.type_name()))
        }
    }

    /// `super()` with or without explicit arguments.
    pub(crate) fn make_super(&mut self, args: &[Value]) -> RunResult<Value> {
        let (class, receiver) = match args {
            [] => self.super_context()?,
            [Value::Class(class), receiver] => (Rc::clone(class), receiver.clone()),
            _ => return ExcType::TypeError.err("super() argument 1 must be a type"),
        };
        Ok(Value::Super(Rc::new(SuperProxy { class, receiver })))
    }
}

pub(crate) fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn join_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

pub(crate) fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> RunResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        ExcType::TypeError.err(format!("{name}() takes no keyword arguments"))
    }
}
