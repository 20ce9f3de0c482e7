use std::{cell::RefCell, rc::Rc, sync::Arc};

use indexmap::IndexMap;

use crate::{exception::ExcType, expressions::FunctionDef, value::Value};

/// A name → value mapping for one scope (module globals, function locals,
/// class body, instance attributes).
pub(crate) type Namespace = Rc<RefCell<IndexMap<String, Value>>>;

pub(crate) fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(IndexMap::new()))
}

/// A user-defined function or lambda bound to the scope it was created in.
#[derive(Debug)]
pub struct Function {
    pub(crate) def: Arc<FunctionDef>,
    /// Evaluated defaults, aligned with `def.params`.
    pub(crate) defaults: Vec<Option<Value>>,
    /// Evaluated defaults, aligned with `def.kwonly`.
    pub(crate) kw_defaults: Vec<Option<Value>>,
    pub(crate) globals: Namespace,
    /// Enclosing function scopes, innermost first.
    pub(crate) closure: Rc<[Namespace]>,
    pub(crate) filename: Rc<str>,
    /// `Class.method` for methods, otherwise the plain name.
    pub(crate) qualname: String,
    /// Class whose body defined this function, used by zero-argument `super()`.
    pub(crate) owner: RefCell<Option<std::rc::Weak<Class>>>,
}

impl Function {
    pub(crate) fn name(&self) -> &str {
        &self.def.name
    }
}

/// A user-defined class.
#[derive(Debug)]
pub struct Class {
    pub(crate) name: String,
    pub(crate) bases: Vec<Rc<Class>>,
    /// Builtin exception type this class derives from, if any.
    pub(crate) exc_base: Option<ExcType>,
    pub(crate) attrs: Namespace,
}

impl Class {
    /// Method resolution order: depth-first, left to right, each class once.
    pub(crate) fn mro(self: &Rc<Self>) -> Vec<Rc<Self>> {
        let mut order: Vec<Rc<Self>> = Vec::new();
        let mut stack = vec![Rc::clone(self)];
        while let Some(class) = stack.pop() {
            if order.iter().any(|c| Rc::ptr_eq(c, &class)) {
                continue;
            }
            stack.extend(class.bases.iter().rev().cloned());
            order.push(class);
        }
        order
    }

    /// Looks `name` up along the MRO.
    pub(crate) fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro().iter().find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    /// Looks `name` up in the MRO after `after`, as `super()` does.
    pub(crate) fn lookup_after(self: &Rc<Self>, after: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .skip_while(|class| !Rc::ptr_eq(class, after))
            .skip(1)
            .find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    pub(crate) fn is_subclass_of(self: &Rc<Self>, other: &Rc<Self>) -> bool {
        self.mro().iter().any(|class| Rc::ptr_eq(class, other))
    }
}

#[derive(Debug)]
pub struct Instance {
    pub(crate) class: Rc<Class>,
    pub(crate) attrs: Namespace,
}

/// An imported module. Native modules and modules written in Python both keep
/// their attributes in a namespace.
#[derive(Debug)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) namespace: Namespace,
}

/// An attribute looked up on a receiver and not yet called.
#[derive(Debug)]
pub enum BoundMethod {
    /// `instance.method` for a function defined on the class.
    User { receiver: Value, function: Rc<Function> },
    /// `[].append`, `"".join` and other methods of builtin types.
    Native { receiver: Value, name: String },
}

/// Result of `super()` inside a method.
#[derive(Debug)]
pub struct SuperProxy {
    pub(crate) class: Rc<Class>,
    pub(crate) receiver: Value,
}
