//! Program entry point and statement execution.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc, sync::Arc};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    exception::{CompileError, ExcObject, ExcType, Exception, RunError, RunResult},
    expressions::{ClassDef, Expr, FunctionDef, Node, Stmt, Target, Try},
    function::{Class, Function, Instance, Module, Namespace, new_namespace},
    io::{InputLines, PrintWriter},
    parse::parse,
    tracer::{FrameRef, TraceAction, Tracer},
    value::Value,
};

/// Default recursion limit, matching CPython.
pub(crate) const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Hard ceiling on interpreter frames, whatever the program asks for.
/// Each Python call takes several native frames, and the 256 MiB worker
/// stack must not overflow before this depth is reached.
pub(crate) const MAX_RECURSION_DEPTH: usize = 2000;

/// A parsed program, ready to run any number of times.
///
/// The compiled tree holds no reference-counted runtime values, so a program
/// can be compiled on one thread and run on another.
#[derive(Debug, Clone)]
pub struct Program {
    body: Arc<[Stmt]>,
    filename: String,
}

impl Program {
    /// Parses `source`. Line numbers in errors and trace events are 1-based
    /// lines of `source`; `filename` is what frames report as their file.
    pub fn compile(source: &str, filename: impl Into<String>) -> Result<Self, CompileError> {
        let body = parse(source)?;
        Ok(Self {
            body: body.into(),
            filename: filename.into(),
        })
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Runs the program to completion.
    ///
    /// Deep recursion needs a large native stack, so long-running callers
    /// should run this on a thread spawned with an enlarged stack size.
    pub fn run<T: Tracer, P: PrintWriter>(
        &self,
        tracer: &mut T,
        print: &mut P,
        input: InputLines,
    ) -> Result<(), RunFailure> {
        let filename: Rc<str> = Rc::from(self.filename.as_str());
        let mut interp = Interp::new(tracer, print, input, Rc::clone(&filename));
        let globals = new_namespace();
        globals.borrow_mut().insert("__name__".to_owned(), Value::from("__main__"));
        interp.frames.push(Frame::module(filename, globals));

        let result = interp.exec_block(&self.body).map(|_| interp.fire_return(&Value::None));
        match result {
            Ok(()) => Ok(()),
            Err(RunError::Abort) => {
                tracing::debug!(filename = %self.filename, "program aborted by tracer");
                Err(RunFailure::Aborted)
            }
            Err(RunError::Exc { object, .. }) => {
                let exc = object.exc.clone();
                if exc.exc_type() == ExcType::SystemExit && matches!(exc.message(), "" | "0" | "None") {
                    Ok(())
                } else {
                    Err(RunFailure::Exception(exc))
                }
            }
        }
    }
}

/// Why a program stopped before reaching its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// An exception nothing caught.
    Exception(Exception),
    /// The tracer returned [`TraceAction::Abort`].
    Aborted,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exc) => write!(f, "{exc}"),
            Self::Aborted => f.write_str("execution aborted"),
        }
    }
}

impl std::error::Error for RunFailure {}

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Module,
    Function,
    Class,
}

/// One activation on the interpreter's call stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// `<module>`, the function name or the class name.
    pub name: String,
    pub filename: Rc<str>,
    pub line: u32,
    /// Line of the last line event, so a new event fires only on a change.
    pub last_traced: Option<u32>,
    pub kind: FrameKind,
    pub locals: Namespace,
    pub globals: Namespace,
    /// Enclosing function scopes, innermost first.
    pub closure: Rc<[Namespace]>,
    pub def: Option<Arc<FunctionDef>>,
    /// Class that defined the running method, for zero-argument `super()`.
    pub owner: Option<Rc<Class>>,
    /// Active comprehension scopes, innermost last.
    pub comp_scopes: Vec<Namespace>,
}

impl Frame {
    pub(crate) fn module(filename: Rc<str>, globals: Namespace) -> Self {
        Self {
            name: "<module>".to_owned(),
            filename,
            line: 0,
            last_traced: None,
            kind: FrameKind::Module,
            locals: Rc::clone(&globals),
            globals,
            closure: Rc::from([]),
            def: None,
            owner: None,
            comp_scopes: Vec::new(),
        }
    }
}

/// How a block finished.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

// ============================================================================
// Interpreter state
// ============================================================================

/// Tree-walking interpreter state for one program run.
pub(crate) struct Interp<'a, T: Tracer, P: PrintWriter> {
    pub(crate) tracer: &'a mut T,
    pub(crate) print: &'a mut P,
    pub(crate) input: InputLines,
    pub(crate) frames: Vec<Frame>,
    /// Number of `try` bodies with handlers currently executing.
    pub(crate) try_depth: usize,
    /// Exceptions being handled by active `except` blocks, for bare `raise`.
    pub(crate) handling: Vec<Rc<ExcObject>>,
    pub(crate) modules: HashMap<String, Rc<Module>>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) recursion_limit: usize,
    pub(crate) main_filename: Rc<str>,
}

impl<'a, T: Tracer, P: PrintWriter> Interp<'a, T, P> {
    pub(crate) fn new(tracer: &'a mut T, print: &'a mut P, input: InputLines, main_filename: Rc<str>) -> Self {
        Self {
            tracer,
            print,
            input,
            frames: Vec::new(),
            try_depth: 0,
            handling: Vec::new(),
            modules: HashMap::new(),
            rng: ChaCha8Rng::from_entropy(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            main_filename,
        }
    }

    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    // ========================================================================
    // Tracer plumbing
    // ========================================================================

    /// Updates the current line and fires a line event if the line changed
    /// (or unconditionally for a loop back-edge).
    pub(crate) fn trace_line(&mut self, line: u32, force: bool) -> RunResult<()> {
        let frame = self.frame_mut();
        frame.line = line;
        if !force && frame.last_traced == Some(line) {
            return Ok(());
        }
        frame.last_traced = Some(line);
        let index = self.frames.len() - 1;
        match self.tracer.on_line(&FrameRef::new(&self.frames, index)) {
            TraceAction::Continue => Ok(()),
            TraceAction::Abort => Err(RunError::Abort),
        }
    }

    /// Reports the current frame's completion to the tracer.
    pub(crate) fn fire_return(&mut self, value: &Value) {
        let index = self.frames.len() - 1;
        self.tracer.on_return(&FrameRef::new(&self.frames, index), value);
    }

    /// Tells the tracer about an exception that no active `try` can catch or
    /// clean up after. The frames it unwound are restored for the report, so
    /// the tracer sees the frame that raised it.
    fn report_uncaught(&mut self, err: RunError) -> RunError {
        match err {
            RunError::Exc {
                object,
                reported: false,
                traceback,
            } if self.try_depth == 0 => {
                if object.exc.exc_type() != ExcType::SystemExit {
                    let live = self.frames.len();
                    self.frames.extend(traceback.into_iter().rev());
                    let index = self.frames.len() - 1;
                    self.tracer.on_exception(&FrameRef::new(&self.frames, index), &object.exc);
                    self.frames.truncate(live);
                }
                RunError::Exc {
                    object,
                    reported: true,
                    traceback: Vec::new(),
                }
            }
            other => other,
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub(crate) fn exec_block(&mut self, body: &[Stmt]) -> RunResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(err) => return Err(self.report_uncaught(err)),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RunResult<Flow> {
        self.trace_line(stmt.line, false)?;
        match &stmt.node {
            Node::Expr(expr) => {
                self.eval(expr)?;
            }
            Node::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            Node::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value)?,
            Node::AnnAssign { target, value } => {
                if let Some(value) = value {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
            }
            Node::If { test, body, or_else } => {
                let test = self.eval(test)?;
                return if self.truthy(&test)? {
                    self.exec_block(body)
                } else {
                    self.exec_block(or_else)
                };
            }
            Node::While { test, body, or_else } => return self.exec_while(stmt.line, test, body, or_else),
            Node::For {
                target,
                iter,
                body,
                or_else,
            } => return self.exec_for(stmt.line, target, iter, body, or_else),
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
            Node::Pass | Node::Global | Node::Nonlocal => {}
            Node::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.store_name(&def.name, function);
            }
            Node::ClassDef(def) => self.exec_class_def(def)?,
            Node::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Node::Import { module, binding } => {
                let imported = self.import_module(module)?;
                self.store_name(binding, Value::Module(imported));
            }
            Node::ImportFrom { module, names } => {
                let imported = self.import_module(module)?;
                for (name, binding) in names {
                    let value = imported.namespace.borrow().get(name).cloned();
                    match value {
                        Some(value) => self.store_name(binding, value),
                        None => {
                            return ExcType::ImportError
                                .err(format!("cannot import name '{name}' from '{module}' (unknown location)"));
                        }
                    }
                }
            }
            Node::Try(try_stmt) => return self.exec_try(try_stmt),
            Node::Raise(expr) => return Err(self.exec_raise(expr.as_ref())?),
            Node::Assert { test, msg } => {
                let test = self.eval(test)?;
                if !self.truthy(&test)? {
                    let message = match msg {
                        Some(msg) => {
                            let msg = self.eval(msg)?;
                            Some(self.py_str(&msg)?)
                        }
                        None => None,
                    };
                    return Err(Exception::new(ExcType::AssertionError, message).into());
                }
            }
            Node::Delete(targets) => {
                for target in targets {
                    self.delete_target(target)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_while(&mut self, line: u32, test: &Expr, body: &[Stmt], or_else: &[Stmt]) -> RunResult<Flow> {
        loop {
            let value = self.eval(test)?;
            if !self.truthy(&value)? {
                return self.exec_block(or_else);
            }
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.trace_line(line, true)?;
        }
    }

    fn exec_for(&mut self, line: u32, target: &Target, iter: &Expr, body: &[Stmt], or_else: &[Stmt]) -> RunResult<Flow> {
        let iterable = self.eval(iter)?;
        let mut items = self.for_iter(&iterable)?;
        loop {
            let Some(item) = self.next_item(&mut items)? else {
                return self.exec_block(or_else);
            };
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.trace_line(line, true)?;
        }
    }

    fn exec_aug_assign(&mut self, target: &Target, op: crate::expressions::Operator, value: &Expr) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(&current, op, &rhs)?;
                self.store_name(name, result);
            }
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(&current, op, &rhs)?;
                self.set_attr(&object, attr, result)?;
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(&current, op, &rhs)?;
                self.set_item(&object, index, result)?;
            }
            Target::Unpack(_) | Target::Starred(_) => {
                return ExcType::SyntaxError.err("illegal expression for augmented assignment");
            }
        }
        Ok(())
    }

    // ========================================================================
    // try / raise
    // ========================================================================

    fn exec_try(&mut self, stmt: &Try) -> RunResult<Flow> {
        let has_handlers = !stmt.handlers.is_empty();
        let has_finally = !stmt.finally.is_empty();
        // The finally block can still swallow anything raised in the body,
        // the handlers or the else block.
        if has_finally {
            self.try_depth += 1;
        }
        if has_handlers {
            self.try_depth += 1;
        }
        let body = self.exec_block(&stmt.body);
        if has_handlers {
            self.try_depth -= 1;
        }
        let outcome = match body {
            Ok(Flow::Normal) => self.exec_block(&stmt.or_else),
            Err(err @ RunError::Exc { .. }) if has_handlers => self.handle_exception(stmt, err),
            other => other,
        };
        if has_finally {
            self.try_depth -= 1;
        }

        if matches!(outcome, Err(RunError::Abort)) || !has_finally {
            return outcome;
        }
        let raised_at = self.frame().line;
        match self.exec_block(&stmt.finally)? {
            Flow::Normal => {
                if outcome.is_err() {
                    self.frame_mut().line = raised_at;
                }
                outcome
            }
            flow => Ok(flow),
        }
    }

    fn handle_exception(&mut self, stmt: &Try, err: RunError) -> RunResult<Flow> {
        let RunError::Exc { object, .. } = &err else {
            return Err(err);
        };
        let object = Rc::clone(object);
        for handler in &stmt.handlers {
            let matches = match &handler.exc_type {
                None => true,
                Some(expr) => {
                    let filter = self.eval(expr)?;
                    self.exception_matches(&object, &filter)?
                }
            };
            if !matches {
                continue;
            }
            self.trace_line(handler.line, false)?;
            if let Some(name) = &handler.name {
                let bound = match &object.instance {
                    Some(instance) => Value::Instance(Rc::clone(instance)),
                    None => Value::Exception(Rc::clone(&object)),
                };
                self.store_name(name, bound);
            }
            self.handling.push(Rc::clone(&object));
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                let _ = self.delete_name(name);
            }
            return result;
        }
        Err(err)
    }

    /// Whether `object` is caught by an `except` clause naming `filter`.
    fn exception_matches(&mut self, object: &ExcObject, filter: &Value) -> RunResult<bool> {
        match filter {
            Value::ExcType(exc_type) => Ok(object.exc.exc_type().is_subclass_of(*exc_type)),
            Value::Class(class) if class.exc_base.is_some() => Ok(object
                .instance
                .as_ref()
                .is_some_and(|instance| instance.class.is_subclass_of(class))),
            Value::Tuple(filters) => {
                for filter in filters.iter() {
                    if self.exception_matches(object, filter)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => ExcType::TypeError.err("catching classes that do not inherit from BaseException is not allowed"),
        }
    }

    /// Builds the error for a `raise` statement.
    fn exec_raise(&mut self, expr: Option<&Expr>) -> RunResult<RunError> {
        let Some(expr) = expr else {
            return match self.handling.last() {
                Some(object) => Ok(RunError::from_object(Rc::clone(object))),
                None => ExcType::RuntimeError.err("No active exception to reraise"),
            };
        };
        let value = self.eval(expr)?;
        Ok(RunError::from_object(self.to_exception(value)?))
    }

    /// Converts a raised value (an exception instance or class) into an exception object.
    pub(crate) fn to_exception(&mut self, value: Value) -> RunResult<Rc<ExcObject>> {
        match value {
            Value::Exception(object) => Ok(object),
            Value::ExcType(exc_type) => Ok(Rc::new(ExcObject::new(Exception::new(exc_type, None)))),
            Value::Class(class) if class.exc_base.is_some() => {
                let instance = self.call_value(&Value::Class(class), Vec::new(), Vec::new())?;
                self.to_exception(instance)
            }
            Value::Instance(instance) => match instance.class.exc_base {
                Some(base) => {
                    let message = self.py_str(&Value::Instance(Rc::clone(&instance)))?;
                    let args = match instance.attrs.borrow().get("args") {
                        Some(Value::Tuple(args)) => args.to_vec(),
                        _ => Vec::new(),
                    };
                    let message = (!message.is_empty()).then_some(message);
                    let exc = Exception::new(base, message).with_type_name(&instance.class.name);
                    Ok(Rc::new(ExcObject {
                        exc,
                        instance: Some(instance),
                        args,
                    }))
                }
                None => ExcType::TypeError.err("exceptions must derive from BaseException"),
            },
            _ => ExcType::TypeError.err("exceptions must derive from BaseException"),
        }
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    pub(crate) fn make_function(&mut self, def: &Arc<FunctionDef>) -> RunResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(param.default.as_ref().map(|expr| self.eval(expr)).transpose()?);
        }
        let mut kw_defaults = Vec::with_capacity(def.kwonly.len());
        for param in &def.kwonly {
            kw_defaults.push(param.default.as_ref().map(|expr| self.eval(expr)).transpose()?);
        }

        let frame = self.frame();
        let mut closure: Vec<Namespace> = frame.comp_scopes.iter().rev().cloned().collect();
        match frame.kind {
            FrameKind::Module => {}
            FrameKind::Function => {
                closure.push(Rc::clone(&frame.locals));
                closure.extend(frame.closure.iter().cloned());
            }
            FrameKind::Class => closure.extend(frame.closure.iter().cloned()),
        }
        let qualname = match frame.kind {
            FrameKind::Class => format!("{}.{}", frame.name, def.name),
            FrameKind::Function => format!("{}.<locals>.{}", frame.name, def.name),
            FrameKind::Module => def.name.clone(),
        };
        Ok(Value::Function(Rc::new(Function {
            def: Arc::clone(def),
            defaults,
            kw_defaults,
            globals: Rc::clone(&frame.globals),
            closure: closure.into(),
            filename: Rc::clone(&frame.filename),
            qualname,
            owner: RefCell::new(None),
        })))
    }

    fn exec_class_def(&mut self, def: &ClassDef) -> RunResult<()> {
        let mut bases = Vec::new();
        let mut exc_base = None;
        for base in &def.bases {
            match self.eval(base)? {
                Value::Class(class) => {
                    exc_base = exc_base.or(class.exc_base);
                    bases.push(class);
                }
                Value::ExcType(exc_type) => exc_base = exc_base.or(Some(exc_type)),
                Value::Type(crate::builtins::PyType::Object) => {}
                other => {
                    return ExcType::TypeError.err(format!(
                        "cannot inherit from '{}' in this interpreter",
                        other.type_name()
                    ));
                }
            }
        }

        let attrs = new_namespace();
        let outer = self.frame();
        let frame = Frame {
            name: def.name.clone(),
            filename: Rc::clone(&outer.filename),
            line: outer.line,
            last_traced: None,
            kind: FrameKind::Class,
            locals: Rc::clone(&attrs),
            globals: Rc::clone(&outer.globals),
            closure: Rc::clone(&outer.closure),
            def: None,
            owner: None,
            comp_scopes: Vec::new(),
        };
        self.push_frame(frame)?;
        let result = self.exec_block(&def.body);
        if result.is_ok() {
            self.fire_return(&Value::None);
        }
        self.pop_frame(result)?;

        let class = Rc::new(Class {
            name: def.name.clone(),
            bases,
            exc_base,
            attrs,
        });
        for value in class.attrs.borrow().values() {
            if let Value::Function(function) = value {
                *function.owner.borrow_mut() = Some(Rc::downgrade(&class));
            }
        }
        self.store_name(&def.name, Value::Class(class));
        Ok(())
    }

    /// Pushes a frame, enforcing the recursion limit. `sys.setrecursionlimit`
    /// can lower the limit but never raise it past `MAX_RECURSION_DEPTH`.
    pub(crate) fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        if self.frames.len() >= self.recursion_limit.min(MAX_RECURSION_DEPTH) {
            return ExcType::RecursionError.err("maximum recursion depth exceeded");
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the current frame. An unreported exception leaving the frame
    /// takes it along in its traceback.
    pub(crate) fn pop_frame<R>(&mut self, result: RunResult<R>) -> RunResult<R> {
        let frame = self.frames.pop();
        match result {
            Err(RunError::Exc {
                object,
                reported: false,
                mut traceback,
            }) => {
                traceback.extend(frame);
                Err(RunError::Exc {
                    object,
                    reported: false,
                    traceback,
                })
            }
            other => other,
        }
    }

    /// Runs a module written in Python under its own pseudo-filename.
    pub(crate) fn load_source_module(&mut self, name: &str, filename: &str, source: &str) -> RunResult<Rc<Module>> {
        let body = parse(source).map_err(|err| ExcType::ImportError.raise(format!("cannot load {name}: {err}")))?;
        let namespace = new_namespace();
        namespace.borrow_mut().insert("__name__".to_owned(), Value::from(name));
        self.push_frame(Frame::module(Rc::from(filename), Rc::clone(&namespace)))?;
        let result = self.exec_block(&body);
        if result.is_ok() {
            self.fire_return(&Value::None);
        }
        self.pop_frame(result)?;
        Ok(Rc::new(Module {
            name: name.to_owned(),
            namespace,
        }))
    }

    // ========================================================================
    // Names
    // ========================================================================

    pub(crate) fn load_name(&self, name: &str) -> RunResult<Value> {
        let frame = self.frame();
        for scope in frame.comp_scopes.iter().rev() {
            if let Some(value) = scope.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        match frame.kind {
            FrameKind::Function => {
                if let Some(def) = &frame.def {
                    if def.scope.globals.contains(name) {
                        return load_global(frame, name);
                    }
                    if def.scope.locals.contains(name) {
                        return frame.locals.borrow().get(name).cloned().ok_or_else(|| {
                            ExcType::UnboundLocalError.raise(format!(
                                "cannot access local variable '{name}' where it is not associated with a value"
                            ))
                        });
                    }
                }
                if let Some(value) = lookup_closure(&frame.closure, name) {
                    return Ok(value);
                }
                load_global(frame, name)
            }
            FrameKind::Module | FrameKind::Class => {
                if let Some(value) = frame.locals.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(value) = lookup_closure(&frame.closure, name) {
                    return Ok(value);
                }
                load_global(frame, name)
            }
        }
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value) {
        let frame = self.frame();
        if let Some(def) = &frame.def {
            if def.scope.globals.contains(name) {
                frame.globals.borrow_mut().insert(name.to_owned(), value);
                return;
            }
            if def.scope.nonlocals.contains(name) {
                if let Some(scope) = frame.closure.iter().find(|scope| scope.borrow().contains_key(name)) {
                    scope.borrow_mut().insert(name.to_owned(), value);
                    return;
                }
            }
        }
        frame.locals.borrow_mut().insert(name.to_owned(), value);
    }

    /// Binds a comprehension target in the innermost comprehension scope.
    fn store_comprehension_name(&mut self, name: &str, value: Value) {
        let frame = self.frame();
        match frame.comp_scopes.last() {
            Some(scope) => {
                scope.borrow_mut().insert(name.to_owned(), value);
            }
            None => {
                frame.locals.borrow_mut().insert(name.to_owned(), value);
            }
        }
    }

    pub(crate) fn delete_name(&mut self, name: &str) -> RunResult<()> {
        let frame = self.frame();
        let scope = match &frame.def {
            Some(def) if def.scope.globals.contains(name) => &frame.globals,
            _ => &frame.locals,
        };
        if scope.borrow_mut().shift_remove(name).is_none() {
            return ExcType::NameError.err(format!("name '{name}' is not defined"));
        }
        Ok(())
    }

    // ========================================================================
    // Assignment targets
    // ========================================================================

    pub(crate) fn assign(&mut self, target: &Target, value: Value) -> RunResult<()> {
        self.assign_to(target, value, false)
    }

    pub(crate) fn assign_comprehension(&mut self, target: &Target, value: Value) -> RunResult<()> {
        self.assign_to(target, value, true)
    }

    fn assign_to(&mut self, target: &Target, value: Value, comprehension: bool) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                if comprehension {
                    self.store_comprehension_name(name, value);
                } else {
                    self.store_name(name, value);
                }
            }
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                self.set_attr(&object, attr, value)?;
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let bounds = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
                    self.set_slice(&object, bounds, &value)?;
                } else {
                    let index = self.eval(index)?;
                    self.set_item(&object, index, value)?;
                }
            }
            Target::Unpack(targets) => {
                let items = self.iterate(&value)?;
                self.unpack(targets, items, comprehension)?;
            }
            Target::Starred(inner) => self.assign_to(inner, value, comprehension)?,
        }
        Ok(())
    }

    fn unpack(&mut self, targets: &[Target], items: Vec<Value>, comprehension: bool) -> RunResult<()> {
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        match star {
            None => {
                if items.len() < targets.len() {
                    return ExcType::ValueError.err(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ));
                }
                if items.len() > targets.len() {
                    return ExcType::ValueError.err(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign_to(target, item, comprehension)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return ExcType::ValueError.err(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    ));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign_to(target, item, comprehension)?;
                }
                self.assign_to(&targets[star], Value::list(middle), comprehension)?;
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign_to(target, item, comprehension)?;
                }
            }
        }
        Ok(())
    }

    fn delete_target(&mut self, target: &Target) -> RunResult<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                self.delete_attr(&object, attr)
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let bounds = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
                    self.delete_slice(&object, bounds)
                } else {
                    let index = self.eval(index)?;
                    self.delete_item(&object, &index)
                }
            }
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete_target(target)?;
                }
                Ok(())
            }
            Target::Starred(inner) => self.delete_target(inner),
        }
    }

    /// The receiver and defining class of the running method, for `super()`.
    pub(crate) fn super_context(&self) -> RunResult<(Rc<Class>, Value)> {
        let frame = self.frame();
        let (Some(owner), Some(def)) = (&frame.owner, &frame.def) else {
            return ExcType::RuntimeError.err("super(): no arguments");
        };
        let receiver = def
            .params
            .first()
            .and_then(|param| frame.locals.borrow().get(&param.name).cloned());
        match receiver {
            Some(receiver) => Ok((Rc::clone(owner), receiver)),
            None => ExcType::RuntimeError.err("super(): no arguments"),
        }
    }

    /// Creates a bare instance of `class` without running `__init__`.
    pub(crate) fn new_instance(class: &Rc<Class>) -> Rc<Instance> {
        Rc::new(Instance {
            class: Rc::clone(class),
            attrs: new_namespace(),
        })
    }
}

fn lookup_closure(closure: &[Namespace], name: &str) -> Option<Value> {
    closure.iter().find_map(|scope| scope.borrow().get(name).cloned())
}

fn load_global(frame: &Frame, name: &str) -> RunResult<Value> {
    if let Some(value) = frame.globals.borrow().get(name) {
        return Ok(value.clone());
    }
    crate::builtins::lookup(name).ok_or_else(|| ExcType::NameError.raise(format!("name '{name}' is not defined")))
}
