//! Lowers the ruff AST into the engine's statement tree.
//!
//! Besides the shape conversion, the parser records which names each function
//! binds so the interpreter can tell locals from globals and closures without
//! a separate resolution pass.

use std::{collections::HashSet, mem, sync::Arc};

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ConversionFlag as RuffConversionFlag, ElifElseClause, Expr as AstExpr,
    InterpolatedStringElement, Number, Operator as AstOperator, ParameterWithDefault, Stmt as AstStmt, UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange, TextSize};

use crate::{
    exception::CompileError,
    expressions::{
        Arg, ClassDef, CmpOperator, Comprehension, Conversion, ExceptHandler, Expr, FStringPart, FunctionDef,
        FunctionScope, Literal, Node, Operator, Param, Stmt, Target, Try,
    },
    fstring::FormatSpec,
};

/// Maximum nesting depth for statements and expressions during lowering.
#[cfg(not(debug_assertions))]
pub(crate) const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames, so the guard trips earlier.
#[cfg(debug_assertions)]
pub(crate) const MAX_NESTING_DEPTH: u16 = 64;

type ParseResult<T> = Result<T, CompileError>;

/// Parses `code` into a list of statements.
pub(crate) fn parse(code: &str) -> ParseResult<Vec<Stmt>> {
    let mut parser = Parser::new(code);
    let parsed = parse_module(code).map_err(|e| CompileError::syntax(e.error.to_string(), parser.line_of(e.range())))?;
    let module = parsed.into_syntax();
    parser.scopes.push(ScopeBuilder::default());
    parser.parse_statements(module.body.into())
}

/// Names bound in one scope while its body is being lowered.
#[derive(Default)]
struct ScopeBuilder {
    bound: HashSet<String>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
}

impl ScopeBuilder {
    fn finish(self) -> FunctionScope {
        let locals = self
            .bound
            .into_iter()
            .filter(|name| !self.globals.contains(name) && !self.nonlocals.contains(name))
            .collect();
        FunctionScope {
            locals,
            globals: self.globals,
            nonlocals: self.nonlocals,
        }
    }
}

struct Parser<'a> {
    code: &'a str,
    /// Byte offset of the start of every line.
    line_starts: Vec<usize>,
    /// Innermost scope last. Module and class bodies get a scope too so their
    /// bindings never leak into an enclosing function.
    scopes: Vec<ScopeBuilder>,
    depth_remaining: u16,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(code.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            code,
            line_starts,
            scopes: Vec::new(),
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    /// 1-based line of the start of `range`.
    fn line_of(&self, range: TextRange) -> u32 {
        self.line_at(range.start())
    }

    fn line_at(&self, offset: TextSize) -> u32 {
        let offset = usize::from(offset);
        let line = self.line_starts.partition_point(|&start| start <= offset);
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bound.insert(name.to_owned());
        }
    }

    fn decr_depth_remaining(&mut self, range: TextRange) -> ParseResult<()> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            Err(CompileError::syntax("too many nested parentheses", self.line_of(range)))
        }
    }

    fn parse_statements(&mut self, statements: Vec<AstStmt>) -> ParseResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            self.parse_statement(statement, &mut out)?;
        }
        Ok(out)
    }

    fn parse_statement(&mut self, statement: AstStmt, out: &mut Vec<Stmt>) -> ParseResult<()> {
        self.decr_depth_remaining(statement.range())?;
        let result = self.parse_statement_impl(statement, out);
        self.depth_remaining += 1;
        result
    }

    fn parse_statement_impl(&mut self, statement: AstStmt, out: &mut Vec<Stmt>) -> ParseResult<()> {
        let line = self.line_of(statement.range());
        let node = match statement {
            AstStmt::FunctionDef(function) => {
                let ast::StmtFunctionDef {
                    is_async,
                    decorator_list,
                    name,
                    type_params,
                    parameters,
                    body,
                    ..
                } = function;
                if is_async {
                    return Err(CompileError::not_implemented("async functions", line));
                }
                if !decorator_list.is_empty() {
                    return Err(CompileError::not_implemented("decorators", line));
                }
                if type_params.is_some() {
                    return Err(CompileError::not_implemented("type parameters", line));
                }
                let name = name.id.to_string();
                self.bind(&name);
                let def = self.parse_function(name, line, Some(&*parameters), FunctionBody::Block(body.into()))?;
                Node::FunctionDef(Arc::new(def))
            }
            AstStmt::ClassDef(c) => {
                if !c.decorator_list.is_empty() {
                    return Err(CompileError::not_implemented("decorators", line));
                }
                if c.type_params.is_some() {
                    return Err(CompileError::not_implemented("type parameters", line));
                }
                let bases = match c.arguments {
                    Some(arguments) => {
                        if !arguments.keywords.is_empty() {
                            return Err(CompileError::not_implemented("class keyword arguments", line));
                        }
                        arguments
                            .args
                            .into_vec()
                            .into_iter()
                            .map(|arg| self.parse_expression(arg))
                            .collect::<ParseResult<Vec<_>>>()?
                    }
                    None => Vec::new(),
                };
                let name = c.name.id.to_string();
                self.bind(&name);
                self.scopes.push(ScopeBuilder::default());
                let body = self.parse_statements(c.body.into());
                self.scopes.pop();
                Node::ClassDef(Arc::new(ClassDef { name, bases, body: body? }))
            }
            AstStmt::Return(ast::StmtReturn { value, .. }) => {
                Node::Return(value.map(|v| self.parse_expression(*v)).transpose()?)
            }
            AstStmt::Delete(ast::StmtDelete { targets, .. }) => Node::Delete(
                targets
                    .into_iter()
                    .map(|t| self.parse_target(t, line, true))
                    .collect::<ParseResult<_>>()?,
            ),
            AstStmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let value = self.parse_expression(*value)?;
                let targets = targets
                    .into_iter()
                    .map(|t| self.parse_target(t, line, true))
                    .collect::<ParseResult<_>>()?;
                Node::Assign { targets, value }
            }
            AstStmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => {
                let target = self.parse_target(*target, line, true)?;
                if matches!(target, Target::Unpack(_) | Target::Starred(_)) {
                    return Err(CompileError::syntax(
                        "'tuple' is an illegal expression for augmented assignment",
                        line,
                    ));
                }
                Node::AugAssign {
                    target,
                    op: convert_op(op, line)?,
                    value: self.parse_expression(*value)?,
                }
            }
            AstStmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => {
                let target = self.parse_target(*target, line, value.is_some())?;
                let value = value.map(|v| self.parse_expression(*v)).transpose()?;
                Node::AnnAssign { target, value }
            }
            AstStmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                if is_async {
                    return Err(CompileError::not_implemented("async for loops", line));
                }
                Node::For {
                    target: self.parse_target(*target, line, true)?,
                    iter: self.parse_expression(*iter)?,
                    body: self.parse_statements(body.into())?,
                    or_else: self.parse_statements(orelse.into())?,
                }
            }
            AstStmt::While(ast::StmtWhile { test, body, orelse, .. }) => Node::While {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body.into())?,
                or_else: self.parse_statements(orelse.into())?,
            },
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => Node::If {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body.into())?,
                or_else: self.parse_elif_else_clauses(elif_else_clauses)?,
            },
            AstStmt::With(_) => return Err(CompileError::not_implemented("with statements", line)),
            AstStmt::Match(_) => return Err(CompileError::not_implemented("match statements", line)),
            AstStmt::TypeAlias(_) => return Err(CompileError::not_implemented("type aliases", line)),
            AstStmt::Raise(ast::StmtRaise { exc, .. }) => Node::Raise(exc.map(|e| self.parse_expression(*e)).transpose()?),
            AstStmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                ..
            }) => {
                if is_star {
                    return Err(CompileError::not_implemented("exception groups", line));
                }
                let body = self.parse_statements(body.into())?;
                let handlers = handlers
                    .into_iter()
                    .map(|h| self.parse_except_handler(h))
                    .collect::<ParseResult<Vec<_>>>()?;
                Node::Try(Box::new(Try {
                    body,
                    handlers,
                    or_else: self.parse_statements(orelse.into())?,
                    finally: self.parse_statements(finalbody.into())?,
                }))
            }
            AstStmt::Assert(ast::StmtAssert { test, msg, .. }) => Node::Assert {
                test: self.parse_expression(*test)?,
                msg: msg.map(|m| self.parse_expression(*m)).transpose()?,
            },
            AstStmt::Import(ast::StmtImport { names, .. }) => {
                // `import a, b` is lowered to one statement per module.
                for alias in names {
                    let module = alias.name.as_str().to_owned();
                    let binding = match &alias.asname {
                        Some(asname) => asname.as_str().to_owned(),
                        None => module.split('.').next().unwrap_or_default().to_owned(),
                    };
                    self.bind(&binding);
                    out.push(Stmt {
                        line,
                        node: Node::Import { module, binding },
                    });
                }
                return Ok(());
            }
            AstStmt::ImportFrom(ast::StmtImportFrom { module, names, level, .. }) => {
                let module = match module {
                    Some(module) if level == 0 => module.as_str().to_owned(),
                    _ => return Err(CompileError::not_implemented("relative imports", line)),
                };
                let mut bindings = Vec::with_capacity(names.len());
                for alias in names {
                    if alias.name.as_str() == "*" {
                        return Err(CompileError::not_implemented("wildcard imports", line));
                    }
                    let name = alias.name.as_str().to_owned();
                    let binding = alias.asname.as_ref().map_or_else(|| name.clone(), |a| a.as_str().to_owned());
                    self.bind(&binding);
                    bindings.push((name, binding));
                }
                Node::ImportFrom {
                    module,
                    names: bindings,
                }
            }
            AstStmt::Global(ast::StmtGlobal { names, .. }) => {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.globals.extend(names.iter().map(|n| n.as_str().to_owned()));
                }
                Node::Global
            }
            AstStmt::Nonlocal(ast::StmtNonlocal { names, .. }) => {
                if self.scopes.len() < 2 {
                    return Err(CompileError::syntax("nonlocal declaration not allowed at module level", line));
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.nonlocals.extend(names.iter().map(|n| n.as_str().to_owned()));
                }
                Node::Nonlocal
            }
            AstStmt::Expr(ast::StmtExpr { value, .. }) => Node::Expr(self.parse_expression(*value)?),
            AstStmt::Pass(_) => Node::Pass,
            AstStmt::Break(_) => Node::Break,
            AstStmt::Continue(_) => Node::Continue,
            AstStmt::IpyEscapeCommand(_) => return Err(CompileError::not_implemented("IPython escape commands", line)),
        };
        out.push(Stmt { line, node });
        Ok(())
    }

    /// `elif` chains become nested `if` statements, each on its own line.
    fn parse_elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> ParseResult<Vec<Stmt>> {
        let mut tail: Vec<Stmt> = Vec::new();
        for clause in clauses.into_iter().rev() {
            let line = self.line_of(clause.range());
            match clause.test {
                Some(test) => {
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body.into())?;
                    let or_else = mem::take(&mut tail);
                    tail = vec![Stmt {
                        line,
                        node: Node::If { test, body, or_else },
                    }];
                }
                None => tail = self.parse_statements(clause.body.into())?,
            }
        }
        Ok(tail)
    }

    fn parse_except_handler(&mut self, handler: ast::ExceptHandler) -> ParseResult<ExceptHandler> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        let line = self.line_of(h.range);
        let exc_type = h.type_.map(|e| self.parse_expression(*e)).transpose()?;
        let name = h.name.map(|n| n.id.to_string());
        if let Some(name) = &name {
            self.bind(name);
        }
        Ok(ExceptHandler {
            line,
            exc_type,
            name,
            body: self.parse_statements(h.body.into())?,
        })
    }

    fn parse_function(
        &mut self,
        name: String,
        line: u32,
        parameters: Option<&ast::Parameters>,
        body: FunctionBody,
    ) -> ParseResult<FunctionDef> {
        // Defaults are evaluated in the enclosing scope.
        let (params, var_args, kwonly, var_kwargs) = match parameters {
            Some(p) => {
                let mut params = self.parse_params(&p.posonlyargs)?;
                params.extend(self.parse_params(&p.args)?);
                (
                    params,
                    p.vararg.as_ref().map(|v| v.name.id.to_string()),
                    self.parse_params(&p.kwonlyargs)?,
                    p.kwarg.as_ref().map(|v| v.name.id.to_string()),
                )
            }
            None => (Vec::new(), None, Vec::new(), None),
        };

        let mut scope = ScopeBuilder::default();
        scope.bound.extend(params.iter().map(|p| p.name.clone()));
        scope.bound.extend(kwonly.iter().map(|p| p.name.clone()));
        scope.bound.extend(var_args.iter().cloned());
        scope.bound.extend(var_kwargs.iter().cloned());
        self.scopes.push(scope);
        let body = match body {
            FunctionBody::Block(statements) => self.parse_statements(statements),
            FunctionBody::Lambda(expr) => self.parse_expression(expr).map(|value| {
                vec![Stmt {
                    line,
                    node: Node::Return(Some(value)),
                }]
            }),
        };
        let scope = self.scopes.pop().unwrap_or_default().finish();
        Ok(FunctionDef {
            name,
            line,
            params,
            var_args,
            kwonly,
            var_kwargs,
            body: body?,
            scope,
        })
    }

    fn parse_params(&mut self, params: &[ParameterWithDefault]) -> ParseResult<Vec<Param>> {
        params
            .iter()
            .map(|p| {
                let default = match &p.default {
                    Some(expr) => Some(self.parse_expression((**expr).clone())?),
                    None => None,
                };
                Ok(Param {
                    name: p.parameter.name.id.to_string(),
                    default,
                })
            })
            .collect()
    }

    /// Parses an assignment, `for`, or `del` target. `bind` records plain
    /// names as bound in the current scope.
    fn parse_target(&mut self, ast: AstExpr, line: u32, bind: bool) -> ParseResult<Target> {
        self.decr_depth_remaining(ast.range())?;
        let result = self.parse_target_impl(ast, line, bind);
        self.depth_remaining += 1;
        result
    }

    fn parse_target_impl(&mut self, ast: AstExpr, line: u32, bind: bool) -> ParseResult<Target> {
        match ast {
            AstExpr::Name(ast::ExprName { id, .. }) => {
                let name = id.to_string();
                if bind {
                    self.bind(&name);
                }
                Ok(Target::Name(name))
            }
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Target::Attr {
                object: Box::new(self.parse_expression(*value)?),
                attr: attr.id.to_string(),
            }),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: Box::new(self.parse_expression(*value)?),
                index: Box::new(self.parse_expression(*slice)?),
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => {
                let targets = elts
                    .into_iter()
                    .map(|e| self.parse_target(e, line, bind))
                    .collect::<ParseResult<Vec<_>>>()?;
                if targets.iter().filter(|t| matches!(t, Target::Starred(_))).count() > 1 {
                    return Err(CompileError::syntax("multiple starred expressions in assignment", line));
                }
                Ok(Target::Unpack(targets))
            }
            AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                Ok(Target::Starred(Box::new(self.parse_target(*value, line, bind)?)))
            }
            other => Err(CompileError::syntax(
                format!("cannot assign to {}", describe_expr(&other)),
                self.line_of(other.range()),
            )),
        }
    }

    fn parse_expression(&mut self, expression: AstExpr) -> ParseResult<Expr> {
        self.decr_depth_remaining(expression.range())?;
        let result = self.parse_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn parse_expressions(&mut self, expressions: Vec<AstExpr>) -> ParseResult<Vec<Expr>> {
        expressions.into_iter().map(|e| self.parse_expression(e)).collect()
    }

    fn parse_expression_impl(&mut self, expression: AstExpr) -> ParseResult<Expr> {
        let line = self.line_of(expression.range());
        Ok(match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => Expr::BoolOp {
                and: matches!(op, BoolOp::And),
                values: self.parse_expressions(values)?,
            },
            AstExpr::Named(ast::ExprNamed { target, value, .. }) => {
                let AstExpr::Name(ast::ExprName { id, .. }) = *target else {
                    return Err(CompileError::syntax("assignment expression target must be a name", line));
                };
                let target = id.to_string();
                self.bind(&target);
                Expr::Named {
                    target,
                    value: Box::new(self.parse_expression(*value)?),
                }
            }
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => Expr::BinOp {
                left: Box::new(self.parse_expression(*left)?),
                op: convert_op(op, line)?,
                right: Box::new(self.parse_expression(*right)?),
            },
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                let operand = Box::new(self.parse_expression(*operand)?);
                match op {
                    UnaryOp::Not => Expr::Not(operand),
                    UnaryOp::USub => Expr::Neg(operand),
                    UnaryOp::UAdd => Expr::Pos(operand),
                    UnaryOp::Invert => Expr::Invert(operand),
                }
            }
            AstExpr::Lambda(ast::ExprLambda { parameters, body, .. }) => {
                let def = self.parse_function("<lambda>".to_owned(), line, parameters.as_deref(), FunctionBody::Lambda(*body))?;
                Expr::Lambda(Arc::new(def))
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => Expr::IfElse {
                test: Box::new(self.parse_expression(*test)?),
                body: Box::new(self.parse_expression(*body)?),
                orelse: Box::new(self.parse_expression(*orelse)?),
            },
            AstExpr::Dict(ast::ExprDict { items, .. }) => {
                let mut pairs = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(CompileError::not_implemented("dict unpacking expressions", line));
                    };
                    pairs.push((self.parse_expression(key)?, self.parse_expression(value)?));
                }
                Expr::Dict(pairs)
            }
            AstExpr::Set(ast::ExprSet { elts, .. }) => Expr::Set(self.parse_literal_items(elts, line)?),
            AstExpr::List(ast::ExprList { elts, .. }) => Expr::List(self.parse_literal_items(elts, line)?),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => Expr::Tuple(self.parse_literal_items(elts, line)?),
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. }) => {
                let generators = self.parse_comprehension_generators(generators, line)?;
                Expr::ListComp {
                    elt: Box::new(self.parse_expression(*elt)?),
                    generators,
                }
            }
            AstExpr::SetComp(ast::ExprSetComp { elt, generators, .. }) => {
                let generators = self.parse_comprehension_generators(generators, line)?;
                Expr::SetComp {
                    elt: Box::new(self.parse_expression(*elt)?),
                    generators,
                }
            }
            AstExpr::DictComp(ast::ExprDictComp {
                key, value, generators, ..
            }) => {
                let Some(key) = key else {
                    return Err(CompileError::syntax("dict unpacking cannot be used in dict comprehension", line));
                };
                let generators = self.parse_comprehension_generators(generators, line)?;
                Expr::DictComp {
                    key: Box::new(self.parse_expression(*key)?),
                    value: Box::new(self.parse_expression(*value)?),
                    generators,
                }
            }
            AstExpr::Generator(ast::ExprGenerator { elt, generators, .. }) => {
                let generators = self.parse_comprehension_generators(generators, line)?;
                Expr::Generator {
                    elt: Box::new(self.parse_expression(*elt)?),
                    generators,
                }
            }
            AstExpr::Await(_) => return Err(CompileError::not_implemented("await expressions", line)),
            AstExpr::Yield(_) | AstExpr::YieldFrom(_) => {
                return Err(CompileError::not_implemented("generator functions", line));
            }
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => {
                let left = Box::new(self.parse_expression(*left)?);
                let ops = ops
                    .into_vec()
                    .into_iter()
                    .zip(comparators.into_vec())
                    .map(|(op, cmp)| Ok((convert_compare_op(op), self.parse_expression(cmp)?)))
                    .collect::<ParseResult<Vec<_>>>()?;
                Expr::Compare { left, ops }
            }
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                let ast::Arguments { args, keywords, .. } = arguments;
                let func = Box::new(self.parse_expression(*func)?);
                let args = args
                    .into_vec()
                    .into_iter()
                    .map(|arg| match arg {
                        AstExpr::Starred(ast::ExprStarred { value, .. }) => self.parse_expression(*value).map(Arg::Star),
                        other => self.parse_expression(other).map(Arg::Plain),
                    })
                    .collect::<ParseResult<Vec<_>>>()?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    let Some(arg) = keyword.arg else {
                        return Err(CompileError::not_implemented("keyword argument unpacking (**kwargs) calls", line));
                    };
                    kwargs.push((arg.id.to_string(), self.parse_expression(keyword.value)?));
                }
                Expr::Call { func, args, kwargs }
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => self.parse_fstring(&value)?,
            AstExpr::TString(_) => return Err(CompileError::not_implemented("template strings (t-strings)", line)),
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => Expr::Literal(Literal::Str(value.to_string())),
            AstExpr::BytesLiteral(_) => return Err(CompileError::not_implemented("bytes literals", line)),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => match value {
                Number::Int(i) => match i.as_i64() {
                    Some(i) => Expr::Literal(Literal::Int(i)),
                    None => {
                        let big = parse_int_literal(&i.to_string())
                            .ok_or_else(|| CompileError::syntax(format!("invalid integer literal: {i}"), line))?;
                        Expr::Literal(Literal::LongInt(big))
                    }
                },
                Number::Float(f) => Expr::Literal(Literal::Float(f)),
                Number::Complex { .. } => return Err(CompileError::not_implemented("complex numbers", line)),
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => Expr::Literal(Literal::Bool(value)),
            AstExpr::NoneLiteral(_) => Expr::Literal(Literal::None),
            AstExpr::EllipsisLiteral(_) => Expr::Literal(Literal::Ellipsis),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Expr::Attribute {
                object: Box::new(self.parse_expression(*value)?),
                attr: attr.id.to_string(),
            },
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Expr::Subscript {
                object: Box::new(self.parse_expression(*value)?),
                index: Box::new(self.parse_expression(*slice)?),
            },
            AstExpr::Starred(_) => return Err(CompileError::not_implemented("starred expressions", line)),
            AstExpr::Name(ast::ExprName { id, .. }) => Expr::Name(id.to_string()),
            AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => Expr::Slice {
                lower: lower.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
                upper: upper.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
                step: step.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
            },
            AstExpr::IpyEscapeCommand(_) => return Err(CompileError::not_implemented("IPython escape commands", line)),
        })
    }

    fn parse_literal_items(&mut self, elts: Vec<AstExpr>, line: u32) -> ParseResult<Vec<Expr>> {
        if elts.iter().any(|e| matches!(e, AstExpr::Starred(_))) {
            return Err(CompileError::not_implemented("starred expressions in literals", line));
        }
        self.parse_expressions(elts)
    }

    /// Comprehension targets live in the comprehension's own scope and are not
    /// recorded as bindings of the enclosing function.
    fn parse_comprehension_generators(
        &mut self,
        generators: Vec<ast::Comprehension>,
        line: u32,
    ) -> ParseResult<Vec<Comprehension>> {
        generators
            .into_iter()
            .map(|comp| {
                if comp.is_async {
                    return Err(CompileError::not_implemented("async comprehensions", line));
                }
                Ok(Comprehension {
                    target: self.parse_target(comp.target, line, false)?,
                    iter: self.parse_expression(comp.iter)?,
                    ifs: self.parse_expressions(comp.ifs)?,
                })
            })
            .collect()
    }

    fn parse_fstring(&mut self, value: &ast::FStringValue) -> ParseResult<Expr> {
        let mut parts = Vec::new();
        for fstring_part in value {
            match fstring_part {
                ast::FStringPart::Literal(lit) => {
                    if !lit.value.is_empty() {
                        parts.push(FStringPart::Literal(lit.value.to_string()));
                    }
                }
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        parts.push(self.parse_fstring_element(element)?);
                    }
                }
            }
        }
        if let [FStringPart::Literal(text)] = parts.as_slice() {
            return Ok(Expr::Literal(Literal::Str(text.clone())));
        }
        Ok(Expr::FString(parts))
    }

    fn parse_fstring_element(&mut self, element: &InterpolatedStringElement) -> ParseResult<FStringPart> {
        match element {
            InterpolatedStringElement::Literal(lit) => Ok(FStringPart::Literal(lit.value.to_string())),
            InterpolatedStringElement::Interpolation(interp) => {
                let line = self.line_of(interp.range());
                let expr = Box::new(self.parse_expression((*interp.expression).clone())?);
                let spec = match &interp.format_spec {
                    Some(spec) => Some(self.parse_format_spec(spec)?),
                    None => None,
                };
                // `f"{a=}"` renders "a=" before the value.
                let debug_prefix = interp.debug_text.as_ref().map(|dt| {
                    let expr_text = &self.code[interp.expression.range()];
                    format!("{}{}{}", dt.leading(), expr_text, dt.trailing())
                });
                Ok(FStringPart::Interpolation {
                    expr,
                    conversion: convert_conversion_flag(interp.conversion, line)?,
                    spec,
                    debug_prefix,
                })
            }
        }
    }

    fn parse_format_spec(&mut self, spec: &ast::InterpolatedStringFormatSpec) -> ParseResult<FormatSpec> {
        let mut parts = Vec::new();
        let mut has_interpolation = false;
        for element in &spec.elements {
            if matches!(element, InterpolatedStringElement::Interpolation(_)) {
                has_interpolation = true;
            }
            parts.push(self.parse_fstring_element(element)?);
        }
        if has_interpolation {
            return Ok(FormatSpec::Dynamic(parts));
        }
        let static_spec: String = parts
            .into_iter()
            .filter_map(|p| match p {
                FStringPart::Literal(text) => Some(text),
                FStringPart::Interpolation { .. } => None,
            })
            .collect();
        static_spec.parse().map(FormatSpec::Static).map_err(|spec_str| {
            CompileError::syntax(format!("Invalid format specifier '{spec_str}'"), self.line_of(spec.range))
        })
    }
}

enum FunctionBody {
    Block(Vec<AstStmt>),
    Lambda(AstExpr),
}

fn describe_expr(expr: &AstExpr) -> &'static str {
    match expr {
        AstExpr::Call(_) => "function call",
        AstExpr::NumberLiteral(_) | AstExpr::StringLiteral(_) | AstExpr::BooleanLiteral(_) => "literal",
        AstExpr::NoneLiteral(_) => "None",
        AstExpr::BinOp(_) | AstExpr::UnaryOp(_) | AstExpr::BoolOp(_) => "expression",
        AstExpr::Compare(_) => "comparison",
        AstExpr::Lambda(_) => "lambda",
        _ => "expression",
    }
}

fn convert_op(op: AstOperator, line: u32) -> ParseResult<Operator> {
    Ok(match op {
        AstOperator::Add => Operator::Add,
        AstOperator::Sub => Operator::Sub,
        AstOperator::Mult => Operator::Mult,
        AstOperator::MatMult => return Err(CompileError::not_implemented("matrix multiplications", line)),
        AstOperator::Div => Operator::Div,
        AstOperator::Mod => Operator::Mod,
        AstOperator::Pow => Operator::Pow,
        AstOperator::LShift => Operator::LShift,
        AstOperator::RShift => Operator::RShift,
        AstOperator::BitOr => Operator::BitOr,
        AstOperator::BitXor => Operator::BitXor,
        AstOperator::BitAnd => Operator::BitAnd,
        AstOperator::FloorDiv => Operator::FloorDiv,
    })
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

fn convert_conversion_flag(flag: RuffConversionFlag, line: u32) -> ParseResult<Conversion> {
    match flag {
        RuffConversionFlag::None => Ok(Conversion::None),
        RuffConversionFlag::Str => Ok(Conversion::Str),
        RuffConversionFlag::Repr => Ok(Conversion::Repr),
        RuffConversionFlag::Ascii => Err(CompileError::not_implemented("!a conversions", line)),
    }
}

/// Parses an integer literal string (decimal, hex, octal, or binary) into a `BigInt`.
fn parse_int_literal(s: &str) -> Option<BigInt> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.as_str();
    if cleaned.len() >= 2 {
        let (prefix, digits) = cleaned.split_at(2);
        match prefix.to_ascii_lowercase().as_str() {
            "0x" => return BigInt::parse_bytes(digits.as_bytes(), 16),
            "0o" => return BigInt::parse_bytes(digits.as_bytes(), 8),
            "0b" => return BigInt::parse_bytes(digits.as_bytes(), 2),
            _ => {}
        }
    }
    cleaned.parse::<BigInt>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(code: &str) -> Vec<Stmt> {
        parse(code).unwrap()
    }

    #[test]
    fn statements_carry_source_lines() {
        let body = parse_ok("a = 1\n\nif a:\n    b = 2\nelif a > 3:\n    b = 3\n");
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].line, 1);
        assert_eq!(body[1].line, 3);
        let Node::If { body: inner, or_else, .. } = &body[1].node else {
            panic!("expected if");
        };
        assert_eq!(inner[0].line, 4);
        assert_eq!(or_else[0].line, 5);
    }

    #[test]
    fn function_scope_tracks_bindings() {
        let body = parse_ok(
            "def f(a, *rest, k=1):\n    global g\n    b = a\n    g = b\n    for i in rest:\n        pass\n    return [j for j in rest]\n",
        );
        let Node::FunctionDef(def) = &body[0].node else {
            panic!("expected def");
        };
        let locals = &def.scope.locals;
        for name in ["a", "rest", "k", "b", "i"] {
            assert!(locals.contains(name), "{name} should be local");
        }
        assert!(!locals.contains("g"));
        assert!(!locals.contains("j"));
        assert!(def.scope.globals.contains("g"));
    }

    #[test]
    fn syntax_errors_report_line() {
        let err = parse("x = 1\ny = 'unterminated\n").unwrap_err();
        assert_eq!(err.exc_type, crate::ExcType::SyntaxError);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn unsupported_features_are_not_implemented() {
        let err = parse("with open('f') as f:\n    pass\n").unwrap_err();
        assert_eq!(err.exc_type, crate::ExcType::NotImplementedError);
        assert_eq!(err.message, "with statements are not supported");
        let err = parse("def g():\n    yield 1\n").unwrap_err();
        assert_eq!(err.exc_type, crate::ExcType::NotImplementedError);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut code = "x".to_owned();
        for _ in 0..250 {
            code = format!("({code},)");
        }
        let err = parse(&code).unwrap_err();
        assert_eq!(err.exc_type, crate::ExcType::SyntaxError);
        assert_eq!(err.message, "too many nested parentheses");
    }

    #[test]
    fn int_literals_with_radix() {
        assert_eq!(parse_int_literal("0xff"), Some(BigInt::from(255)));
        assert_eq!(parse_int_literal("1_000"), Some(BigInt::from(1000)));
    }
}
