//! Intermediate representation produced by the parser and walked by the interpreter.
//!
//! The tree is plain owned data (`Arc` for shared function bodies) so a compiled
//! [`Program`](crate::Program) can be handed to a worker thread.

use std::{collections::HashSet, sync::Arc};

use num_bigint::BigInt;

use crate::fstring::FormatSpec;

/// A statement tagged with the 1-based source line it starts on.
#[derive(Debug, Clone)]
pub(crate) struct Stmt {
    pub line: u32,
    pub node: Node,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Expr(Expr),
    /// `a = b = value`; targets are assigned left to right.
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: Operator,
        value: Expr,
    },
    /// `x: int` without a value binds nothing at runtime.
    AnnAssign {
        target: Target,
        value: Option<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        or_else: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        or_else: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        or_else: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    FunctionDef(Arc<FunctionDef>),
    ClassDef(Arc<ClassDef>),
    Return(Option<Expr>),
    /// `import a as b` binds `b`; without an alias the binding is `a`.
    Import {
        module: String,
        binding: String,
    },
    /// `from module import name as binding, ...`
    ImportFrom {
        module: String,
        names: Vec<(String, String)>,
    },
    Global,
    Nonlocal,
    Try(Box<Try>),
    Raise(Option<Expr>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Target>),
}

#[derive(Debug, Clone)]
pub(crate) struct Try {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub or_else: Vec<Stmt>,
    pub finally: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub(crate) struct ExceptHandler {
    pub line: u32,
    pub exc_type: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

/// Assignment target.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Name(String),
    Attr { object: Box<Expr>, attr: String },
    Subscript { object: Box<Expr>, index: Box<Expr> },
    /// Tuple or list unpacking, at most one element may be `Starred`.
    Unpack(Vec<Target>),
    Starred(Box<Target>),
}

/// A function or lambda definition.
#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub name: String,
    pub line: u32,
    pub params: Vec<Param>,
    pub var_args: Option<String>,
    pub kwonly: Vec<Param>,
    pub var_kwargs: Option<String>,
    /// For lambdas this is a single `return` statement on the lambda's line.
    pub body: Vec<Stmt>,
    pub scope: FunctionScope,
}

#[derive(Debug)]
pub(crate) struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Static name classification for a function body.
#[derive(Debug, Default)]
pub(crate) struct FunctionScope {
    /// Names bound anywhere in the body (parameters included) and not declared
    /// `global` or `nonlocal`.
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
}

#[derive(Debug)]
pub(crate) struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub(crate) enum Literal {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    LongInt(BigInt),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    /// Short-circuit `and` / `or` over two or more operands.
    BoolOp {
        and: bool,
        values: Vec<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    Invert(Box<Expr>),
    /// Comparison chain `a < b <= c`.
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOperator, Expr)>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute {
        object: Box<Expr>,
        attr: String,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Lambda(Arc<FunctionDef>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// Generator expressions are evaluated eagerly into an iterator object.
    Generator {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    FString(Vec<FStringPart>),
    /// Walrus operator `(name := value)`.
    Named {
        target: String,
        value: Box<Expr>,
    },
}

/// Positional call argument.
#[derive(Debug, Clone)]
pub(crate) enum Arg {
    Plain(Expr),
    /// `*iterable`
    Star(Expr),
}

#[derive(Debug, Clone)]
pub(crate) struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub(crate) enum FStringPart {
    Literal(String),
    Interpolation {
        expr: Box<Expr>,
        conversion: Conversion,
        spec: Option<FormatSpec>,
        /// Text preceding the value for the `f"{x=}"` form.
        debug_prefix: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Conversion {
    None,
    Str,
    Repr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl Operator {
    /// The operator symbol used in `TypeError` messages.
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "** or pow()",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOperator {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}
