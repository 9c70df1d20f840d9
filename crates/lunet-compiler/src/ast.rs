//! Syntax tree consumed by the compiler.
//!
//! The tree is produced by an external parser. Literal tokens arrive raw
//! (number text as written, string contents with escapes undecoded) and are
//! materialized during lowering. Every node carries a `SourceSpan`.

use std::fmt;

/// Source position of a node. Line 0 means the position is unavailable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub line: u32,
    pub column: u32,
}

impl SourceSpan {
    pub const UNAVAILABLE: SourceSpan = SourceSpan { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        SourceSpan { line, column }
    }

    pub fn is_available(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_available() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "?")
        }
    }
}

/// A raw literal token.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    True,
    False,
    /// Number text as written, e.g. `0x1p4`, `3`, `1e10`.
    Number(String),
    /// Quoted string contents between the delimiters, escapes undecoded.
    String(String),
    /// Long bracket string contents; no escape processing.
    LongString(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "~",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    VarArgs,
    Name(String),
    /// `obj[key]`
    Index { object: Box<Expr>, key: Box<Expr> },
    /// `obj.name`
    Member { object: Box<Expr>, name: String },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `receiver:method(args)`
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Table(Vec<TableField>),
    Unary { op: UnOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Parentheses truncate a multi-value expression to one value.
    Paren(Box<Expr>),
    Function(Box<FunctionBody>),
}

impl Expr {
    /// Call or varargs: may produce any number of values in last position.
    pub fn is_multi(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::VarArgs
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableField {
    /// `{ v }`
    Positional(Expr),
    /// `{ name = v }`
    Named(String, Expr),
    /// `{ [k] = v }`
    Keyed(Expr, Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    pub span: SourceSpan,
}

pub type Block = Vec<Stat>;

#[derive(Clone, Debug, PartialEq)]
pub struct Stat {
    pub kind: StatKind,
    pub span: SourceSpan,
}

/// `a.b.c:m` in `function a.b.c:m() end`.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncName {
    pub path: Vec<String>,
    pub method: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatKind {
    Empty,
    Assign { targets: Vec<Expr>, values: Vec<Expr> },
    Call(Expr),
    Label(String),
    Break,
    Goto(String),
    Do(Block),
    While { cond: Expr, body: Block },
    Repeat { body: Block, cond: Expr },
    If {
        clauses: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    NumericFor {
        var: String,
        start: Expr,
        stop: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Function { name: FuncName, body: FunctionBody },
    LocalFunction { name: String, body: FunctionBody },
    Local { names: Vec<String>, values: Vec<Expr> },
    Return(Vec<Expr>),
}

/// A whole source file: the body of the implicit vararg main function.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Chunk {
    pub body: Block,
}

/// Constructors for building trees by hand, with unavailable spans unless
/// positioned with [`at`](Expr::at).
pub mod build {
    use super::*;

    impl Expr {
        pub fn at(mut self, line: u32, column: u32) -> Self {
            self.span = SourceSpan::new(line, column);
            self
        }
    }

    impl Stat {
        pub fn at(mut self, line: u32, column: u32) -> Self {
            self.span = SourceSpan::new(line, column);
            self
        }
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr {
            kind,
            span: SourceSpan::UNAVAILABLE,
        }
    }

    fn stat(kind: StatKind) -> Stat {
        Stat {
            kind,
            span: SourceSpan::UNAVAILABLE,
        }
    }

    pub fn nil() -> Expr {
        expr(ExprKind::Literal(Literal::Nil))
    }

    pub fn boolean(b: bool) -> Expr {
        expr(ExprKind::Literal(if b { Literal::True } else { Literal::False }))
    }

    /// Raw number token.
    pub fn num(text: &str) -> Expr {
        expr(ExprKind::Literal(Literal::Number(text.to_string())))
    }

    pub fn int(i: i64) -> Expr {
        if i < 0 {
            unary(UnOp::Neg, num(&i.unsigned_abs().to_string()))
        } else {
            num(&i.to_string())
        }
    }

    /// Raw quoted string token (escapes undecoded).
    pub fn string(raw: &str) -> Expr {
        expr(ExprKind::Literal(Literal::String(raw.to_string())))
    }

    pub fn long_string(raw: &str) -> Expr {
        expr(ExprKind::Literal(Literal::LongString(raw.to_string())))
    }

    pub fn varargs() -> Expr {
        expr(ExprKind::VarArgs)
    }

    pub fn name(n: &str) -> Expr {
        expr(ExprKind::Name(n.to_string()))
    }

    pub fn index(object: Expr, key: Expr) -> Expr {
        expr(ExprKind::Index {
            object: Box::new(object),
            key: Box::new(key),
        })
    }

    pub fn member(object: Expr, name: &str) -> Expr {
        expr(ExprKind::Member {
            object: Box::new(object),
            name: name.to_string(),
        })
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        expr(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
        expr(ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method: method.to_string(),
            args,
        })
    }

    pub fn table(fields: Vec<TableField>) -> Expr {
        expr(ExprKind::Table(fields))
    }

    pub fn unary(op: UnOp, operand: Expr) -> Expr {
        expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        expr(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn paren(inner: Expr) -> Expr {
        expr(ExprKind::Paren(Box::new(inner)))
    }

    pub fn function(params: &[&str], is_vararg: bool, body: Block) -> Expr {
        expr(ExprKind::Function(Box::new(func_body(params, is_vararg, body))))
    }

    pub fn func_body(params: &[&str], is_vararg: bool, body: Block) -> FunctionBody {
        FunctionBody {
            params: params.iter().map(|p| p.to_string()).collect(),
            is_vararg,
            body,
            span: SourceSpan::UNAVAILABLE,
        }
    }

    pub fn empty() -> Stat {
        stat(StatKind::Empty)
    }

    pub fn assign(targets: Vec<Expr>, values: Vec<Expr>) -> Stat {
        stat(StatKind::Assign { targets, values })
    }

    pub fn call_stat(call: Expr) -> Stat {
        stat(StatKind::Call(call))
    }

    pub fn label(n: &str) -> Stat {
        stat(StatKind::Label(n.to_string()))
    }

    pub fn brk() -> Stat {
        stat(StatKind::Break)
    }

    pub fn goto(n: &str) -> Stat {
        stat(StatKind::Goto(n.to_string()))
    }

    pub fn do_block(body: Block) -> Stat {
        stat(StatKind::Do(body))
    }

    pub fn while_loop(cond: Expr, body: Block) -> Stat {
        stat(StatKind::While { cond, body })
    }

    pub fn repeat(body: Block, cond: Expr) -> Stat {
        stat(StatKind::Repeat { body, cond })
    }

    pub fn if_else(clauses: Vec<(Expr, Block)>, else_block: Option<Block>) -> Stat {
        stat(StatKind::If {
            clauses,
            else_block,
        })
    }

    pub fn numeric_for(var: &str, start: Expr, stop: Expr, step: Option<Expr>, body: Block) -> Stat {
        stat(StatKind::NumericFor {
            var: var.to_string(),
            start,
            stop,
            step,
            body,
        })
    }

    pub fn generic_for(names: &[&str], exprs: Vec<Expr>, body: Block) -> Stat {
        stat(StatKind::GenericFor {
            names: names.iter().map(|n| n.to_string()).collect(),
            exprs,
            body,
        })
    }

    pub fn function_decl(path: &[&str], method: Option<&str>, body: FunctionBody) -> Stat {
        stat(StatKind::Function {
            name: FuncName {
                path: path.iter().map(|p| p.to_string()).collect(),
                method: method.map(str::to_string),
            },
            body,
        })
    }

    pub fn local_function(n: &str, body: FunctionBody) -> Stat {
        stat(StatKind::LocalFunction {
            name: n.to_string(),
            body,
        })
    }

    pub fn local(names: &[&str], values: Vec<Expr>) -> Stat {
        stat(StatKind::Local {
            names: names.iter().map(|n| n.to_string()).collect(),
            values,
        })
    }

    pub fn ret(values: Vec<Expr>) -> Stat {
        stat(StatKind::Return(values))
    }

    pub fn chunk(body: Block) -> Chunk {
        Chunk { body }
    }
}
