//! Parse tree. Every node lives in the compilation's `bumpalo` arena.

use crate::core::error::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expr<'a> {
    Int(i64, Span),
    Bool(bool, Span),
    Var(&'a str, Span),
    Unary {
        op: UnaryOp,
        operand: &'a Expr<'a>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
        span: Span,
    },
}

impl Expr<'_> {
    pub fn span(&self) -> Span {
        match *self {
            Expr::Int(_, span) | Expr::Bool(_, span) | Expr::Var(_, span) => span,
            Expr::Unary { span, .. } | Expr::Binary { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stmt<'a> {
    Label {
        name: &'a str,
        span: Span,
    },
    Let {
        name: &'a str,
        value: &'a Expr<'a>,
        span: Span,
    },
    Assign {
        name: &'a str,
        value: &'a Expr<'a>,
        span: Span,
    },
    Print {
        value: &'a Expr<'a>,
        span: Span,
    },
    Goto {
        label: &'a str,
        span: Span,
    },
    IfGoto {
        cond: &'a Expr<'a>,
        label: &'a str,
        span: Span,
    },
    Exit {
        value: &'a Expr<'a>,
        span: Span,
    },
}

impl Stmt<'_> {
    pub fn span(&self) -> Span {
        match *self {
            Stmt::Label { span, .. }
            | Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Print { span, .. }
            | Stmt::Goto { span, .. }
            | Stmt::IfGoto { span, .. }
            | Stmt::Exit { span, .. } => span,
        }
    }
}

/// Root of the parse tree: statements in source order.
#[derive(Debug, Clone, Copy)]
pub struct Ast<'a> {
    pub stmts: &'a [Stmt<'a>],
    /// Position just past the last token.
    pub end: Span,
}
