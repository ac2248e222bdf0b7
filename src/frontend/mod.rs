//! Source frontend: lexer, parser, parse tree and the grammar visualization tap.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod viz;

pub use ast::{Ast, BinaryOp, Expr, Stmt, UnaryOp};
pub use parser::parse;
pub use viz::{Edge, GrammarTap};
