//! Single-pass tree walker.
//!
//! Statements are visited once, in source order. Labels bind to the current
//! program counter; transfers to labels that are not bound yet are emitted
//! with a placeholder target and patched when the context is finalized.

use crate::core::error::{CompileResult, Span};
use crate::core::session::CompilationContext;
use crate::frontend::ast::{Ast, BinaryOp, Expr, Stmt, UnaryOp};
use crate::ir::{Cond, Op, Program};
use crate::sema::{expect_type, SemaError, SymbolTable, Type};

/// Lower `ast` into the context's emission buffer and resolve all labels.
pub fn lower(ast: &Ast<'_>, ctx: &mut CompilationContext<'_>) -> CompileResult<Program> {
    let mut walker = TreeWalker {
        ctx,
        symbols: SymbolTable::new(),
    };
    for stmt in ast.stmts {
        walker.lower_stmt(stmt)?;
    }
    // Falling off the end exits with status 0; a trailing label binds here.
    walker.ctx.emit(Op::Push(0), ast.end)?;
    walker.ctx.emit(Op::Exit, ast.end)?;

    let TreeWalker { ctx, symbols } = walker;
    let program = ctx.finalize(symbols.into_slots())?;
    log::debug!(
        "lowered {} statements into {} ops, {} slots",
        ast.stmts.len(),
        program.len(),
        program.slots.len()
    );
    Ok(program)
}

struct TreeWalker<'c, 'arena> {
    ctx: &'c mut CompilationContext<'arena>,
    symbols: SymbolTable,
}

impl TreeWalker<'_, '_> {
    fn lower_stmt(&mut self, stmt: &Stmt<'_>) -> CompileResult<()> {
        match *stmt {
            Stmt::Label { name, span } => {
                self.ctx.bind_label(name, span)?;
            }
            Stmt::Let { name, value, span } => {
                // The initializer cannot see the variable it declares.
                let ty = self.lower_expr(value)?;
                let symbol = self.symbols.declare(name, ty, span)?;
                self.ctx.emit(Op::Store(symbol.slot), span)?;
            }
            Stmt::Assign { name, value, span } => {
                let symbol = self.symbols.lookup(name, span)?;
                let ty = self.lower_expr(value)?;
                expect_type(&format!("assignment to `{}`", name), symbol.ty, ty, value.span())?;
                self.ctx.emit(Op::Store(symbol.slot), span)?;
            }
            Stmt::Print { value, span } => {
                let op = match self.lower_expr(value)? {
                    Type::Int => Op::PrintInt,
                    Type::Bool => Op::PrintBool,
                };
                self.ctx.emit(op, span)?;
            }
            Stmt::Goto { label, span } => {
                self.ctx.emit_transfer(Op::Jump, label, span)?;
            }
            Stmt::IfGoto { cond, label, span } => {
                let ty = self.lower_expr(cond)?;
                expect_type("`if` condition", Type::Bool, ty, cond.span())?;
                self.ctx.emit_transfer(Op::JumpIfTrue, label, span)?;
            }
            Stmt::Exit { value, span } => {
                let ty = self.lower_expr(value)?;
                expect_type("`exit` status", Type::Int, ty, value.span())?;
                self.ctx.emit(Op::Exit, span)?;
            }
        }
        Ok(())
    }

    /// Emit code leaving the value of `expr` on the stack; returns its type.
    fn lower_expr(&mut self, expr: &Expr<'_>) -> CompileResult<Type> {
        match *expr {
            Expr::Int(value, span) => {
                self.ctx.emit(Op::Push(value), span)?;
                Ok(Type::Int)
            }
            Expr::Bool(value, span) => {
                self.ctx.emit(Op::Push(value as i64), span)?;
                Ok(Type::Bool)
            }
            Expr::Var(name, span) => {
                let symbol = self.symbols.lookup(name, span)?;
                self.ctx.emit(Op::Load(symbol.slot), span)?;
                Ok(symbol.ty)
            }
            Expr::Unary { op, operand, span } => {
                let ty = self.lower_expr(operand)?;
                let (expected, lowered) = match op {
                    UnaryOp::Neg => (Type::Int, Op::Neg),
                    UnaryOp::Not => (Type::Bool, Op::Not),
                };
                let context = match op {
                    UnaryOp::Neg => "operand of `-`",
                    UnaryOp::Not => "operand of `not`",
                };
                expect_type(context, expected, ty, operand.span())?;
                self.ctx.emit(lowered, span)?;
                Ok(expected)
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let lhs_ty = self.lower_expr(lhs)?;
                let rhs_ty = self.lower_expr(rhs)?;
                let result = binary_type(op, lhs_ty, rhs_ty, lhs.span(), rhs.span(), span)?;
                self.ctx.emit(binary_op(op), span)?;
                Ok(result)
            }
        }
    }
}

fn binary_op(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Rem => Op::Rem,
        BinaryOp::And => Op::And,
        BinaryOp::Or => Op::Or,
        BinaryOp::Eq => Op::Cmp(Cond::Eq),
        BinaryOp::Ne => Op::Cmp(Cond::Ne),
        BinaryOp::Lt => Op::Cmp(Cond::Lt),
        BinaryOp::Le => Op::Cmp(Cond::Le),
        BinaryOp::Gt => Op::Cmp(Cond::Gt),
        BinaryOp::Ge => Op::Cmp(Cond::Ge),
    }
}

/// Result type of `lhs op rhs`, or the typing error.
fn binary_type(
    op: BinaryOp,
    lhs: Type,
    rhs: Type,
    lhs_span: Span,
    rhs_span: Span,
    span: Span,
) -> Result<Type, SemaError> {
    let context = format!("operand of `{}`", op.symbol());
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            expect_type(&context, Type::Int, lhs, lhs_span)?;
            expect_type(&context, Type::Int, rhs, rhs_span)?;
            Ok(Type::Int)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            expect_type(&context, Type::Int, lhs, lhs_span)?;
            expect_type(&context, Type::Int, rhs, rhs_span)?;
            Ok(Type::Bool)
        }
        BinaryOp::And | BinaryOp::Or => {
            expect_type(&context, Type::Bool, lhs, lhs_span)?;
            expect_type(&context, Type::Bool, rhs, rhs_span)?;
            Ok(Type::Bool)
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if lhs != rhs {
                return Err(SemaError::OperandMismatch {
                    op: op.symbol().to_string(),
                    lhs,
                    rhs,
                    span,
                });
            }
            Ok(Type::Bool)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::error::CompileError;
    use crate::core::patch_table::ResolveError;
    use crate::frontend::{parse, GrammarTap};
    use crate::ir::PLACEHOLDER;
    use bumpalo::Bump;

    fn lower_source(text: &str) -> CompileResult<Program> {
        let arena = Bump::new();
        let mut ctx = CompilationContext::new(Config::new("test.gt"), &arena)?;
        let mut tap = GrammarTap::disabled();
        let ast = parse(text, &arena, &mut tap)?;
        lower(&ast, &mut ctx)
    }

    #[test]
    fn test_forward_goto_is_patched() {
        let program = lower_source("goto skip;\nprint 1;\nskip:\nprint 2;\n").unwrap();
        assert_eq!(
            program.ops,
            vec![
                Op::Jump(3),
                Op::Push(1),
                Op::PrintInt,
                Op::Push(2),
                Op::PrintInt,
                Op::Push(0),
                Op::Exit,
            ]
        );
        assert!(program.ops.iter().all(|op| op.target() != Some(PLACEHOLDER)));
        assert_eq!(program.labels[0].name, "skip");
        assert_eq!(program.lines[3], 4);
    }

    #[test]
    fn test_backward_goto_uses_bound_address() {
        let program = lower_source("let i = 0;\nloop:\ni = i + 1;\nif i < 3 goto loop;\n").unwrap();
        assert_eq!(program.ops[0], Op::Push(0));
        assert_eq!(program.ops[1], Op::Store(0));
        assert_eq!(program.ops[9], Op::JumpIfTrue(2));
    }

    #[test]
    fn test_label_at_end_of_file() {
        let program = lower_source("goto end;\nend:\n").unwrap();
        assert_eq!(program.ops, vec![Op::Jump(1), Op::Push(0), Op::Exit]);
    }

    #[test]
    fn test_print_chooses_variant_by_type() {
        let program = lower_source("print 1 < 2;\nprint 5;\n").unwrap();
        assert_eq!(program.ops[3], Op::PrintBool);
        assert_eq!(program.ops[5], Op::PrintInt);
    }

    #[test]
    fn test_undefined_label() {
        let err = lower_source("goto nowhere;\n").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Resolve(ResolveError::UndefinedLabel { ref label, .. }) if label == "nowhere"
        ));
    }

    #[test]
    fn test_duplicate_label() {
        let err = lower_source("a:\nprint 1;\na:\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "3:1: duplicate label `a` (first defined at 1:1)"
        );
    }

    #[test]
    fn test_semantic_errors() {
        let err = lower_source("print y;").unwrap_err();
        assert!(matches!(err, CompileError::Sema(SemaError::UnresolvedIdentifier { .. })));

        let err = lower_source("let x = 1;\nlet x = 2;").unwrap_err();
        assert!(matches!(err, CompileError::Sema(SemaError::Redeclared { .. })));

        let err = lower_source("if 1 goto a;\na:").unwrap_err();
        assert!(err.to_string().contains("`if` condition"));

        let err = lower_source("print 1 == true;").unwrap_err();
        assert!(matches!(err, CompileError::Sema(SemaError::OperandMismatch { .. })));

        let err = lower_source("let b = true;\nb = 3;").unwrap_err();
        assert!(err.to_string().contains("expected bool, found int"));

        let err = lower_source("let x = x;").unwrap_err();
        assert!(matches!(err, CompileError::Sema(SemaError::UnresolvedIdentifier { .. })));
    }

    #[test]
    fn test_forward_reference_capacity() {
        let arena = Bump::new();
        let mut config = Config::new("test.gt");
        config.max_forward_refs = 1;
        let mut ctx = CompilationContext::new(config, &arena).unwrap();
        let mut tap = GrammarTap::disabled();
        let ast = parse("goto a;\ngoto b;\na:\nb:\n", &arena, &mut tap).unwrap();
        let err = lower(&ast, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Resolve(ResolveError::CapacityExceeded { capacity: 1 })
        ));
    }
}
