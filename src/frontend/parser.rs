//! Recursive-descent parser producing an arena-allocated [`Ast`].
//!
//! Each completed grammar reduction is reported to the visualization tap as
//! `(nonterminal, principal child)`, bottom-up.

use bumpalo::Bump;

use super::ast::{Ast, BinaryOp, Expr, Stmt, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use super::viz::GrammarTap;
use crate::core::error::{CompileError, CompileResult, Span};

/// Deepest parenthesis or unary-operator nesting accepted in one expression.
pub const MAX_NESTING: usize = 128;
/// Most operators accepted in one expression.
pub const MAX_OPERATORS: usize = 1024;

/// Parse `text` into a tree allocated in `arena`.
pub fn parse<'a>(text: &str, arena: &'a Bump, tap: &mut GrammarTap) -> CompileResult<Ast<'a>> {
    let tokens = tokenize(text)?;
    let parser = Parser {
        tokens,
        pos: 0,
        arena,
        tap,
        depth: 0,
        operators: 0,
    };
    parser.parse()
}

struct Parser<'s, 'a, 't> {
    tokens: Vec<Token<'s>>,
    pos: usize,
    arena: &'a Bump,
    tap: &'t mut GrammarTap,
    /// Open parentheses and unary operators around the current position.
    depth: usize,
    /// Operators in the current statement's expressions.
    operators: usize,
}

impl<'s, 'a> Parser<'s, 'a, '_> {
    fn parse(mut self) -> CompileResult<Ast<'a>> {
        let mut stmts = bumpalo::collections::Vec::new_in(self.arena);
        while self.peek().kind != TokenKind::Eof {
            let stmt = self.parse_stmt()?;
            self.reduce("program", "stmt");
            stmts.push(stmt);
        }
        let end = self.peek().span;
        log::debug!("parsed {} statements", stmts.len());
        Ok(Ast {
            stmts: stmts.into_bump_slice(),
            end,
        })
    }

    fn reduce(&mut self, from: &str, to: &str) {
        if self.tap.is_enabled() {
            self.tap.emit(from, to);
        }
    }

    fn peek(&self) -> Token<'s> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Token<'s> {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        self.tokens[idx]
    }

    fn advance(&mut self) -> Token<'s> {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, expected: &str) -> CompileResult<T> {
        let token = self.peek();
        Err(CompileError::Syntax {
            message: format!("expected {}, found {}", expected, token.kind.describe()),
            span: token.span,
        })
    }

    fn expect(&mut self, kind: TokenKind<'static>, expected: &str) -> CompileResult<Token<'s>> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            self.error(expected)
        }
    }

    fn expect_ident(&mut self, expected: &str) -> CompileResult<(&'a str, Span)> {
        match self.peek().kind {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((self.arena.alloc_str(name), span))
            }
            _ => self.error(expected),
        }
    }

    fn alloc(&self, expr: Expr<'a>) -> &'a Expr<'a> {
        self.arena.alloc(expr)
    }

    fn enter(&mut self, span: Span) -> CompileResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CompileError::Syntax {
                message: format!("expression nests deeper than {MAX_NESTING} levels"),
                span,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn count_operator(&mut self, span: Span) -> CompileResult<()> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(CompileError::Syntax {
                message: format!("expression has more than {MAX_OPERATORS} operators"),
                span,
            });
        }
        Ok(())
    }

    fn parse_stmt(&mut self) -> CompileResult<Stmt<'a>> {
        let start = self.peek();
        self.operators = 0;
        let (stmt, kind) = match start.kind {
            TokenKind::Ident(_) if self.peek_at(1).kind == TokenKind::Colon => {
                let (name, span) = self.expect_ident("label name")?;
                self.advance();
                (Stmt::Label { name, span }, "label")
            }
            TokenKind::Ident(_) => {
                let (name, span) = self.expect_ident("variable name")?;
                self.expect(TokenKind::Assign, "`=` or `:` after identifier")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;`")?;
                (Stmt::Assign { name, value, span }, "assign")
            }
            TokenKind::Let => {
                self.advance();
                let (name, _) = self.expect_ident("variable name after `let`")?;
                self.expect(TokenKind::Assign, "`=`")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;`")?;
                let span = start.span;
                (Stmt::Let { name, value, span }, "let")
            }
            TokenKind::Print => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;`")?;
                let span = start.span;
                (Stmt::Print { value, span }, "print")
            }
            TokenKind::Goto => {
                self.advance();
                let (label, _) = self.expect_ident("label after `goto`")?;
                self.expect(TokenKind::Semi, "`;`")?;
                let span = start.span;
                (Stmt::Goto { label, span }, "goto")
            }
            TokenKind::If => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Goto, "`goto`")?;
                let (label, _) = self.expect_ident("label after `goto`")?;
                self.expect(TokenKind::Semi, "`;`")?;
                let span = start.span;
                (Stmt::IfGoto { cond, label, span }, "if")
            }
            TokenKind::Exit => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;`")?;
                let span = start.span;
                (Stmt::Exit { value, span }, "exit")
            }
            _ => return self.error("statement"),
        };
        self.reduce("stmt", kind);
        Ok(stmt)
    }

    fn parse_expr(&mut self) -> CompileResult<&'a Expr<'a>> {
        let expr = self.parse_or()?;
        self.reduce("expr", "or");
        Ok(expr)
    }

    fn parse_or(&mut self) -> CompileResult<&'a Expr<'a>> {
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            let span = self.advance().span;
            let rhs = self.parse_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs, span)?;
        }
        self.reduce("or", "and");
        Ok(lhs)
    }

    fn parse_and(&mut self) -> CompileResult<&'a Expr<'a>> {
        let mut lhs = self.parse_cmp()?;
        while self.peek().kind == TokenKind::And {
            let span = self.advance().span;
            let rhs = self.parse_cmp()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs, span)?;
        }
        self.reduce("and", "cmp");
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> CompileResult<&'a Expr<'a>> {
        let lhs = self.parse_sum()?;
        let op = match self.peek().kind {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        };
        let expr = match op {
            Some(op) => {
                let span = self.advance().span;
                let rhs = self.parse_sum()?;
                self.binary(op, lhs, rhs, span)?
            }
            None => lhs,
        };
        self.reduce("cmp", "sum");
        Ok(expr)
    }

    fn parse_sum(&mut self) -> CompileResult<&'a Expr<'a>> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.advance().span;
            let rhs = self.parse_term()?;
            lhs = self.binary(op, lhs, rhs, span)?;
        }
        self.reduce("sum", "term");
        Ok(lhs)
    }

    fn parse_term(&mut self) -> CompileResult<&'a Expr<'a>> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            let span = self.advance().span;
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs, span)?;
        }
        self.reduce("term", "unary");
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> CompileResult<&'a Expr<'a>> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Not => UnaryOp::Not,
            _ => {
                let expr = self.parse_primary()?;
                self.reduce("unary", "primary");
                return Ok(expr);
            }
        };
        self.advance();

        // `-<literal>` is a literal, so i64::MIN is expressible.
        if let (UnaryOp::Neg, TokenKind::Int(value)) = (op, self.peek().kind) {
            self.advance();
            self.reduce("primary", "INT");
            self.reduce("unary", "primary");
            return Ok(self.alloc(Expr::Int((value as i64).wrapping_neg(), token.span)));
        }

        self.count_operator(token.span)?;
        self.enter(token.span)?;
        let operand = self.parse_unary()?;
        self.leave();
        self.reduce("unary", "unary");
        Ok(self.alloc(Expr::Unary {
            op,
            operand,
            span: token.span,
        }))
    }

    fn parse_primary(&mut self) -> CompileResult<&'a Expr<'a>> {
        let token = self.peek();
        let (expr, child) = match token.kind {
            TokenKind::Int(value) => {
                if value > i64::MAX as u64 {
                    return Err(CompileError::Syntax {
                        message: format!("integer literal `{}` is out of range", value),
                        span: token.span,
                    });
                }
                self.advance();
                (self.alloc(Expr::Int(value as i64, token.span)), "INT")
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                let value = token.kind == TokenKind::True;
                (self.alloc(Expr::Bool(value, token.span)), "BOOL")
            }
            TokenKind::Ident(_) => {
                let (name, span) = self.expect_ident("identifier")?;
                (self.alloc(Expr::Var(name, span)), "IDENT")
            }
            TokenKind::LParen => {
                self.advance();
                self.enter(token.span)?;
                let inner = self.parse_expr()?;
                self.leave();
                self.expect(TokenKind::RParen, "`)`")?;
                (inner, "expr")
            }
            _ => return self.error("expression"),
        };
        self.reduce("primary", child);
        Ok(expr)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
        span: Span,
    ) -> CompileResult<&'a Expr<'a>> {
        self.count_operator(span)?;
        Ok(self.alloc(Expr::Binary { op, lhs, rhs, span }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok<'a>(text: &str, arena: &'a Bump) -> Ast<'a> {
        let mut tap = GrammarTap::disabled();
        parse(text, arena, &mut tap).unwrap()
    }

    #[test]
    fn test_statement_forms() {
        let arena = Bump::new();
        let ast = parse_ok(
            "let n = 3;\ntop:\nprint n;\nn = n - 1;\nif n > 0 goto top;\ngoto end;\nend:\nexit 0;\n",
            &arena,
        );
        assert_eq!(ast.stmts.len(), 8);
        assert!(matches!(ast.stmts[0], Stmt::Let { name: "n", .. }));
        assert!(matches!(ast.stmts[1], Stmt::Label { name: "top", .. }));
        assert!(matches!(ast.stmts[3], Stmt::Assign { name: "n", .. }));
        assert!(matches!(ast.stmts[4], Stmt::IfGoto { label: "top", .. }));
        assert!(matches!(ast.stmts[5], Stmt::Goto { label: "end", .. }));
        assert_eq!(ast.stmts[7].span(), Span::new(8, 1));
    }

    #[test]
    fn test_precedence() {
        let arena = Bump::new();
        let ast = parse_ok("print 1 + 2 * 3 == 7 and not false;", &arena);
        let Stmt::Print { value, .. } = ast.stmts[0] else {
            panic!("expected print");
        };
        let Expr::Binary { op: BinaryOp::And, lhs, .. } = value else {
            panic!("expected `and` at the root, got {:?}", value);
        };
        let Expr::Binary { op: BinaryOp::Eq, lhs: sum, .. } = lhs else {
            panic!("expected `==`");
        };
        assert!(matches!(sum, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_negative_literals() {
        let arena = Bump::new();
        let ast = parse_ok("print -9223372036854775808; print -(4);", &arena);
        let Stmt::Print { value, .. } = ast.stmts[0] else {
            panic!("expected print");
        };
        assert_eq!(*value, Expr::Int(i64::MIN, Span::new(1, 7)));
        let Stmt::Print { value, .. } = ast.stmts[1] else {
            panic!("expected print");
        };
        assert!(matches!(value, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_out_of_range_positive_literal() {
        let arena = Bump::new();
        let mut tap = GrammarTap::disabled();
        assert!(parse("print 9223372036854775808;", &arena, &mut tap).is_err());
    }

    #[test]
    fn test_syntax_errors_carry_location() {
        let arena = Bump::new();
        let mut tap = GrammarTap::disabled();
        let err = parse("let x = 1;\nprint x\n", &arena, &mut tap).unwrap_err();
        assert_eq!(
            err.to_string(),
            "3:1: syntax error: expected `;`, found end of input"
        );
        let err = parse("goto 5;", &arena, &mut tap).unwrap_err();
        assert!(err.to_string().contains("expected label after `goto`"));
    }

    #[test]
    fn test_nesting_limit() {
        let arena = Bump::new();
        let mut tap = GrammarTap::disabled();

        let nested = |depth: usize| {
            format!("print {}1{};", "(".repeat(depth), ")".repeat(depth))
        };
        assert!(parse(&nested(MAX_NESTING), &arena, &mut tap).is_ok());
        let err = parse(&nested(200_000), &arena, &mut tap).unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
        assert!(err.to_string().contains("nests deeper than 128 levels"), "{err}");

        let negations = format!("print {}true;", "not ".repeat(MAX_NESTING + 1));
        assert!(parse(&negations, &arena, &mut tap).is_err());
    }

    #[test]
    fn test_operator_limit() {
        let arena = Bump::new();
        let mut tap = GrammarTap::disabled();
        let chain = |terms: usize| format!("print 1{};", " + 1".repeat(terms));
        assert!(parse(&chain(MAX_OPERATORS), &arena, &mut tap).is_ok());
        let err = parse(&chain(MAX_OPERATORS + 1), &arena, &mut tap).unwrap_err();
        assert!(err.to_string().contains("more than 1024 operators"), "{err}");
        // The budget is per statement.
        let two = format!("{}
{}", chain(MAX_OPERATORS), chain(MAX_OPERATORS));
        assert!(parse(&two, &arena, &mut tap).is_ok());
    }

    #[test]
    fn test_reductions_reach_the_tap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammar.dot");
        let arena = Bump::new();
        let mut tap = GrammarTap::init(&path, true);
        parse("exit 1;", &arena, &mut tap).unwrap();
        tap.finalize();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"primary-1\" -> \"INT-0\" [label=\"1\"];"));
        assert!(text.contains("\"unary-1\" -> \"primary-1\" [label=\"2\"];"));
        assert!(text.contains("\"stmt-1\" -> \"exit-0\""));
        assert!(text.trim_end().ends_with("\"program-1\" -> \"stmt-1\" [label=\"10\"];\n}"));
    }
}
