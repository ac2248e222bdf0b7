//! Tokenizer for goto-language source text.

use crate::core::error::{CompileError, CompileResult, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'s> {
    /// Unsigned literal; the parser applies the sign.
    Int(u64),
    Ident(&'s str),
    Let,
    Print,
    Goto,
    If,
    Exit,
    True,
    False,
    And,
    Or,
    Not,
    Colon,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl TokenKind<'_> {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(value) => format!("integer `{}`", value),
            TokenKind::Ident(name) => format!("identifier `{}`", name),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("`{}`", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            TokenKind::Let => "let",
            TokenKind::Print => "print",
            TokenKind::Goto => "goto",
            TokenKind::If => "if",
            TokenKind::Exit => "exit",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Colon => ":",
            TokenKind::Semi => ";",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Int(_) | TokenKind::Ident(_) | TokenKind::Eof => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'s> {
    pub kind: TokenKind<'s>,
    pub span: Span,
}

struct Lexer<'s> {
    text: &'s str,
    pos: usize,
    line: u32,
    col: u32,
}

/// Split `text` into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(text: &str) -> CompileResult<Vec<Token<'_>>> {
    let mut lexer = Lexer {
        text,
        pos: 0,
        line: 1,
        col: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'s> Lexer<'s> {
    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.text.as_bytes().get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => self.bump(),
                b'#' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> CompileResult<Token<'s>> {
        self.skip_whitespace();
        let span = Span::new(self.line, self.col);
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span,
            });
        };

        let kind = if c.is_ascii_digit() {
            self.lex_int(span)?
        } else if c.is_ascii_alphabetic() || c == b'_' {
            self.lex_word()
        } else {
            let two = |kind| (kind, 2);
            let one = |kind| (kind, 1);
            let (kind, len) = match (c, self.peek_at(1)) {
                (b'=', Some(b'=')) => two(TokenKind::EqEq),
                (b'!', Some(b'=')) => two(TokenKind::NotEq),
                (b'<', Some(b'=')) => two(TokenKind::Le),
                (b'>', Some(b'=')) => two(TokenKind::Ge),
                (b'=', _) => one(TokenKind::Assign),
                (b'<', _) => one(TokenKind::Lt),
                (b'>', _) => one(TokenKind::Gt),
                (b':', _) => one(TokenKind::Colon),
                (b';', _) => one(TokenKind::Semi),
                (b'+', _) => one(TokenKind::Plus),
                (b'-', _) => one(TokenKind::Minus),
                (b'*', _) => one(TokenKind::Star),
                (b'/', _) => one(TokenKind::Slash),
                (b'%', _) => one(TokenKind::Percent),
                (b'(', _) => one(TokenKind::LParen),
                (b')', _) => one(TokenKind::RParen),
                _ => {
                    let ch = self.text[self.pos..].chars().next().unwrap_or('?');
                    return Err(CompileError::Syntax {
                        message: format!("unexpected character `{}`", ch),
                        span,
                    });
                }
            };
            for _ in 0..len {
                self.bump();
            }
            kind
        };
        Ok(Token { kind, span })
    }

    fn lex_int(&mut self, span: Span) -> CompileResult<TokenKind<'s>> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.text[start..self.pos];
        digits
            .parse::<u64>()
            .ok()
            .filter(|value| *value <= i64::MAX as u64 + 1)
            .map(TokenKind::Int)
            .ok_or_else(|| CompileError::Syntax {
                message: format!("integer literal `{}` is out of range", digits),
                span,
            })
    }

    fn lex_word(&mut self) -> TokenKind<'s> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.bump();
        }
        match &self.text[start..self.pos] {
            "let" => TokenKind::Let,
            "print" => TokenKind::Print,
            "goto" => TokenKind::Goto,
            "if" => TokenKind::If,
            "exit" => TokenKind::Exit,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            word => TokenKind::Ident(word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind<'_>> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_statement_tokens() {
        assert_eq!(
            kinds("let x = 10; # comment\nif x >= 3 goto done;"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("x"),
                TokenKind::Assign,
                TokenKind::Int(10),
                TokenKind::Semi,
                TokenKind::If,
                TokenKind::Ident("x"),
                TokenKind::Ge,
                TokenKind::Int(3),
                TokenKind::Goto,
                TokenKind::Ident("done"),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_track_lines_and_columns() {
        let tokens = tokenize("a:\n  print a;").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[2].span, Span::new(2, 3));
        assert_eq!(tokens[3].span, Span::new(2, 9));
    }

    #[test]
    fn test_min_magnitude_literal_is_accepted() {
        assert_eq!(
            kinds("9223372036854775808")[0],
            TokenKind::Int(9223372036854775808)
        );
        assert!(tokenize("9223372036854775809").is_err());
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("let x = 1 $ 2;").unwrap_err();
        assert_eq!(err.to_string(), "1:11: syntax error: unexpected character `$`");
    }
}
