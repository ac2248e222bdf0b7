// This module defines the error types shared by every phase of gotoc using the thiserror
// crate. CompileError is the top-level enum the driver sees: configuration problems, I/O
// failures (with the offending path), syntax errors from the parser, semantic errors from
// the symbol table, label resolution errors from the patch table, and backend failures
// (instruction encoding, code generation, ELF writing, linking). Phase-specific enums
// (SemaError, ResolveError, EncodingError) convert into it with `?`. Span is the
// line/column pair attached to every diagnostic that has a source location.

//! Error types for the gotoc compiler.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use super::patch_table::ResolveError;
use crate::sema::SemaError;
use crate::x64::EncodingError;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Main error type for a compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{span}: syntax error: {message}")]
    Syntax { message: String, span: Span },

    #[error(transparent)]
    Sema(#[from] SemaError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Instruction encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Code generation failed: {reason}")]
    CodeGeneration { reason: String },

    #[error("Object file emission failed: {0}")]
    Object(#[from] object::write::Error),

    #[error("Link failed: {reason}")]
    Link { reason: String },
}

impl CompileError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn codegen(reason: impl Into<String>) -> Self {
        CompileError::CodeGeneration {
            reason: reason.into(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Config { .. } => 2,
            _ => 1,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
