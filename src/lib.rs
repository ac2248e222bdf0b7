//! gotoc - a single-pass compiler for a small goto language.
//!
//! Source text is parsed into an arena-allocated tree, lowered in one walk
//! into a stack-oriented intermediate form (forward jumps are backpatched
//! through a bounded patch table), optionally optimized, and handed to one
//! of five backends.
//!
//! # Primary Usage
//!
//! ```no_run
//! use gotoc::core::config::{BackendStrategy, Config};
//!
//! let config = Config::new("hello.gt")
//!     .with_strategy(BackendStrategy::Assembly)
//!     .with_output("hello.s");
//! let result = gotoc::driver::compile_file(config)?;
//! println!("{}", result.stats);
//! # Ok::<(), gotoc::core::error::CompileError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`] - configuration, errors, patch table and compilation context
//! - [`frontend`] - lexer, parser, parse tree and grammar visualization
//! - [`sema`] - symbol table and type rules
//! - [`lower`] - tree walker producing [`ir::Program`]
//! - [`ir`] - operations, verification and the textual IR printer
//! - [`opt`] - constant folding, jump threading and dead code removal
//! - [`vm`] - reference interpreter
//! - [`x64`] - x86-64 code generation and assembly text
//! - [`emit`] - strategy dispatch, ELF objects, linking and JIT execution

pub mod cli;
pub mod core;
pub mod driver;
pub mod emit;
pub mod frontend;
pub mod ir;
pub mod lower;
pub mod opt;
pub mod sema;
pub mod vm;
pub mod x64;

pub use crate::core::config::{BackendStrategy, Config, OptLevel};
pub use crate::core::error::{CompileError, CompileResult};
pub use driver::{compile_file, compile_source, Compilation};
pub use emit::Outcome;
