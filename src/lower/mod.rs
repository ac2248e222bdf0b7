//! Lowering from the parse tree to [`crate::ir::Program`].

pub mod walker;

pub use walker::lower;
