// This module gathers the infrastructure every phase of gotoc shares. config holds the
// validated settings for one run. error defines CompileError and the Span attached to
// diagnostics. patch_table implements the record/bind/finalize protocol for forward jumps,
// bounded by a configurable capacity. session owns the emission buffer and the
// CompilationContext that ties buffer, patch table, grammar tap and statistics to one
// compilation.

//! Core gotoc infrastructure.

pub mod config;
pub mod error;
pub mod patch_table;
pub mod session;

pub use config::{BackendStrategy, Config, OptLevel, VizConfig};
pub use error::{CompileError, CompileResult, Span};
pub use patch_table::{PatchTable, ResolveError};
pub use session::{CompilationContext, EmissionBuffer, SessionStats};
