// The driver owns the end-to-end pipeline for one source file: read the source, create the
// parse-tree arena and the CompilationContext, parse with the context's grammar tap, close
// the tap, lower the tree into a resolved Program, and hand the Program to the emission
// dispatcher. Any error aborts before an artifact is written. The arena and the context
// are created here and dropped at the end of the run; nothing is global, so several
// compilations may run in one process.

//! End-to-end compilation pipeline.

use bumpalo::Bump;

use crate::core::config::Config;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::{CompilationContext, SessionStats};
use crate::emit::{self, Outcome};
use crate::frontend;
use crate::ir::Program;
use crate::lower;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub outcome: Outcome,
    pub stats: SessionStats,
}

/// Compile the file named by `config.input`.
pub fn compile_file(config: Config) -> CompileResult<Compilation> {
    config.validate()?;
    let source = std::fs::read_to_string(&config.input)
        .map_err(|e| CompileError::io(&config.input, e))?;
    compile_source(config, &source)
}

/// Compile `source`; `config.input` is only used for naming.
pub fn compile_source(config: Config, source: &str) -> CompileResult<Compilation> {
    let arena = Bump::new();
    let mut ctx = CompilationContext::new(config, &arena)?;
    let mut program = build_program(&mut ctx, source)?;
    let outcome = emit::dispatch(&mut ctx, &mut program)?;
    log::debug!("{}", ctx.stats());
    Ok(Compilation {
        outcome,
        stats: ctx.stats().clone(),
    })
}

/// Parse and lower `source` into a resolved, unoptimized program.
pub fn build_program(ctx: &mut CompilationContext<'_>, source: &str) -> CompileResult<Program> {
    log::debug!("compiling {}", ctx.input().display());
    let arena = ctx.arena();
    let parsed = frontend::parse(source, arena, ctx.tap_mut());
    let tap = ctx.tap_mut();
    tap.finalize();
    let edges = tap.steps() as usize;
    ctx.stats_mut().tap_edges = edges;
    let ast = parsed?;
    log::trace!("parsed {} statements", ast.stmts.len());
    lower::lower(&ast, ctx)
}
