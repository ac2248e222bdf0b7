// This module is the single place where the backend strategy is acted on. dispatch() runs
// after the context has been finalized into a Program: it applies the configured
// optimization level, re-verifies stack discipline, and then matches exhaustively on
// BackendStrategy. Ahead-of-time strategies render their artifact fully in memory and hand
// it to artifact::write_artifact, which either replaces the destination file atomically or
// writes standard output in one call. The JIT strategy runs the program and reports its
// exit status instead. No strategy touches the filesystem before its artifact is complete.

//! Target emission dispatcher.

pub mod artifact;
pub mod jit;
pub mod link;
pub mod object;

use std::path::{Path, PathBuf};

use crate::core::config::BackendStrategy;
use crate::core::error::CompileResult;
use crate::core::session::CompilationContext;
use crate::ir::{self, Program};
use crate::opt;
use crate::x64::{self, asm_text, CodegenOptions, MachineCode};

pub use artifact::write_artifact;

/// What a compilation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// An artifact was written; `path` is `None` for standard output.
    Artifact { path: Option<PathBuf>, size: usize },
    /// The program ran in-process and exited with `status`.
    Executed { status: i64 },
}

impl Outcome {
    /// Process exit code the driver should report.
    ///
    /// Like a real process exit, only the low 8 bits of a status survive.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Artifact { .. } => 0,
            Outcome::Executed { status } => (*status & 0xff) as i32,
        }
    }
}

/// Optimize, verify and emit `program` with the strategy configured in `ctx`.
pub fn dispatch(ctx: &mut CompilationContext<'_>, program: &mut Program) -> CompileResult<Outcome> {
    let opt_stats = opt::optimize(program, ctx.opt_level());
    if opt_stats.changed() > 0 {
        log::debug!("{} at {}", opt_stats, ctx.opt_level());
    }
    ctx.stats_mut().ops_after_opt = program.len();
    ir::verify(program)?;

    let strategy = ctx.strategy();
    let debug = ctx.debug_info();
    log::debug!("emitting {}", strategy);

    let rendered = match strategy {
        BackendStrategy::TextualIr => ir::print::print(program, debug).into_bytes(),
        BackendStrategy::Assembly => {
            let code = generate(ctx, program)?;
            asm_text::render(&code, debug).into_bytes()
        }
        BackendStrategy::Object => {
            let code = generate(ctx, program)?;
            object::build_object(&code, debug, source_name(ctx.input()).as_deref())?
        }
        BackendStrategy::Executable => {
            let code = generate(ctx, program)?;
            let obj = object::build_object(&code, debug, source_name(ctx.input()).as_deref())?;
            link::link_executable(&obj, ctx.emit_entry_point())?
        }
        BackendStrategy::Jit => {
            let status = jit::run(program, ctx.stack_based())?;
            return Ok(Outcome::Executed { status });
        }
    };

    let path = ctx.output().map(Path::to_path_buf);
    write_artifact(
        path.as_deref(),
        &rendered,
        strategy == BackendStrategy::Executable,
    )?;
    Ok(Outcome::Artifact {
        path,
        size: rendered.len(),
    })
}

fn generate(ctx: &mut CompilationContext<'_>, program: &Program) -> CompileResult<MachineCode> {
    let options = CodegenOptions {
        stack_based: ctx.stack_based(),
        entry_point: ctx.emit_entry_point(),
    };
    let code = x64::compile(program, options)?;
    ctx.stats_mut().code_size = code.bytes.len();
    Ok(code)
}

fn source_name(input: &Path) -> Option<String> {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_truncates_status() {
        assert_eq!(Outcome::Executed { status: 7 }.exit_code(), 7);
        assert_eq!(Outcome::Executed { status: 256 }.exit_code(), 0);
        assert_eq!(Outcome::Executed { status: -1 }.exit_code(), 255);
        assert_eq!(Outcome::Executed { status: 101 }.exit_code(), 101);
        let artifact = Outcome::Artifact {
            path: None,
            size: 10,
        };
        assert_eq!(artifact.exit_code(), 0);
    }
}
