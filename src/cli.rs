//! Command-line interface for gotoc.

use clap::{ArgAction, ArgGroup, Parser};
use std::path::PathBuf;

use crate::core::config::{
    BackendStrategy, Config, OptLevel, VizConfig, DEFAULT_MAX_FORWARD_REFS,
};
use crate::core::error::{CompileError, CompileResult};

/// gotoc - compile goto programs to IR, assembly, objects or executables, or run them
#[derive(Parser, Debug)]
#[command(name = "gotoc")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("strategy")
        .args(["emit_ir", "emit_asm", "emit_obj", "emit_exe", "jit"])
        .multiple(false)
))]
pub struct Cli {
    /// Source file to compile
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Write the artifact here instead of standard output
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Emit the textual intermediate representation
    #[arg(long)]
    pub emit_ir: bool,

    /// Emit x86-64 assembly (GNU as, AT&T syntax)
    #[arg(long)]
    pub emit_asm: bool,

    /// Emit an ELF64 relocatable object
    #[arg(long)]
    pub emit_obj: bool,

    /// Link a native executable
    #[arg(long)]
    pub emit_exe: bool,

    /// Run the program in-process (default)
    #[arg(long)]
    pub jit: bool,

    /// Optimization level 1, 2 or 3; a bare --opt means 2
    #[arg(
        long,
        value_name = "LEVEL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "2",
        value_parser = clap::value_parser!(u8).range(1..=3)
    )]
    pub opt: Option<u8>,

    /// Keep source lines and labels in the output
    #[arg(short = 'g', long)]
    pub debug: bool,

    /// Emit an _start entry point that exits with main's result
    #[arg(long)]
    pub entry_point: bool,

    /// Keep every intermediate value on the machine stack
    #[arg(long)]
    pub stack_based: bool,

    /// Write the grammar reductions as a Graphviz digraph
    #[arg(long, value_name = "PATH")]
    pub viz: Option<PathBuf>,

    /// Use raw nonterminal names in the digraph
    #[arg(long, requires = "viz")]
    pub viz_unsequenced: bool,

    /// Maximum number of unresolved forward jumps
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_FORWARD_REFS)]
    pub max_forward_refs: usize,

    /// Maximum number of emitted operations
    #[arg(long, value_name = "N")]
    pub max_ops: Option<usize>,

    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The selected backend strategy; JIT when no flag was given.
    pub fn strategy(&self) -> BackendStrategy {
        if self.emit_ir {
            BackendStrategy::TextualIr
        } else if self.emit_asm {
            BackendStrategy::Assembly
        } else if self.emit_obj {
            BackendStrategy::Object
        } else if self.emit_exe {
            BackendStrategy::Executable
        } else {
            BackendStrategy::Jit
        }
    }

    /// Log level selected by `-v`; `None` defers to `RUST_LOG`.
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        match self.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Info),
            2 => Some(log::LevelFilter::Debug),
            _ => Some(log::LevelFilter::Trace),
        }
    }

    /// Build and validate the compiler configuration.
    pub fn into_config(self) -> CompileResult<Config> {
        let strategy = self.strategy();
        let opt_level = match self.opt {
            None => OptLevel::None,
            Some(level) => OptLevel::from_level(level).ok_or_else(|| CompileError::Config {
                reason: format!("unknown optimization level {level}"),
            })?,
        };
        let config = Config {
            input: self.input,
            output: self.output,
            strategy,
            opt_level,
            debug_info: self.debug,
            emit_entry_point: self.entry_point,
            stack_based: self.stack_based,
            viz: self.viz.map(|path| VizConfig {
                path,
                sequenced: !self.viz_unsequenced,
            }),
            max_forward_refs: self.max_forward_refs,
            max_ops: self.max_ops,
        };
        config.validate()?;
        Ok(config)
    }
}
