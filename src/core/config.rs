//! Resolved compiler configuration.
//!
//! A [`Config`] is the finished product of the command line step. It is
//! validated once and then handed to
//! [`CompilationContext::new`](super::session::CompilationContext::new);
//! nothing in it changes for the rest of the compilation.

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{CompileError, CompileResult};

/// Longest path accepted for any input or output file.
pub const MAX_PATH_LEN: usize = 4096;

/// Default bound on outstanding forward references.
pub const DEFAULT_MAX_FORWARD_REFS: usize = 4096;

/// Output form produced by the emission dispatcher.
///
/// Exactly one strategy is active per compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendStrategy {
    /// Textual intermediate representation.
    TextualIr,
    /// x86-64 assembly text (GNU as syntax).
    Assembly,
    /// ELF64 relocatable object.
    Object,
    /// Linked native executable.
    Executable,
    /// Run the program in-process.
    #[default]
    Jit,
}

impl BackendStrategy {
    pub fn description(self) -> &'static str {
        match self {
            BackendStrategy::TextualIr => "textual IR",
            BackendStrategy::Assembly => "x86-64 assembly",
            BackendStrategy::Object => "ELF object",
            BackendStrategy::Executable => "executable",
            BackendStrategy::Jit => "JIT execution",
        }
    }
}

impl fmt::Display for BackendStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Optimization level, ordered from `None` to `O3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptLevel {
    /// No optimization; also the debug-friendly baseline.
    #[default]
    None,
    O1,
    O2,
    O3,
}

impl OptLevel {
    /// Map a numeric level (`0..=3`) to an [`OptLevel`].
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(OptLevel::None),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            3 => Some(OptLevel::O3),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            OptLevel::None => 0,
            OptLevel::O1 => 1,
            OptLevel::O2 => 2,
            OptLevel::O3 => 3,
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptLevel::None => f.write_str("none"),
            other => write!(f, "O{}", other.level()),
        }
    }
}

/// Grammar visualization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VizConfig {
    pub path: PathBuf,
    /// Suffix node names with per-name sequence numbers.
    pub sequenced: bool,
}

/// Fully resolved configuration for one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Source file to compile.
    pub input: PathBuf,
    /// Artifact destination; `None` writes to standard output.
    pub output: Option<PathBuf>,
    pub strategy: BackendStrategy,
    pub opt_level: OptLevel,
    /// Keep per-op line info and emit label symbols.
    pub debug_info: bool,
    /// Emit an `_start` entry stub next to `main`.
    pub emit_entry_point: bool,
    /// Evaluate expressions purely on the machine stack.
    pub stack_based: bool,
    pub viz: Option<VizConfig>,
    pub max_forward_refs: usize,
    /// Hard cap on emitted operations; `None` means growable.
    pub max_ops: Option<usize>,
}

impl Config {
    /// Configuration with every setting at its default.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            strategy: BackendStrategy::default(),
            opt_level: OptLevel::default(),
            debug_info: false,
            emit_entry_point: false,
            stack_based: false,
            viz: None,
            max_forward_refs: DEFAULT_MAX_FORWARD_REFS,
            max_ops: None,
        }
    }

    pub fn with_strategy(mut self, strategy: BackendStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Reject settings that cannot be honoured before any work starts.
    pub fn validate(&self) -> CompileResult<()> {
        check_path("input", &self.input)?;
        if let Some(output) = &self.output {
            check_path("output", output)?;
            if output.as_os_str().is_empty() {
                return Err(CompileError::Config {
                    reason: "output path is empty".to_string(),
                });
            }
        }
        if let Some(viz) = &self.viz {
            check_path("visualization", &viz.path)?;
        }
        if self.max_forward_refs == 0 {
            return Err(CompileError::Config {
                reason: "forward reference capacity must be at least 1".to_string(),
            });
        }
        if self.max_ops == Some(0) {
            return Err(CompileError::Config {
                reason: "emission buffer capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn check_path(what: &str, path: &Path) -> CompileResult<()> {
    let len = path.as_os_str().len();
    if len > MAX_PATH_LEN {
        return Err(CompileError::Config {
            reason: format!("{what} path is too long ({len} bytes, limit {MAX_PATH_LEN})"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_jit_without_optimization() {
        let config = Config::new("prog.gt");
        assert_eq!(config.strategy, BackendStrategy::Jit);
        assert_eq!(config.opt_level, OptLevel::None);
        assert!(config.output.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn opt_levels_are_ordered() {
        assert!(OptLevel::None < OptLevel::O1);
        assert!(OptLevel::O2 < OptLevel::O3);
        assert_eq!(OptLevel::from_level(2), Some(OptLevel::O2));
        assert_eq!(OptLevel::from_level(4), None);
        assert_eq!(OptLevel::O3.to_string(), "O3");
    }

    #[test]
    fn overlong_paths_are_configuration_errors() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        let err = Config::new(long).validate().unwrap_err();
        assert!(matches!(err, CompileError::Config { .. }));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let mut config = Config::new("prog.gt");
        config.max_forward_refs = 0;
        assert!(config.validate().is_err());
    }
}
