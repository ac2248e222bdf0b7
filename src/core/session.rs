// This module provides the per-compilation context for gotoc. CompilationContext is the
// central hub that owns everything one run of the compiler mutates: the validated
// configuration (strategy, optimization level, debug and entry-point flags), the emission
// buffer the tree walker appends lowered operations to, the forward-reference patch table,
// the grammar visualization tap, and compilation statistics. The parse tree lives in a
// bumpalo arena borrowed by the context so every AST node shares the context lifetime.
// finalize() runs label resolution against the buffer and moves the result into an
// ir::Program for the dispatcher. There is no global state; several contexts may coexist.

//! Per-compilation state.

use bumpalo::Bump;
use std::fmt;
use std::mem;
use std::path::Path;

use super::config::{BackendStrategy, Config, OptLevel};
use super::error::{CompileResult, Span};
use super::patch_table::{PatchTable, ResolveError};
use crate::frontend::viz::GrammarTap;
use crate::ir::{Addr, LabelSymbol, Op, Program, SlotInfo, PLACEHOLDER};

/// Ordered sequence of lowered operations with an optional hard capacity.
#[derive(Debug, Clone, Default)]
pub struct EmissionBuffer {
    ops: Vec<Op>,
    lines: Vec<u32>,
    capacity: Option<usize>,
}

impl EmissionBuffer {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            ops: Vec::new(),
            lines: Vec::new(),
            capacity,
        }
    }

    /// Largest number of ops this buffer accepts.
    pub fn limit(&self) -> usize {
        // PLACEHOLDER is never a valid address.
        self.capacity.unwrap_or(PLACEHOLDER as usize)
    }

    /// Append `op`, returning the slot it was written to.
    pub fn emit(&mut self, op: Op, line: u32) -> Result<Addr, ResolveError> {
        let limit = self.limit();
        if self.ops.len() >= limit {
            return Err(ResolveError::BufferFull { capacity: limit });
        }
        let addr = self.pc();
        self.ops.push(op);
        self.lines.push(line);
        Ok(addr)
    }

    /// Address the next emitted op will occupy.
    pub fn pc(&self) -> Addr {
        self.ops.len() as Addr
    }

    pub fn get(&self, addr: Addr) -> Option<Op> {
        self.ops.get(addr as usize).copied()
    }

    /// Overwrite the target of the transfer at `slot`.
    pub fn patch(&mut self, slot: Addr, target: Addr) -> Result<(), ResolveError> {
        let patched = self
            .get(slot)
            .and_then(|op| op.with_target(target))
            .ok_or(ResolveError::InvalidPatchSlot { slot })?;
        self.ops[slot as usize] = patched;
        Ok(())
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn take(&mut self) -> (Vec<Op>, Vec<u32>) {
        (mem::take(&mut self.ops), mem::take(&mut self.lines))
    }
}

/// Compilation statistics, printed at debug log level.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Ops emitted by the tree walker.
    pub ops_emitted: usize,

    /// Transfers emitted with a placeholder target.
    pub forward_refs: usize,

    /// Transfers whose label was already bound.
    pub backward_refs: usize,

    pub labels_bound: usize,

    /// Ops left after optimization and compaction.
    pub ops_after_opt: usize,

    /// Machine code size for native strategies.
    pub code_size: usize,

    pub tap_edges: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Statistics:")?;
        writeln!(f, "  Ops emitted: {}", self.ops_emitted)?;
        writeln!(f, "  Labels bound: {}", self.labels_bound)?;
        writeln!(f, "  Forward references: {}", self.forward_refs)?;
        writeln!(f, "  Backward references: {}", self.backward_refs)?;
        writeln!(f, "  Ops after optimization: {}", self.ops_after_opt)?;
        if self.code_size > 0 {
            writeln!(f, "  Machine code size: {} bytes", self.code_size)?;
        }
        if self.tap_edges > 0 {
            writeln!(f, "  Grammar edges recorded: {}", self.tap_edges)?;
        }
        Ok(())
    }
}

/// State of one compilation, from configuration to artifact.
///
/// The parse tree is allocated in `arena`; everything else is owned here and
/// released when the context drops, including any open visualization output.
pub struct CompilationContext<'arena> {
    arena: &'arena Bump,
    config: Config,
    buffer: EmissionBuffer,
    patches: PatchTable,
    tap: GrammarTap,
    stats: SessionStats,
}

impl<'arena> CompilationContext<'arena> {
    /// Build a context from `config`. The configuration is validated first.
    pub fn new(config: Config, arena: &'arena Bump) -> CompileResult<Self> {
        config.validate()?;
        let tap = match &config.viz {
            Some(viz) => GrammarTap::init(&viz.path, viz.sequenced),
            None => GrammarTap::disabled(),
        };
        log::debug!(
            "context: strategy={}, opt={}, debug={}, stack_based={}",
            config.strategy,
            config.opt_level,
            config.debug_info,
            config.stack_based
        );
        Ok(Self {
            arena,
            buffer: EmissionBuffer::new(config.max_ops),
            patches: PatchTable::new(config.max_forward_refs),
            tap,
            stats: SessionStats::default(),
            config,
        })
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn input(&self) -> &Path {
        &self.config.input
    }

    pub fn output(&self) -> Option<&Path> {
        self.config.output.as_deref()
    }

    pub fn strategy(&self) -> BackendStrategy {
        self.config.strategy
    }

    pub fn opt_level(&self) -> OptLevel {
        self.config.opt_level
    }

    pub fn debug_info(&self) -> bool {
        self.config.debug_info
    }

    pub fn emit_entry_point(&self) -> bool {
        self.config.emit_entry_point
    }

    pub fn stack_based(&self) -> bool {
        self.config.stack_based
    }

    /// Program counter: the address of the next emitted op.
    pub fn pc(&self) -> Addr {
        self.buffer.pc()
    }

    pub fn buffer(&self) -> &EmissionBuffer {
        &self.buffer
    }

    pub fn tap_mut(&mut self) -> &mut GrammarTap {
        &mut self.tap
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Append `op` to the emission buffer.
    pub fn emit(&mut self, op: Op, span: Span) -> CompileResult<Addr> {
        let addr = self.buffer.emit(op, span.line)?;
        self.stats.ops_emitted += 1;
        log::trace!("{:04}: {:?}", addr, op);
        Ok(addr)
    }

    /// Bind `label` to the current program counter.
    pub fn bind_label(&mut self, label: &str, span: Span) -> CompileResult<Addr> {
        let addr = self.pc();
        self.patches.bind_label(label, addr, span)?;
        self.stats.labels_bound += 1;
        Ok(addr)
    }

    /// Emit a transfer to `label` built by `make`.
    ///
    /// A bound label yields its address directly; otherwise the transfer gets
    /// a placeholder target and a pending patch record.
    pub fn emit_transfer(
        &mut self,
        make: fn(Addr) -> Op,
        label: &str,
        span: Span,
    ) -> CompileResult<Addr> {
        match self.patches.lookup(label) {
            Some(target) => {
                self.stats.backward_refs += 1;
                self.emit(make(target), span)
            }
            None => {
                let slot = self.emit(make(PLACEHOLDER), span)?;
                self.patches.record_reference(slot, label, span)?;
                self.stats.forward_refs += 1;
                Ok(slot)
            }
        }
    }

    /// Resolve every forward reference and move the buffer into a program.
    pub fn finalize(&mut self, slots: Vec<SlotInfo>) -> CompileResult<Program> {
        let resolved = self.patches.finalize(&mut self.buffer)?;
        log::debug!(
            "finalized {} ops ({} forward references patched)",
            self.buffer.len(),
            resolved
        );
        let labels = self
            .patches
            .bound_labels()
            .map(|(name, addr)| LabelSymbol {
                name: name.to_string(),
                addr,
            })
            .collect();
        let (ops, lines) = self.buffer.take();
        Ok(Program {
            ops,
            lines,
            slots,
            labels,
        })
    }
}
