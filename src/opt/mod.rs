// This module implements the optimization levels for lowered programs. Every pass works in
// place on the op vector and never shifts addresses: an op that disappears is overwritten
// with Nop, and a single compaction step at the end drops the Nops and renumbers jump
// targets, the line table and label symbols. Constant folding never merges ops across a
// jump target, because control entering in the middle of a folded window would see a
// different stack. O1 folds constants, O2 adds jump threading and unreachable-code removal,
// and O3 also drops jumps to the next live op and repeats everything until nothing changes.

//! Optimization passes over [`Program`].

use std::fmt;

use crate::core::config::OptLevel;
use crate::ir::{Addr, Op, Program};

/// What the passes changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptStats {
    pub folded: usize,
    pub threaded: usize,
    pub unreachable: usize,
    pub jumps_removed: usize,
    /// Ops dropped by compaction.
    pub removed: usize,
}

impl OptStats {
    /// Number of rewrites, not counting compaction.
    pub fn changed(&self) -> usize {
        self.folded + self.threaded + self.unreachable + self.jumps_removed
    }
}

impl fmt::Display for OptStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "folded {}, threaded {}, unreachable {}, jumps removed {}, ops removed {}",
            self.folded, self.threaded, self.unreachable, self.jumps_removed, self.removed
        )
    }
}

/// Run the passes enabled at `level` and compact the result.
pub fn optimize(program: &mut Program, level: OptLevel) -> OptStats {
    let mut stats = OptStats::default();
    if level == OptLevel::None {
        return stats;
    }

    loop {
        let before = stats.changed();
        stats.folded += fold_constants(&mut program.ops);
        if level >= OptLevel::O2 {
            stats.threaded += thread_jumps(&mut program.ops);
            stats.unreachable += remove_unreachable(&mut program.ops);
        }
        if level >= OptLevel::O3 {
            stats.jumps_removed += remove_jumps_to_next(&mut program.ops);
        }
        if level < OptLevel::O3 || stats.changed() == before {
            break;
        }
    }

    stats.removed = compact(program);
    log::debug!("optimizer ({}): {}", level, stats);
    stats
}

/// Index of the first non-Nop op at or after `from`.
fn next_live(ops: &[Op], from: usize) -> Option<usize> {
    (from..ops.len()).find(|&idx| ops[idx] != Op::Nop)
}

fn target_flags(ops: &[Op]) -> Vec<bool> {
    let mut flags = vec![false; ops.len() + 1];
    for op in ops {
        if let Some(flag) = op.target().and_then(|t| flags.get_mut(t as usize)) {
            *flag = true;
        }
    }
    flags
}

fn fold_unary(op: Op, value: i64) -> Option<i64> {
    match op {
        Op::Neg => Some(value.wrapping_neg()),
        Op::Not => Some((value == 0) as i64),
        _ => None,
    }
}

fn fold_binary(op: Op, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        Op::Add => Some(lhs.wrapping_add(rhs)),
        Op::Sub => Some(lhs.wrapping_sub(rhs)),
        Op::Mul => Some(lhs.wrapping_mul(rhs)),
        // A zero divisor traps at run time.
        Op::Div if rhs != 0 => Some(lhs.wrapping_div(rhs)),
        Op::Rem if rhs != 0 => Some(lhs.wrapping_rem(rhs)),
        Op::And => Some((lhs != 0 && rhs != 0) as i64),
        Op::Or => Some((lhs != 0 || rhs != 0) as i64),
        Op::Cmp(cond) => Some(cond.eval(lhs, rhs) as i64),
        _ => None,
    }
}

/// Fold `push; unary`, `push; push; binary` and `push; jmp.if` windows.
pub fn fold_constants(ops: &mut [Op]) -> usize {
    let mut folded = 0;
    let mut changed = true;
    while changed {
        changed = false;
        let targets = target_flags(ops);
        // True when no op in (first, last] can be entered by a jump.
        let sealed = |first: usize, last: usize| !targets[first + 1..=last].iter().any(|&t| t);

        for i in 0..ops.len() {
            let Op::Push(a) = ops[i] else { continue };
            let Some(j) = next_live(ops, i + 1) else { continue };

            if let Some(value) = fold_unary(ops[j], a) {
                if sealed(i, j) {
                    ops[i] = Op::Push(value);
                    ops[j] = Op::Nop;
                    folded += 1;
                    changed = true;
                }
                continue;
            }

            if let Op::JumpIfTrue(target) = ops[j] {
                if sealed(i, j) {
                    ops[i] = if a != 0 { Op::Jump(target) } else { Op::Nop };
                    ops[j] = Op::Nop;
                    folded += 1;
                    changed = true;
                }
                continue;
            }

            let Op::Push(b) = ops[j] else { continue };
            let Some(k) = next_live(ops, j + 1) else { continue };
            if let Some(value) = fold_binary(ops[k], a, b) {
                if sealed(i, k) {
                    ops[i] = Op::Push(value);
                    ops[j] = Op::Nop;
                    ops[k] = Op::Nop;
                    folded += 1;
                    changed = true;
                }
            }
        }
    }
    folded
}

/// Final destination of a transfer to `target`, skipping Nops and plain jumps.
fn resolve_target(ops: &[Op], target: Addr) -> Addr {
    let mut current = target as usize;
    // Bounded so a jump cycle cannot hang the compiler.
    for _ in 0..=ops.len() {
        let Some(live) = next_live(ops, current) else {
            break;
        };
        match ops[live] {
            Op::Jump(next) if next as usize != live => current = next as usize,
            _ => return live as Addr,
        }
    }
    target
}

/// Retarget transfers whose destination is another jump.
pub fn thread_jumps(ops: &mut [Op]) -> usize {
    let mut threaded = 0;
    for i in 0..ops.len() {
        let Some(target) = ops[i].target() else { continue };
        let resolved = resolve_target(ops, target);
        let live_target = next_live(ops, target as usize).map(|t| t as Addr);
        if resolved != target && Some(resolved) != live_target {
            if let Some(op) = ops[i].with_target(resolved) {
                ops[i] = op;
                threaded += 1;
            }
        }
    }
    threaded
}

/// Replace ops no path from the entry reaches with Nop.
pub fn remove_unreachable(ops: &mut [Op]) -> usize {
    let mut reachable = vec![false; ops.len()];
    let mut worklist = vec![0usize];
    while let Some(idx) = worklist.pop() {
        if idx >= ops.len() || reachable[idx] {
            continue;
        }
        reachable[idx] = true;
        let op = ops[idx];
        if let Some(target) = op.target() {
            worklist.push(target as usize);
        }
        if !op.is_terminator() {
            worklist.push(idx + 1);
        }
    }

    let mut removed = 0;
    for (op, live) in ops.iter_mut().zip(reachable) {
        if !live && *op != Op::Nop {
            *op = Op::Nop;
            removed += 1;
        }
    }
    removed
}

/// Drop unconditional jumps whose destination is the next live op.
pub fn remove_jumps_to_next(ops: &mut [Op]) -> usize {
    let mut removed = 0;
    for i in 0..ops.len() {
        let Op::Jump(target) = ops[i] else { continue };
        let next = next_live(ops, i + 1);
        if next.is_some() && next == next_live(ops, target as usize) {
            ops[i] = Op::Nop;
            removed += 1;
        }
    }
    removed
}

/// Remove Nops and renumber targets, lines and labels. Returns the number of ops removed.
pub fn compact(program: &mut Program) -> usize {
    let len = program.ops.len();
    let mut new_addr = Vec::with_capacity(len + 1);
    let mut kept = 0 as Addr;
    for op in &program.ops {
        new_addr.push(kept);
        if *op != Op::Nop {
            kept += 1;
        }
    }
    new_addr.push(kept);

    let remap = |addr: Addr| new_addr.get(addr as usize).copied().unwrap_or(kept);
    let mut ops = Vec::with_capacity(kept as usize);
    let mut lines = Vec::with_capacity(kept as usize);
    for (op, line) in program.ops.iter().zip(&program.lines) {
        if *op == Op::Nop {
            continue;
        }
        let op = match op.target() {
            Some(target) => op.with_target(remap(target)).unwrap_or(*op),
            None => *op,
        };
        ops.push(op);
        lines.push(*line);
    }
    for label in &mut program.labels {
        label.addr = remap(label.addr);
    }

    program.ops = ops;
    program.lines = lines;
    len - kept as usize
}
