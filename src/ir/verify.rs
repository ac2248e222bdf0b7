//! Structural checks on lowered programs.
//!
//! The native backend caches the top of the evaluation stack in a register,
//! which only works when every op is reached with one static stack depth.
//! [`stack_depths`] computes that depth and rejects programs that underflow,
//! disagree at a join point, jump out of range, or run off the end.

use crate::core::error::{CompileError, CompileResult};

use super::{Addr, Op, Program, PLACEHOLDER};

/// Stack depth on entry to every op; `None` for unreachable ops.
pub fn stack_depths(program: &Program) -> CompileResult<Vec<Option<u32>>> {
    let len = program.ops.len();
    let mut depths: Vec<Option<u32>> = vec![None; len];
    if len == 0 {
        return Err(CompileError::codegen("program has no operations"));
    }

    let mut worklist: Vec<(Addr, u32)> = vec![(0, 0)];
    while let Some((addr, depth)) = worklist.pop() {
        let idx = addr as usize;
        if idx >= len {
            return Err(CompileError::codegen(format!(
                "control reaches address {addr} past the end of the program"
            )));
        }
        match depths[idx] {
            Some(known) if known == depth => continue,
            Some(known) => {
                return Err(CompileError::codegen(format!(
                    "inconsistent stack depth at {addr:04}: {known} vs {depth}"
                )));
            }
            None => depths[idx] = Some(depth),
        }

        let op = program.ops[idx];
        if op.target() == Some(PLACEHOLDER) {
            return Err(CompileError::codegen(format!(
                "unpatched control transfer at {addr:04}"
            )));
        }
        let (pops, pushes) = op.stack_effect();
        if depth < pops {
            return Err(CompileError::codegen(format!(
                "stack underflow at {addr:04} ({})",
                op.mnemonic()
            )));
        }
        let next_depth = depth - pops + pushes;
        for succ in program.successors(addr) {
            worklist.push((succ, next_depth));
        }
    }

    Ok(depths)
}

/// Check the invariants every backend relies on.
pub fn verify(program: &Program) -> CompileResult<()> {
    if program.lines.len() != program.ops.len() {
        return Err(CompileError::codegen(format!(
            "line table has {} entries for {} ops",
            program.lines.len(),
            program.ops.len()
        )));
    }
    let slot_count = program.slots.len() as u32;
    for (addr, op) in program.ops.iter().enumerate() {
        if let Op::Load(slot) | Op::Store(slot) = op {
            if *slot >= slot_count {
                return Err(CompileError::codegen(format!(
                    "op {addr:04} uses unknown slot %{slot}"
                )));
            }
        }
    }
    stack_depths(program).map(|_| ())
}
