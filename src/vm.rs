//! Reference execution engine.
//!
//! Interprets a verified [`Program`] with the same observable behavior as
//! the native backend: wrapping 64-bit arithmetic, `print` to `out`, the
//! division trap message to `err` with status 101. Used by the JIT strategy
//! on hosts without the x86-64 backend and throughout the test suite.

use std::io::Write;

use crate::core::error::{CompileError, CompileResult};
use crate::ir::{Op, Program, DIVISION_TRAP_MESSAGE, TRAP_EXIT_STATUS};

/// Run `program` to completion and return its exit status.
pub fn run<W: Write, E: Write>(program: &Program, out: &mut W, err: &mut E) -> CompileResult<i64> {
    let mut slots = vec![0i64; program.slots.len()];
    let mut stack: Vec<i64> = Vec::with_capacity(16);
    let mut pc = 0usize;

    let status = loop {
        let Some(&op) = program.ops.get(pc) else {
            return Err(CompileError::codegen(format!(
                "execution ran past the end of the program at {pc:04}"
            )));
        };
        log::trace!("vm {:04}: {:?} {:?}", pc, op, stack);
        pc += 1;

        match op {
            Op::Push(value) => stack.push(value),
            Op::Load(slot) => stack.push(slot_value(&slots, slot)?),
            Op::Store(slot) => {
                let value = pop(&mut stack)?;
                let cell = slots
                    .get_mut(slot as usize)
                    .ok_or_else(|| CompileError::codegen(format!("unknown slot %{slot}")))?;
                *cell = value;
            }
            Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Cmp(_) => {
                let rhs = pop(&mut stack)?;
                let lhs = pop(&mut stack)?;
                let value = match op {
                    Op::Add => lhs.wrapping_add(rhs),
                    Op::Sub => lhs.wrapping_sub(rhs),
                    Op::Mul => lhs.wrapping_mul(rhs),
                    Op::And => (lhs != 0 && rhs != 0) as i64,
                    Op::Or => (lhs != 0 || rhs != 0) as i64,
                    Op::Cmp(cond) => cond.eval(lhs, rhs) as i64,
                    other => {
                        return Err(CompileError::codegen(format!(
                            "`{}` is not a binary operation",
                            other.mnemonic()
                        )))
                    }
                };
                stack.push(value);
            }
            Op::Div | Op::Rem => {
                let rhs = pop(&mut stack)?;
                let lhs = pop(&mut stack)?;
                if rhs == 0 {
                    out.flush().map_err(|e| CompileError::io("<stdout>", e))?;
                    err.write_all(DIVISION_TRAP_MESSAGE.as_bytes())
                        .map_err(|e| CompileError::io("<stderr>", e))?;
                    break TRAP_EXIT_STATUS;
                }
                stack.push(if op == Op::Div {
                    lhs.wrapping_div(rhs)
                } else {
                    lhs.wrapping_rem(rhs)
                });
            }
            Op::Neg => {
                let value = pop(&mut stack)?;
                stack.push(value.wrapping_neg());
            }
            Op::Not => {
                let value = pop(&mut stack)?;
                stack.push((value == 0) as i64);
            }
            Op::Jump(target) => pc = target as usize,
            Op::JumpIfTrue(target) => {
                if pop(&mut stack)? != 0 {
                    pc = target as usize;
                }
            }
            Op::PrintInt => {
                let value = pop(&mut stack)?;
                writeln!(out, "{}", value).map_err(|e| CompileError::io("<stdout>", e))?;
            }
            Op::PrintBool => {
                let value = pop(&mut stack)?;
                let text = if value != 0 { "true" } else { "false" };
                writeln!(out, "{}", text).map_err(|e| CompileError::io("<stdout>", e))?;
            }
            Op::Exit => break pop(&mut stack)?,
            Op::Nop => {}
        }
    };

    out.flush().map_err(|e| CompileError::io("<stdout>", e))?;
    log::debug!("vm exited with status {}", status);
    Ok(status)
}

fn pop(stack: &mut Vec<i64>) -> CompileResult<i64> {
    stack
        .pop()
        .ok_or_else(|| CompileError::codegen("evaluation stack underflow"))
}

fn slot_value(slots: &[i64], slot: u32) -> CompileResult<i64> {
    slots
        .get(slot as usize)
        .copied()
        .ok_or_else(|| CompileError::codegen(format!("unknown slot %{slot}")))
}
