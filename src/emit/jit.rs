//! In-process execution.
//!
//! On x86-64 Unix hosts the generated code is copied into an anonymous
//! mapping, made executable and called directly. Everywhere else the
//! reference interpreter runs the program instead.

use crate::core::error::CompileResult;
use crate::ir::Program;
#[cfg(all(target_arch = "x86_64", unix))]
use crate::x64::{compile, CodegenOptions};

/// Run `program` and return its exit status.
#[cfg(all(target_arch = "x86_64", unix))]
pub fn run(program: &Program, stack_based: bool) -> CompileResult<i64> {
    let options = CodegenOptions {
        stack_based,
        entry_point: false,
    };
    let code = compile(program, options)?;
    native::execute(&code.bytes, code.main_offset())
}

/// Run `program` and return its exit status.
#[cfg(not(all(target_arch = "x86_64", unix)))]
pub fn run(program: &Program, _stack_based: bool) -> CompileResult<i64> {
    log::debug!("no native backend for this host, interpreting");
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    crate::vm::run(program, &mut stdout.lock(), &mut stderr.lock())
}

#[cfg(all(target_arch = "x86_64", unix))]
mod native {
    use std::io::Write;

    use memmap2::MmapMut;

    use crate::core::error::{CompileError, CompileResult};

    type EntryFn = unsafe extern "sysv64" fn() -> i64;

    pub(super) fn execute(bytes: &[u8], entry: u64) -> CompileResult<i64> {
        let entry = entry as usize;
        if entry >= bytes.len() {
            return Err(CompileError::codegen(format!(
                "entry offset {entry} is outside {} bytes of code",
                bytes.len()
            )));
        }

        let mut map =
            MmapMut::map_anon(bytes.len()).map_err(|e| CompileError::io("<jit memory>", e))?;
        map.copy_from_slice(bytes);
        let map = map
            .make_exec()
            .map_err(|e| CompileError::io("<jit memory>", e))?;

        // The generated code writes with raw syscalls, so buffered output must go first.
        std::io::stdout()
            .flush()
            .map_err(|e| CompileError::io("<stdout>", e))?;

        log::debug!("jit: running {} bytes at {:p}", bytes.len(), map.as_ptr());
        // SAFETY: the mapping holds complete machine code produced by the x86-64 backend,
        // `entry` is the start of `main`, which follows the System V ABI, and the mapping
        // outlives the call.
        let status = unsafe {
            let main: EntryFn = std::mem::transmute(map.as_ptr().add(entry));
            main()
        };
        log::debug!("jit: exited with status {status}");
        Ok(status)
    }
}

#[cfg(all(test, target_arch = "x86_64", unix))]
mod tests {
    use super::*;
    use crate::ir::{Cond, Op, SlotInfo};
    use crate::sema::Type;

    fn program(ops: Vec<Op>, slots: usize) -> Program {
        Program {
            lines: vec![1; ops.len()],
            ops,
            slots: (0..slots)
                .map(|i| SlotInfo {
                    name: format!("v{i}"),
                    ty: Type::Int,
                })
                .collect(),
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_exit_status() {
        for stack_based in [false, true] {
            let p = program(vec![Op::Push(6), Op::Push(7), Op::Mul, Op::Exit], 0);
            assert_eq!(run(&p, stack_based).unwrap(), 42);
        }
    }

    #[test]
    fn test_loop_with_slots() {
        // sum = 0; i = 10; loop: sum = sum + i; i = i - 1; if i > 0 goto loop; exit sum
        let ops = vec![
            Op::Push(10),
            Op::Store(1),
            Op::Load(0),
            Op::Load(1),
            Op::Add,
            Op::Store(0),
            Op::Load(1),
            Op::Push(1),
            Op::Sub,
            Op::Store(1),
            Op::Load(1),
            Op::Push(0),
            Op::Cmp(Cond::Gt),
            Op::JumpIfTrue(2),
            Op::Load(0),
            Op::Exit,
        ];
        for stack_based in [false, true] {
            assert_eq!(run(&program(ops.clone(), 2), stack_based).unwrap(), 55);
        }
    }

    #[test]
    fn test_wrapping_division() {
        let ops = vec![
            Op::Push(i64::MIN),
            Op::Push(-1),
            Op::Div,
            Op::Push(i64::MIN),
            Op::Push(-1),
            Op::Rem,
            Op::Add,
            Op::Push(-7),
            Op::Push(2),
            Op::Rem,
            Op::Sub,
            Op::Exit,
        ];
        // i64::MIN + 0 - (-1)
        for stack_based in [false, true] {
            assert_eq!(
                run(&program(ops.clone(), 0), stack_based).unwrap(),
                i64::MIN + 1
            );
        }
    }

    #[test]
    fn test_deep_stack_keeps_values() {
        // 1 + (2 * (3 - (4 / 2)))
        let ops = vec![
            Op::Push(1),
            Op::Push(2),
            Op::Push(3),
            Op::Push(4),
            Op::Push(2),
            Op::Div,
            Op::Sub,
            Op::Mul,
            Op::Add,
            Op::Exit,
        ];
        for stack_based in [false, true] {
            assert_eq!(run(&program(ops.clone(), 0), stack_based).unwrap(), 3);
        }
    }
}
