// This module lowers a verified ir::Program to x86-64 machine code. The program becomes a
// single `main` function with an rbp-based frame holding one zeroed 8-byte slot per
// variable. Two evaluation strategies are supported. In stack-based mode every lowered op
// pushes and pops the machine stack. By default the top of the evaluation stack is cached
// in rax and the rest lives on the machine stack; this needs the static stack depth of
// every op, which ir::verify::stack_depths computes. Ops no path reaches are emitted as
// ud2. Runtime support (decimal and boolean printing, the division-by-zero trap) is emitted
// after main as small helpers that talk to the kernel through the write syscall, so the
// output needs no libc. With the entry-point flag an `_start` stub calls main and passes
// its result to the exit syscall.

//! Machine code generation for lowered programs.

use iced_x86::code_asm::*;
use std::collections::BTreeMap;

use super::encoder::{slot_offset, Assembled, EncodingError, X64Encoder};
use crate::core::error::CompileResult;
use crate::ir::{
    stack_depths, Addr, Cond, Op, Program, DIVISION_TRAP_MESSAGE, TRAP_EXIT_STATUS,
};

pub const MAIN_SYMBOL: &str = "main";
pub const ENTRY_SYMBOL: &str = "_start";
pub const PRINT_INT_SYMBOL: &str = "__gotoc_print_int";
pub const PRINT_BOOL_SYMBOL: &str = "__gotoc_print_bool";

const RETURN_LABEL: &str = ".Lreturn";
const DIV_TRAP_LABEL: &str = ".Ldiv_trap";
const TRAP_MESSAGE_LABEL: &str = ".Ltrap_message";
const TRUE_LABEL: &str = ".Ltrue";
const FALSE_LABEL: &str = ".Lfalse";

const SYS_WRITE: i32 = 1;
const SYS_EXIT: i32 = 60;

/// Code generation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Keep every intermediate value on the machine stack.
    pub stack_based: bool,
    /// Emit an `_start` stub that exits with main's result.
    pub entry_point: bool,
}

/// A function in the generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSymbol {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    /// Visible to the linker.
    pub global: bool,
}

/// Generated code plus the metadata the emitters need.
#[derive(Debug, Clone)]
pub struct MachineCode {
    pub bytes: Vec<u8>,
    /// Instructions end here; read-only data follows.
    pub code_len: usize,
    pub functions: Vec<CodeSymbol>,
    /// Assembly label names by offset, including jump targets.
    pub labels: BTreeMap<u64, Vec<String>>,
    /// Offset of each op's first instruction.
    pub op_offsets: Vec<u64>,
    /// Source line of each op.
    pub lines: Vec<u32>,
    /// Source labels and the offset they were bound to.
    pub source_labels: Vec<(String, u64)>,
}

impl MachineCode {
    pub fn symbol(&self, name: &str) -> Option<&CodeSymbol> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Offset of `main`.
    pub fn main_offset(&self) -> u64 {
        self.symbol(MAIN_SYMBOL).map(|s| s.offset).unwrap_or(0)
    }
}

/// Generate machine code for `program`.
pub fn compile(program: &Program, options: CodegenOptions) -> CompileResult<MachineCode> {
    let depths = stack_depths(program)?;
    let mut function = FunctionCodegen::new(program, options)?;
    function.emit_entry()?;
    function.emit_main(&depths)?;
    function.emit_runtime()?;
    let FunctionCodegen { enc, runtime, .. } = function;
    let assembled = enc.finalize()?;
    let code = describe(program, options, &runtime, assembled);
    log::debug!(
        "generated {} bytes of x86-64 ({} code, {} data)",
        code.bytes.len(),
        code.code_len,
        code.bytes.len() - code.code_len
    );
    Ok(code)
}

/// Runtime pieces a program needs.
#[derive(Debug, Clone, Copy, Default)]
struct Runtime {
    print_int: bool,
    print_bool: bool,
    div_trap: bool,
}

impl Runtime {
    fn scan(program: &Program) -> Self {
        let mut runtime = Runtime::default();
        for op in &program.ops {
            match op {
                Op::PrintInt => runtime.print_int = true,
                Op::PrintBool => runtime.print_bool = true,
                Op::Div | Op::Rem => runtime.div_trap = true,
                _ => {}
            }
        }
        runtime
    }
}

struct FunctionCodegen<'p> {
    program: &'p Program,
    options: CodegenOptions,
    enc: X64Encoder,
    runtime: Runtime,
    main: CodeLabel,
    ret: CodeLabel,
    print_int: Option<CodeLabel>,
    print_bool: Option<CodeLabel>,
    div_trap: Option<CodeLabel>,
}

impl<'p> FunctionCodegen<'p> {
    fn new(program: &'p Program, options: CodegenOptions) -> Result<Self, EncodingError> {
        let mut enc = X64Encoder::new(program.len())?;
        let runtime = Runtime::scan(program);
        let main = enc.named_label(MAIN_SYMBOL);
        let ret = enc.named_label(RETURN_LABEL);
        let print_int = runtime.print_int.then(|| enc.named_label(PRINT_INT_SYMBOL));
        let print_bool = runtime.print_bool.then(|| enc.named_label(PRINT_BOOL_SYMBOL));
        let div_trap = runtime.div_trap.then(|| enc.named_label(DIV_TRAP_LABEL));
        Ok(Self {
            program,
            options,
            enc,
            runtime,
            main,
            ret,
            print_int,
            print_bool,
            div_trap,
        })
    }

    fn emit_entry(&mut self) -> Result<(), EncodingError> {
        if !self.options.entry_point {
            return Ok(());
        }
        let start = self.enc.named_label(ENTRY_SYMBOL);
        self.enc.place(start)?;
        self.enc.call(self.main)?;
        self.enc.asm(|a| a.mov(rdi, rax))?;
        self.enc.asm(|a| a.mov(eax, SYS_EXIT))?;
        self.enc.asm(|a| a.syscall())
    }

    fn emit_main(&mut self, depths: &[Option<u32>]) -> CompileResult<()> {
        self.enc.place(self.main)?;
        self.enc.emit_prologue(self.program.slots.len())?;

        for (idx, op) in self.program.ops.iter().enumerate() {
            let addr = idx as Addr;
            self.enc.place_op(addr)?;
            match depths.get(idx).copied().flatten() {
                None => self.enc.asm(|a| a.ud2())?,
                Some(_) if self.options.stack_based => self.emit_stack_op(addr, *op)?,
                Some(depth) => self.emit_cached_op(addr, *op, depth)?,
            }
        }

        self.enc.place(self.ret)?;
        self.enc.emit_epilogue()?;
        Ok(())
    }

    fn slot(slot: u32) -> Result<AsmMemoryOperand, EncodingError> {
        let offset = slot_offset(slot as usize)?;
        Ok(qword_ptr(rbp - offset))
    }

    fn helper(label: Option<CodeLabel>, name: &str) -> Result<CodeLabel, EncodingError> {
        label.ok_or_else(|| EncodingError::AssemblyError(format!("{name} was not planned")))
    }

    /// Top of stack cached in rax; `depth` values are live on entry.
    fn emit_cached_op(&mut self, addr: Addr, op: Op, depth: u32) -> Result<(), EncodingError> {
        let enc = &mut self.enc;
        match op {
            Op::Push(value) => {
                if depth > 0 {
                    enc.asm(|a| a.push(rax))?;
                }
                enc.asm(|a| a.mov(rax, value))?;
            }
            Op::Load(slot) => {
                if depth > 0 {
                    enc.asm(|a| a.push(rax))?;
                }
                let mem = Self::slot(slot)?;
                enc.asm(|a| a.mov(rax, mem))?;
            }
            Op::Store(slot) => {
                let mem = Self::slot(slot)?;
                enc.asm(|a| a.mov(mem, rax))?;
                if depth > 1 {
                    enc.asm(|a| a.pop(rax))?;
                }
            }
            Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Cmp(_) => {
                enc.asm(|a| a.pop(rcx))?;
                emit_binary(enc, op)?;
            }
            Op::Div | Op::Rem => {
                enc.asm(|a| a.mov(rcx, rax))?;
                enc.asm(|a| a.pop(rax))?;
                let trap = Self::helper(self.div_trap, DIV_TRAP_LABEL)?;
                emit_division(enc, addr, op, trap)?;
            }
            Op::Neg => enc.asm(|a| a.neg(rax))?,
            Op::Not => enc.asm(|a| a.xor(rax, 1))?,
            Op::Jump(target) => {
                let label = enc.op_label(target)?;
                enc.jmp(label)?;
            }
            Op::JumpIfTrue(target) => {
                let label = enc.op_label(target)?;
                enc.asm(|a| a.test(rax, rax))?;
                if depth > 1 {
                    // pop leaves the flags alone
                    enc.asm(|a| a.pop(rax))?;
                }
                enc.jnz(label)?;
            }
            Op::PrintInt | Op::PrintBool => {
                let helper = if op == Op::PrintInt {
                    Self::helper(self.print_int, PRINT_INT_SYMBOL)?
                } else {
                    Self::helper(self.print_bool, PRINT_BOOL_SYMBOL)?
                };
                enc.asm(|a| a.mov(rdi, rax))?;
                enc.call(helper)?;
                if depth > 1 {
                    enc.asm(|a| a.pop(rax))?;
                }
            }
            Op::Exit => enc.jmp(self.ret)?,
            Op::Nop => enc.asm(|a| a.nop())?,
        }
        Ok(())
    }

    /// Every value on the machine stack.
    fn emit_stack_op(&mut self, addr: Addr, op: Op) -> Result<(), EncodingError> {
        let enc = &mut self.enc;
        match op {
            Op::Push(value) => {
                enc.asm(|a| a.mov(rax, value))?;
                enc.asm(|a| a.push(rax))?;
            }
            Op::Load(slot) => {
                let mem = Self::slot(slot)?;
                enc.asm(|a| a.mov(rax, mem))?;
                enc.asm(|a| a.push(rax))?;
            }
            Op::Store(slot) => {
                let mem = Self::slot(slot)?;
                enc.asm(|a| a.pop(rax))?;
                enc.asm(|a| a.mov(mem, rax))?;
            }
            Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Cmp(_) => {
                enc.asm(|a| a.pop(rax))?;
                enc.asm(|a| a.pop(rcx))?;
                emit_binary(enc, op)?;
                enc.asm(|a| a.push(rax))?;
            }
            Op::Div | Op::Rem => {
                enc.asm(|a| a.pop(rcx))?;
                enc.asm(|a| a.pop(rax))?;
                let trap = Self::helper(self.div_trap, DIV_TRAP_LABEL)?;
                emit_division(enc, addr, op, trap)?;
                enc.asm(|a| a.push(rax))?;
            }
            Op::Neg | Op::Not => {
                enc.asm(|a| a.pop(rax))?;
                if op == Op::Neg {
                    enc.asm(|a| a.neg(rax))?;
                } else {
                    enc.asm(|a| a.xor(rax, 1))?;
                }
                enc.asm(|a| a.push(rax))?;
            }
            Op::Jump(target) => {
                let label = enc.op_label(target)?;
                enc.jmp(label)?;
            }
            Op::JumpIfTrue(target) => {
                let label = enc.op_label(target)?;
                enc.asm(|a| a.pop(rax))?;
                enc.asm(|a| a.test(rax, rax))?;
                enc.jnz(label)?;
            }
            Op::PrintInt | Op::PrintBool => {
                let helper = if op == Op::PrintInt {
                    Self::helper(self.print_int, PRINT_INT_SYMBOL)?
                } else {
                    Self::helper(self.print_bool, PRINT_BOOL_SYMBOL)?
                };
                enc.asm(|a| a.pop(rdi))?;
                enc.call(helper)?;
            }
            Op::Exit => {
                enc.asm(|a| a.pop(rax))?;
                enc.jmp(self.ret)?;
            }
            Op::Nop => enc.asm(|a| a.nop())?,
        }
        Ok(())
    }

    fn emit_runtime(&mut self) -> Result<(), EncodingError> {
        let message = self.div_trap.map(|_| self.enc.named_label(TRAP_MESSAGE_LABEL));
        let (true_text, false_text) = match self.print_bool {
            Some(_) => (
                Some(self.enc.named_label(TRUE_LABEL)),
                Some(self.enc.named_label(FALSE_LABEL)),
            ),
            None => (None, None),
        };

        if let (Some(trap), Some(message)) = (self.div_trap, message) {
            let len = DIVISION_TRAP_MESSAGE.len() as i32;
            let ret = self.ret;
            let enc = &mut self.enc;
            enc.place(trap)?;
            enc.asm(|a| a.mov(eax, SYS_WRITE))?;
            enc.asm(|a| a.mov(edi, 2))?;
            enc.asm(|a| a.lea(rsi, ptr(message)))?;
            enc.asm(|a| a.mov(edx, len))?;
            enc.asm(|a| a.syscall())?;
            enc.asm(|a| a.mov(eax, TRAP_EXIT_STATUS as i32))?;
            enc.jmp(ret)?;
        }
        if let Some(entry) = self.print_int {
            emit_print_int(&mut self.enc, entry)?;
        }
        if let (Some(entry), Some(t), Some(f)) = (self.print_bool, true_text, false_text) {
            emit_print_bool(&mut self.enc, entry, t, f)?;
        }

        if let Some(message) = message {
            self.enc.place(message)?;
            self.enc.asm(|a| a.db(DIVISION_TRAP_MESSAGE.as_bytes()))?;
        }
        if let (Some(t), Some(f)) = (true_text, false_text) {
            self.enc.place(t)?;
            self.enc.asm(|a| a.db(b"true\n"))?;
            self.enc.place(f)?;
            self.enc.asm(|a| a.db(b"false\n"))?;
        }
        Ok(())
    }
}

/// `rcx op rax` into rax; rcx holds the left operand.
fn emit_binary(enc: &mut X64Encoder, op: Op) -> Result<(), EncodingError> {
    match op {
        Op::Add => enc.asm(|a| a.add(rax, rcx)),
        Op::Sub => {
            enc.asm(|a| a.sub(rcx, rax))?;
            enc.asm(|a| a.mov(rax, rcx))
        }
        Op::Mul => enc.asm(|a| a.imul_2(rax, rcx)),
        Op::And => enc.asm(|a| a.and(rax, rcx)),
        Op::Or => enc.asm(|a| a.or(rax, rcx)),
        Op::Cmp(cond) => {
            enc.asm(|a| a.cmp(rcx, rax))?;
            enc.asm(|a| match cond {
                Cond::Eq => a.sete(al),
                Cond::Ne => a.setne(al),
                Cond::Lt => a.setl(al),
                Cond::Le => a.setle(al),
                Cond::Gt => a.setg(al),
                Cond::Ge => a.setge(al),
            })?;
            enc.asm(|a| a.movzx(eax, al))
        }
        other => Err(EncodingError::AssemblyError(format!(
            "`{}` is not a binary operation",
            other.mnemonic()
        ))),
    }
}

/// rax / rcx (or rax % rcx) into rax.
///
/// A divisor of -1 negates the dividend and divides by 1 instead, so
/// `i64::MIN / -1` wraps and its remainder is 0 rather than faulting.
fn emit_division(
    enc: &mut X64Encoder,
    addr: Addr,
    op: Op,
    trap: CodeLabel,
) -> Result<(), EncodingError> {
    let divide = enc.named_label(format!(".Ldiv{addr}"));
    enc.asm(|a| a.test(rcx, rcx))?;
    enc.jz(trap)?;
    enc.asm(|a| a.cmp(rcx, -1))?;
    enc.asm(|a| a.jne(divide))?;
    enc.asm(|a| a.neg(rax))?;
    enc.asm(|a| a.mov(ecx, 1))?;
    enc.place(divide)?;
    enc.asm(|a| a.cqo())?;
    enc.asm(|a| a.idiv(rcx))?;
    if op == Op::Rem {
        enc.asm(|a| a.mov(rax, rdx))?;
    }
    Ok(())
}

/// Print rdi as a signed decimal followed by a newline.
fn emit_print_int(enc: &mut X64Encoder, entry: CodeLabel) -> Result<(), EncodingError> {
    let positive = enc.named_label(".Lprint_int_positive");
    let digit = enc.named_label(".Lprint_int_digit");
    let write = enc.named_label(".Lprint_int_write");

    enc.place(entry)?;
    enc.asm(|a| a.push(rbp))?;
    enc.asm(|a| a.mov(rbp, rsp))?;
    enc.asm(|a| a.sub(rsp, 32))?;
    // The text is built backwards from rbp.
    enc.asm(|a| a.lea(rsi, qword_ptr(rbp - 1)))?;
    enc.asm(|a| a.mov(edx, 10))?;
    enc.asm(|a| a.mov(byte_ptr(rsi), dl))?;
    enc.asm(|a| a.mov(rax, rdi))?;
    enc.asm(|a| a.test(rax, rax))?;
    enc.asm(|a| a.jns(positive))?;
    // i64::MIN negates to itself, which is its magnitude when read unsigned.
    enc.asm(|a| a.neg(rax))?;
    enc.place(positive)?;
    enc.asm(|a| a.mov(ecx, 10))?;
    enc.place(digit)?;
    enc.asm(|a| a.xor(edx, edx))?;
    enc.asm(|a| a.div(rcx))?;
    enc.asm(|a| a.add(edx, 48))?;
    enc.asm(|a| a.dec(rsi))?;
    enc.asm(|a| a.mov(byte_ptr(rsi), dl))?;
    enc.asm(|a| a.test(rax, rax))?;
    enc.asm(|a| a.jne(digit))?;
    enc.asm(|a| a.test(rdi, rdi))?;
    enc.asm(|a| a.jns(write))?;
    enc.asm(|a| a.dec(rsi))?;
    enc.asm(|a| a.mov(edx, 45))?;
    enc.asm(|a| a.mov(byte_ptr(rsi), dl))?;
    enc.place(write)?;
    enc.asm(|a| a.mov(rdx, rbp))?;
    enc.asm(|a| a.sub(rdx, rsi))?;
    enc.asm(|a| a.mov(eax, SYS_WRITE))?;
    enc.asm(|a| a.mov(edi, 1))?;
    enc.asm(|a| a.syscall())?;
    enc.asm(|a| a.mov(rsp, rbp))?;
    enc.asm(|a| a.pop(rbp))?;
    enc.asm(|a| a.ret())
}

/// Print `true` or `false` for rdi, followed by a newline.
fn emit_print_bool(
    enc: &mut X64Encoder,
    entry: CodeLabel,
    true_text: CodeLabel,
    false_text: CodeLabel,
) -> Result<(), EncodingError> {
    let is_false = enc.named_label(".Lprint_bool_false");
    let write = enc.named_label(".Lprint_bool_write");

    enc.place(entry)?;
    enc.asm(|a| a.test(rdi, rdi))?;
    enc.jz(is_false)?;
    enc.asm(|a| a.lea(rsi, ptr(true_text)))?;
    enc.asm(|a| a.mov(edx, 5))?;
    enc.jmp(write)?;
    enc.place(is_false)?;
    enc.asm(|a| a.lea(rsi, ptr(false_text)))?;
    enc.asm(|a| a.mov(edx, 6))?;
    enc.place(write)?;
    enc.asm(|a| a.mov(eax, SYS_WRITE))?;
    enc.asm(|a| a.mov(edi, 1))?;
    enc.asm(|a| a.syscall())?;
    enc.asm(|a| a.ret())
}

/// Attach symbol, label and line metadata to the assembled bytes.
fn describe(
    program: &Program,
    options: CodegenOptions,
    runtime: &Runtime,
    assembled: Assembled,
) -> MachineCode {
    let Assembled {
        bytes,
        op_offsets,
        mut labels,
    } = assembled;
    let offset_of = |labels: &BTreeMap<u64, Vec<String>>, name: &str| {
        labels
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == name))
            .map(|(offset, _)| *offset)
    };

    let data_start = [TRAP_MESSAGE_LABEL, TRUE_LABEL]
        .iter()
        .filter_map(|name| offset_of(&labels, name))
        .min()
        .unwrap_or(bytes.len() as u64);

    let mut starts: Vec<(&str, bool)> = Vec::new();
    if options.entry_point {
        starts.push((ENTRY_SYMBOL, true));
    }
    starts.push((MAIN_SYMBOL, true));
    if runtime.print_int {
        starts.push((PRINT_INT_SYMBOL, false));
    }
    if runtime.print_bool {
        starts.push((PRINT_BOOL_SYMBOL, false));
    }
    let mut functions: Vec<CodeSymbol> = starts
        .into_iter()
        .filter_map(|(name, global)| {
            offset_of(&labels, name).map(|offset| CodeSymbol {
                name: name.to_string(),
                offset,
                size: 0,
                global,
            })
        })
        .collect();
    functions.sort_by_key(|f| f.offset);
    let ends: Vec<u64> = functions
        .iter()
        .skip(1)
        .map(|f| f.offset)
        .chain(std::iter::once(data_start))
        .collect();
    for (function, end) in functions.iter_mut().zip(ends) {
        function.size = end - function.offset;
    }

    let targets = program.jump_targets();
    for (addr, offset) in op_offsets.iter().enumerate() {
        if targets.get(addr).copied().unwrap_or(false) {
            labels.entry(*offset).or_default().push(format!(".L{addr}"));
        }
    }

    let source_labels = program
        .labels
        .iter()
        .filter_map(|label| {
            op_offsets
                .get(label.addr as usize)
                .map(|offset| (label.name.clone(), *offset))
        })
        .collect();

    MachineCode {
        code_len: data_start as usize,
        bytes,
        functions,
        labels,
        op_offsets,
        lines: program.lines.clone(),
        source_labels,
    }
}
