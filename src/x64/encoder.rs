// This module wraps the iced-x86 CodeAssembler for the gotoc native backend. X64Encoder owns
// the assembler, one CodeLabel per lowered op (so any op can be a jump target), and a set
// of named labels for runtime helpers and local branch targets inside them. Every named
// label keeps its name so the assembly printer can resolve branch targets after the code
// is assembled. finalize() assembles at a fixed base address with instruction offsets
// enabled and resolves every label to an offset from the start of the buffer. The
// CodeAssembler allows at most one label per instruction, so callers must emit at least
// one instruction after placing a label before placing the next one.

//! x86-64 instruction encoding using iced-x86.

use iced_x86::code_asm::*;
use iced_x86::{BlockEncoderOptions, IcedError};
use std::collections::BTreeMap;

use crate::ir::Addr;

/// Address the code is assembled at. Every emitted branch is relative, so
/// the bytes are position independent.
pub const CODE_BASE: u64 = 0x1000;

/// Error types for instruction encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Assembly error from iced-x86.
    AssemblyError(String),
    /// A branch named an op that does not exist.
    UnknownTarget(Addr),
    /// Frame offsets no longer fit a 32-bit displacement.
    FrameTooLarge(usize),
    /// A label that is not pending in this encoder was placed.
    UnknownLabel,
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
            EncodingError::UnknownTarget(addr) => write!(f, "Branch to unknown op {addr}"),
            EncodingError::FrameTooLarge(slots) => {
                write!(f, "Stack frame with {slots} slots is too large")
            }
            EncodingError::UnknownLabel => write!(f, "Label placed twice or never created"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<IcedError> for EncodingError {
    fn from(err: IcedError) -> Self {
        EncodingError::AssemblyError(err.to_string())
    }
}

/// Assembled bytes plus every label's offset.
#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub bytes: Vec<u8>,
    /// Offset of each op's first instruction.
    pub op_offsets: Vec<u64>,
    /// Named labels by offset.
    pub labels: BTreeMap<u64, Vec<String>>,
}

impl Assembled {
    /// Offset of the first label called `name`.
    pub fn label_offset(&self, name: &str) -> Option<u64> {
        self.labels
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == name))
            .map(|(offset, _)| *offset)
    }
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    /// Code assembler for generating instructions.
    assembler: CodeAssembler,
    /// One label per lowered op.
    op_labels: Vec<CodeLabel>,
    /// Helper and local labels, kept with their names.
    named_labels: Vec<(String, CodeLabel)>,
}

impl X64Encoder {
    /// Create an encoder for a program with `op_count` lowered ops.
    pub fn new(op_count: usize) -> Result<Self, EncodingError> {
        let mut assembler = CodeAssembler::new(64)?;
        let op_labels = (0..op_count).map(|_| assembler.create_label()).collect();
        Ok(Self {
            assembler,
            op_labels,
            named_labels: Vec::new(),
        })
    }

    /// Direct access for instructions without a dedicated helper.
    pub fn asm<F>(&mut self, f: F) -> Result<(), EncodingError>
    where
        F: FnOnce(&mut CodeAssembler) -> Result<(), IcedError>,
    {
        f(&mut self.assembler).map_err(EncodingError::from)
    }

    // ==== LABEL MANAGEMENT FOR CONTROL FLOW ====

    /// Create a named label; the name shows up in assembly output.
    pub fn named_label(&mut self, name: impl Into<String>) -> CodeLabel {
        let label = self.assembler.create_label();
        self.named_labels.push((name.into(), label));
        label
    }

    /// Label of the op at `addr`.
    pub fn op_label(&self, addr: Addr) -> Result<CodeLabel, EncodingError> {
        self.op_labels
            .get(addr as usize)
            .copied()
            .ok_or(EncodingError::UnknownTarget(addr))
    }

    /// Place `label` at the current position.
    ///
    /// The stored copy is the one bound, since finalize reads offsets from it.
    pub fn place(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        let stored = self
            .named_labels
            .iter_mut()
            .map(|(_, stored)| stored)
            .find(|stored| **stored == label)
            .ok_or(EncodingError::UnknownLabel)?;
        self.assembler.set_label(stored)?;
        Ok(())
    }

    /// Place the label of the op at `addr`.
    pub fn place_op(&mut self, addr: Addr) -> Result<(), EncodingError> {
        let stored = self
            .op_labels
            .get_mut(addr as usize)
            .ok_or(EncodingError::UnknownTarget(addr))?;
        self.assembler.set_label(stored)?;
        Ok(())
    }

    // ==== CONTROL FLOW INSTRUCTIONS ====

    pub fn jmp(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.asm(|a| a.jmp(label))
    }

    /// Jump to `label` when the last `test` found a non-zero value.
    pub fn jnz(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.asm(|a| a.jne(label))
    }

    pub fn jz(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.asm(|a| a.je(label))
    }

    pub fn call(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.asm(|a| a.call(label))
    }

    // ==== FRAME ====

    /// Generate the frame setup for `slots` zero-initialised 8-byte variables.
    pub fn emit_prologue(&mut self, slots: usize) -> Result<(), EncodingError> {
        let frame_size = frame_size(slots)?;
        self.asm(|a| a.push(rbp))?;
        self.asm(|a| a.mov(rbp, rsp))?;
        if frame_size > 0 {
            self.asm(|a| a.sub(rsp, frame_size))?;
            self.asm(|a| a.xor(eax, eax))?;
            for slot in 0..slots {
                let offset = slot_offset(slot)?;
                self.asm(|a| a.mov(qword_ptr(rbp - offset), rax))?;
            }
        }
        Ok(())
    }

    /// Generate the frame teardown; the result is already in rax.
    pub fn emit_epilogue(&mut self) -> Result<(), EncodingError> {
        self.asm(|a| a.mov(rsp, rbp))?;
        self.asm(|a| a.pop(rbp))?;
        self.asm(|a| a.ret())
    }

    /// Generate the final machine code and resolve every label.
    pub fn finalize(mut self) -> Result<Assembled, EncodingError> {
        let result = self
            .assembler
            .assemble_options(CODE_BASE, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;

        let mut op_offsets = Vec::with_capacity(self.op_labels.len());
        for label in &self.op_labels {
            op_offsets.push(result.label_ip(label)? - CODE_BASE);
        }
        let mut labels: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (name, label) in &self.named_labels {
            let offset = result.label_ip(label)? - CODE_BASE;
            labels.entry(offset).or_default().push(name.clone());
        }

        Ok(Assembled {
            bytes: result.inner.code_buffer,
            op_offsets,
            labels,
        })
    }
}

/// Bytes reserved below rbp for `slots` variables, rounded to 16.
pub fn frame_size(slots: usize) -> Result<i32, EncodingError> {
    let bytes = slots
        .checked_mul(8)
        .and_then(|b| b.checked_add(15))
        .map(|b| b & !15)
        .filter(|b| *b <= i32::MAX as usize)
        .ok_or(EncodingError::FrameTooLarge(slots))?;
    Ok(bytes as i32)
}

/// Displacement below rbp of variable `slot`.
pub fn slot_offset(slot: usize) -> Result<i32, EncodingError> {
    slot.checked_add(1)
        .and_then(|n| n.checked_mul(8))
        .filter(|b| *b <= i32::MAX as usize)
        .map(|b| b as i32)
        .ok_or(EncodingError::FrameTooLarge(slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        assert_eq!(frame_size(0).unwrap(), 0);
        assert_eq!(frame_size(1).unwrap(), 16);
        assert_eq!(frame_size(2).unwrap(), 16);
        assert_eq!(frame_size(3).unwrap(), 32);
        assert_eq!(slot_offset(0).unwrap(), 8);
        assert_eq!(slot_offset(2).unwrap(), 24);
        assert!(frame_size(usize::MAX / 4).is_err());
    }

    #[test]
    fn test_prologue_epilogue() {
        let mut encoder = X64Encoder::new(0).unwrap();
        encoder.emit_prologue(0).unwrap();
        encoder.emit_epilogue().unwrap();
        let code = encoder.finalize().unwrap();
        // push rbp; mov rbp,rsp; mov rsp,rbp; pop rbp; ret
        assert_eq!(code.bytes, vec![0x55, 0x48, 0x89, 0xe5, 0x48, 0x89, 0xec, 0x5d, 0xc3]);
    }

    #[test]
    fn test_labels_resolve_to_offsets() {
        let mut encoder = X64Encoder::new(2).unwrap();
        let helper = encoder.named_label("helper");
        let next = encoder.op_label(1).unwrap();
        encoder.place_op(0).unwrap();
        encoder.jmp(next).unwrap();
        encoder.place_op(1).unwrap();
        encoder.call(helper).unwrap();
        encoder.asm(|a| a.ret()).unwrap();
        encoder.place(helper).unwrap();
        encoder.asm(|a| a.ret()).unwrap();

        let code = encoder.finalize().unwrap();
        assert_eq!(code.op_offsets[0], 0);
        // jmp rel8 or jmp rel32
        assert!(code.op_offsets[1] == 2 || code.op_offsets[1] == 5);
        let helper_offset = code.label_offset("helper").unwrap();
        assert_eq!(code.bytes[helper_offset as usize], 0xc3);
    }

    #[test]
    fn test_every_placed_label_has_an_offset() {
        let mut encoder = X64Encoder::new(3).unwrap();
        let skip = encoder.named_label(".Lskip");
        let back = encoder.op_label(0).unwrap();
        encoder.place_op(0).unwrap();
        encoder.jz(skip).unwrap();
        encoder.place_op(1).unwrap();
        encoder.jmp(back).unwrap();
        encoder.place(skip).unwrap();
        encoder.asm(|a| a.nop()).unwrap();
        encoder.place_op(2).unwrap();
        encoder.asm(|a| a.ret()).unwrap();

        let code = encoder.finalize().unwrap();
        assert_eq!(code.op_offsets.len(), 3);
        assert!(code.op_offsets.windows(2).all(|w| w[0] < w[1]));
        let skip_offset = code.label_offset(".Lskip").unwrap();
        assert_eq!(code.bytes[skip_offset as usize], 0x90);
        assert_eq!(code.bytes[code.op_offsets[2] as usize], 0xc3);
    }

    #[test]
    fn test_label_placed_twice() {
        let mut encoder = X64Encoder::new(0).unwrap();
        let once = encoder.named_label("once");
        encoder.place(once).unwrap();
        encoder.asm(|a| a.ret()).unwrap();
        assert!(encoder.place(once).is_err());
    }

    #[test]
    fn test_unknown_target() {
        let encoder = X64Encoder::new(1).unwrap();
        assert!(matches!(
            encoder.op_label(5),
            Err(EncodingError::UnknownTarget(5))
        ));
    }
}
