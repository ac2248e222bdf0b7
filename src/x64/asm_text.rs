//! GNU assembler text for generated machine code.
//!
//! The bytes produced by [`super::codegen::compile`] are decoded again with
//! iced-x86 and printed in AT&T syntax. Branch and rip-relative operands are
//! resolved back to label names so the text assembles with `as`.

use hashbrown::HashMap;
use iced_x86::{
    Decoder, DecoderOptions, Formatter, GasFormatter, Instruction, OpKind, SymbolResolver,
    SymbolResult,
};
use std::collections::BTreeMap;
use std::fmt::Write;

use super::codegen::MachineCode;
use super::encoder::CODE_BASE;

const BYTES_PER_LINE: usize = 12;

/// Maps absolute addresses back to label names.
///
/// Data references keep their `(%rip)` base so the text reassembles to the
/// same position-independent instruction.
struct LabelResolver {
    names: HashMap<u64, String>,
    rip_names: HashMap<u64, String>,
}

impl LabelResolver {
    fn new(code: &MachineCode) -> Self {
        let names: HashMap<u64, String> = code
            .labels
            .iter()
            .filter_map(|(offset, names)| {
                names.first().map(|name| (CODE_BASE + offset, name.clone()))
            })
            .collect();
        let rip_names = names
            .iter()
            .map(|(address, name)| (*address, format!("{name}(%rip)")))
            .collect();
        Self { names, rip_names }
    }
}

impl SymbolResolver for LabelResolver {
    fn symbol(
        &mut self,
        instruction: &Instruction,
        _operand: u32,
        instruction_operand: Option<u32>,
        address: u64,
        _address_size: u32,
    ) -> Option<SymbolResult<'_>> {
        let names = match instruction.op_kind(instruction_operand?) {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => &self.names,
            OpKind::Memory if instruction.is_ip_rel_memory_operand() => &self.rip_names,
            _ => return None,
        };
        names
            .get(&address)
            .map(|name| SymbolResult::with_str(address, name.as_str()))
    }
}

/// Render `code` as assembly text.
///
/// With `debug` set, each op is preceded by a `# line N` comment and bound
/// source labels appear as `# label name` comments.
pub fn render(code: &MachineCode, debug: bool) -> String {
    let mut out = String::new();
    out.push_str("# gotoc x86-64 (AT&T syntax)\n");
    out.push_str("\t.text\n");
    for function in &code.functions {
        if function.global {
            let _ = writeln!(out, "\t.globl\t{}", function.name);
        }
        let _ = writeln!(out, "\t.type\t{}, @function", function.name);
    }

    let op_at: BTreeMap<u64, usize> = code
        .op_offsets
        .iter()
        .enumerate()
        .map(|(addr, offset)| (*offset, addr))
        .collect();
    let mut source_labels: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
    for (name, offset) in &code.source_labels {
        source_labels.entry(*offset).or_default().push(name);
    }

    let mut formatter = GasFormatter::with_options(Some(Box::new(LabelResolver::new(code))), None);
    formatter.options_mut().set_gas_show_mnemonic_size_suffix(true);
    formatter.options_mut().set_first_operand_char_index(8);

    let text = &code.bytes[..code.code_len.min(code.bytes.len())];
    let mut decoder = Decoder::with_ip(64, text, CODE_BASE, DecoderOptions::NONE);
    let mut instruction = Instruction::default();
    let mut line = String::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        let offset = instruction.ip() - CODE_BASE;

        if debug {
            if let Some(names) = source_labels.get(&offset) {
                for name in names {
                    let _ = writeln!(out, "\t# label {name}");
                }
            }
        }
        write_labels(&mut out, code, offset);
        if debug {
            if let Some(line_no) = op_at.get(&offset).and_then(|addr| code.lines.get(*addr)) {
                let _ = writeln!(out, "\t# line {line_no}");
            }
        }

        line.clear();
        formatter.format(&instruction, &mut line);
        let _ = writeln!(out, "\t{line}");
    }

    for function in &code.functions {
        let _ = writeln!(out, "\t.size\t{}, {}", function.name, function.size);
    }

    let data = &code.bytes[code.code_len.min(code.bytes.len())..];
    if !data.is_empty() {
        let mut offset = code.code_len as u64;
        let mut pending: Vec<u8> = Vec::new();
        for byte in data {
            if code.labels.contains_key(&offset) {
                flush_bytes(&mut out, &mut pending);
                write_labels(&mut out, code, offset);
            }
            pending.push(*byte);
            if pending.len() == BYTES_PER_LINE {
                flush_bytes(&mut out, &mut pending);
            }
            offset += 1;
        }
        flush_bytes(&mut out, &mut pending);
    }

    out.push_str("\t.section\t.note.GNU-stack,\"\",@progbits\n");
    out
}

fn write_labels(out: &mut String, code: &MachineCode, offset: u64) {
    if let Some(names) = code.labels.get(&offset) {
        for name in names {
            let _ = writeln!(out, "{name}:");
        }
    }
}

fn flush_bytes(out: &mut String, pending: &mut Vec<u8>) {
    if pending.is_empty() {
        return;
    }
    let bytes: Vec<String> = pending.iter().map(|b| format!("0x{b:02x}")).collect();
    let _ = writeln!(out, "\t.byte\t{}", bytes.join(", "));
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Cond, LabelSymbol, Op, Program, SlotInfo};
    use crate::sema::Type;
    use crate::x64::codegen::{compile, CodegenOptions};

    fn countdown() -> Program {
        let ops = vec![
            Op::Push(3),
            Op::Store(0),
            Op::Load(0),
            Op::PrintInt,
            Op::Load(0),
            Op::Push(1),
            Op::Sub,
            Op::Store(0),
            Op::Load(0),
            Op::Push(0),
            Op::Cmp(Cond::Gt),
            Op::JumpIfTrue(2),
            Op::Push(0),
            Op::Exit,
        ];
        Program {
            lines: (1..=ops.len() as u32).collect(),
            ops,
            slots: vec![SlotInfo {
                name: "n".to_string(),
                ty: Type::Int,
            }],
            labels: vec![LabelSymbol {
                name: "top".to_string(),
                addr: 2,
            }],
        }
    }

    #[test]
    fn test_render_resolves_labels() {
        let code = compile(&countdown(), CodegenOptions::default()).unwrap();
        let text = render(&code, false);
        assert!(text.contains("\t.globl\tmain\n"));
        assert!(text.contains("main:\n"));
        assert!(text.contains(".L2:\n"));
        assert!(text.contains(".L2\n"), "branch should name its target:\n{text}");
        assert!(text.contains("__gotoc_print_int"));
        assert!(text.ends_with("\t.section\t.note.GNU-stack,\"\",@progbits\n"));
        assert!(!text.contains("# line"));
    }

    #[test]
    fn test_render_debug_comments() {
        let code = compile(&countdown(), CodegenOptions::default()).unwrap();
        let text = render(&code, true);
        assert!(text.contains("\t# label top\n"));
        assert!(text.contains("\t# line 1\n"));
        assert!(text.contains("\t# line 14\n"));
    }

    #[test]
    fn test_render_data() {
        let program = Program {
            lines: vec![1; 4],
            ops: vec![Op::Push(1), Op::PrintBool, Op::Push(0), Op::Exit],
            slots: Vec::new(),
            labels: Vec::new(),
        };
        let code = compile(&program, CodegenOptions::default()).unwrap();
        let text = render(&code, false);
        assert!(text.contains(".Ltrue:\n\t.byte\t0x74, 0x72, 0x75, 0x65, 0x0a\n"));
        assert!(text.contains(".Lfalse:\n"));
        assert!(text.contains(".Ltrue(%rip),%rsi\n"), "{text}");
        assert!(text.contains(".Lfalse(%rip),%rsi\n"), "{text}");
    }
}
