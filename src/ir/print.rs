//! Textual IR printer.

use std::fmt::Write;

use super::{Op, Program};

/// Render `program` in the textual IR format.
///
/// With `debug` set, bound source labels appear as `name:` lines and every
/// op carries its source line.
pub fn print(program: &Program, debug: bool) -> String {
    let mut output = String::new();
    output.push_str("; gotoc IR\n");
    let _ = writeln!(
        output,
        "; ops: {}, slots: {}",
        program.ops.len(),
        program.slots.len()
    );

    for (idx, slot) in program.slots.iter().enumerate() {
        let _ = writeln!(output, "slot %{} {} : {}", idx, slot.name, slot.ty);
    }
    output.push('\n');

    for (addr, op) in program.ops.iter().enumerate() {
        if debug {
            for label in program.labels.iter().filter(|l| l.addr as usize == addr) {
                let _ = writeln!(output, "{}:", label.name);
            }
        }

        let mut line = format!("{:04}:  {}", addr, render_op(program, *op));
        if debug {
            if let Some(src_line) = program.lines.get(addr) {
                while line.len() < 32 {
                    line.push(' ');
                }
                let _ = write!(line, "; line {}", src_line);
            }
        }
        output.push_str(line.trim_end());
        output.push('\n');
    }

    output
}

fn render_op(program: &Program, op: Op) -> String {
    match op {
        Op::Push(value) => format!("push {}", value),
        Op::Load(slot) | Op::Store(slot) => {
            let name = program
                .slots
                .get(slot as usize)
                .map(|s| s.name.as_str())
                .unwrap_or("?");
            format!("{} %{} {}", op.mnemonic(), slot, name)
        }
        Op::Cmp(cond) => format!("cmp.{}", cond.mnemonic()),
        Op::Jump(target) | Op::JumpIfTrue(target) => format!("{} {:04}", op.mnemonic(), target),
        other => other.mnemonic().to_string(),
    }
}
