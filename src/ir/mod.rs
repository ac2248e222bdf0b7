//! Lowered program representation.
//!
//! The tree walker lowers source statements into a flat sequence of
//! stack-machine operations. Control transfers name their target by op
//! index; a transfer emitted before its label is known carries
//! [`PLACEHOLDER`] until the patch table rewrites it.
//!
//! ```text
//! 0000:  push 3
//! 0001:  store %0 n
//! 0002:  load %0 n
//! 0003:  print.int
//! 0004:  jmp 0007
//! ```

use std::fmt;

use crate::sema::Type;

pub mod print;
pub mod verify;

pub use verify::{stack_depths, verify};

/// Address of an operation in the emission buffer.
pub type Addr = u32;

/// Variable slot index.
pub type Slot = u32;

/// Target of a control transfer whose label is not yet bound.
pub const PLACEHOLDER: Addr = Addr::MAX;

/// Exit status of a program stopped by a runtime trap.
pub const TRAP_EXIT_STATUS: i64 = 101;

/// Message written to standard error by the division trap.
pub const DIVISION_TRAP_MESSAGE: &str = "runtime error: division by zero\n";

/// Comparison condition for [`Op::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cond::Eq => lhs == rhs,
            Cond::Ne => lhs != rhs,
            Cond::Lt => lhs < rhs,
            Cond::Le => lhs <= rhs,
            Cond::Gt => lhs > rhs,
            Cond::Ge => lhs >= rhs,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        }
    }
}

/// One lowered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Push(i64),
    Load(Slot),
    Store(Slot),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Not,
    Cmp(Cond),
    Jump(Addr),
    /// Pops a boolean and jumps when it is true.
    JumpIfTrue(Addr),
    PrintInt,
    PrintBool,
    /// Pops the exit status and stops the program.
    Exit,
    Nop,
}

impl Op {
    /// Jump target, if this op transfers control.
    pub fn target(self) -> Option<Addr> {
        match self {
            Op::Jump(target) | Op::JumpIfTrue(target) => Some(target),
            _ => None,
        }
    }

    /// Same transfer with a new target. `None` for non-transfers.
    pub fn with_target(self, target: Addr) -> Option<Op> {
        match self {
            Op::Jump(_) => Some(Op::Jump(target)),
            Op::JumpIfTrue(_) => Some(Op::JumpIfTrue(target)),
            _ => None,
        }
    }

    /// Values popped and pushed by this op.
    pub fn stack_effect(self) -> (u32, u32) {
        match self {
            Op::Push(_) | Op::Load(_) => (0, 1),
            Op::Store(_) | Op::JumpIfTrue(_) | Op::PrintInt | Op::PrintBool | Op::Exit => (1, 0),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::And
            | Op::Or
            | Op::Cmp(_) => (2, 1),
            Op::Neg | Op::Not => (1, 1),
            Op::Jump(_) | Op::Nop => (0, 0),
        }
    }

    /// Control never reaches the next op.
    pub fn is_terminator(self) -> bool {
        matches!(self, Op::Jump(_) | Op::Exit)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Push(_) => "push",
            Op::Load(_) => "load",
            Op::Store(_) => "store",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Rem => "rem",
            Op::Neg => "neg",
            Op::And => "and",
            Op::Or => "or",
            Op::Not => "not",
            Op::Cmp(_) => "cmp",
            Op::Jump(_) => "jmp",
            Op::JumpIfTrue(_) => "jmp.if",
            Op::PrintInt => "print.int",
            Op::PrintBool => "print.bool",
            Op::Exit => "exit",
            Op::Nop => "nop",
        }
    }
}

/// A variable slot as seen by the backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub ty: Type,
}

/// A source label bound to an address; kept as a debug symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSymbol {
    pub name: String,
    pub addr: Addr,
}

/// A fully patched lowered program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub ops: Vec<Op>,
    /// Source line of each op; same length as `ops`.
    pub lines: Vec<u32>,
    pub slots: Vec<SlotInfo>,
    pub labels: Vec<LabelSymbol>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Successor addresses of the op at `addr`.
    pub fn successors(&self, addr: Addr) -> impl Iterator<Item = Addr> {
        let op = self.ops[addr as usize];
        let fall_through = if op.is_terminator() { None } else { Some(addr + 1) };
        op.target().into_iter().chain(fall_through)
    }

    /// Per-op flag telling whether some transfer targets it.
    pub fn jump_targets(&self) -> Vec<bool> {
        let mut targets = vec![false; self.ops.len() + 1];
        for op in &self.ops {
            if let Some(target) = op.target() {
                if let Some(flag) = targets.get_mut(target as usize) {
                    *flag = true;
                }
            }
        }
        targets
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print::print(self, false))
    }
}
