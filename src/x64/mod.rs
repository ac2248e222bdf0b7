//! x86-64 backend.
//!
//! - Instruction encoding using iced-x86
//! - Machine code generation for lowered programs
//! - GNU assembler text rendering

pub mod asm_text;
pub mod codegen;
pub mod encoder;

pub use codegen::{compile, CodeSymbol, CodegenOptions, MachineCode};
pub use encoder::{EncodingError, X64Encoder, CODE_BASE};
