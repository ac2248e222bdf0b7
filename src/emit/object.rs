// This module packages generated machine code as an ELF64 relocatable object using the
// object crate's writer. Everything lives in one .text section: code first, then the
// read-only strings the runtime helpers print. All branches and rip-relative loads are
// internal to that section, so the object carries no relocations. `main` (and `_start`
// when requested) are global function symbols; runtime helpers are local. With debug info
// on, every bound source label becomes a local `gotoc.label.<name>` symbol and a file
// symbol names the source. An empty .note.GNU-stack section marks the stack non-executable.

//! ELF object file emission.

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use crate::core::error::CompileResult;
use crate::x64::MachineCode;

/// Prefix of the local symbols that mark source labels.
pub const LABEL_SYMBOL_PREFIX: &str = "gotoc.label.";

/// Build an ELF object for `code`.
///
/// `source` names the file symbol emitted with debug info.
pub fn build_object(code: &MachineCode, debug: bool, source: Option<&str>) -> CompileResult<Vec<u8>> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);

    if debug {
        if let Some(source) = source {
            obj.add_file_symbol(source.as_bytes().to_vec());
        }
    }

    let text = obj.section_id(StandardSection::Text);
    let base = obj.append_section_data(text, &code.bytes, 16);

    for function in &code.functions {
        obj.add_symbol(Symbol {
            name: function.name.as_bytes().to_vec(),
            value: base + function.offset,
            size: function.size,
            kind: SymbolKind::Text,
            scope: if function.global {
                SymbolScope::Linkage
            } else {
                SymbolScope::Compilation
            },
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }

    if debug {
        for (name, offset) in &code.source_labels {
            obj.add_symbol(Symbol {
                name: format!("{LABEL_SYMBOL_PREFIX}{name}").into_bytes(),
                value: base + offset,
                size: 0,
                kind: SymbolKind::Label,
                scope: SymbolScope::Compilation,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }
    }

    obj.add_section(
        Vec::new(),
        b".note.GNU-stack".to_vec(),
        SectionKind::Elf(object::elf::SHT_PROGBITS),
    );

    let bytes = obj.write()?;
    log::debug!(
        "built ELF object: {} bytes, {} function symbols",
        bytes.len(),
        code.functions.len()
    );
    Ok(bytes)
}
