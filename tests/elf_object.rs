use bumpalo::Bump;
use gotoc::core::config::{BackendStrategy, Config};
use gotoc::core::session::CompilationContext;
use gotoc::driver::build_program;
use gotoc::emit::object::{build_object, LABEL_SYMBOL_PREFIX};
use gotoc::x64::{compile, CodegenOptions, MachineCode};
use object::{File, Object, ObjectSection, ObjectSymbol, SymbolKind};

const SOURCE: &str = "\
let i = 0;
loop:
print i;
print i < 2;
i = i + 1;
if i < 3 goto loop;
exit i / 1;
";

fn machine_code(entry_point: bool) -> MachineCode {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Bump::new();
    let config = Config::new("loop.gt").with_strategy(BackendStrategy::Object);
    let mut ctx = CompilationContext::new(config, &arena).unwrap();
    let program = build_program(&mut ctx, SOURCE).unwrap();
    let options = CodegenOptions {
        stack_based: false,
        entry_point,
    };
    compile(&program, options).unwrap()
}

#[test]
fn simple_object() {
    let code = machine_code(false);
    let obj = build_object(&code, false, None).unwrap();
    let file = File::parse(&*obj).unwrap();

    let text = file.section_by_name(".text").unwrap();
    assert_eq!(text.size() as usize, code.bytes.len());
    assert_eq!(text.relocations().count(), 0);

    let main = file.symbol_by_name("main").unwrap();
    assert!(main.is_global());
    assert_eq!(main.kind(), SymbolKind::Text);
    assert_eq!(main.address(), code.main_offset());
    assert!(main.size() > 0);

    for helper in ["__gotoc_print_int", "__gotoc_print_bool"] {
        let sym = file.symbol_by_name(helper).unwrap();
        assert!(sym.is_local(), "{helper} should be local");
    }
    assert!(file.symbol_by_name("_start").is_none());
    assert!(!file
        .symbols()
        .any(|s| s.name().map_or(false, |n| n.starts_with(LABEL_SYMBOL_PREFIX))));
}

#[test]
fn entry_point_object() {
    let code = machine_code(true);
    let obj = build_object(&code, false, None).unwrap();
    let file = File::parse(&*obj).unwrap();
    let start = file.symbol_by_name("_start").unwrap();
    assert!(start.is_global());
    assert_eq!(start.address(), 0);
    assert!(file.symbol_by_name("main").unwrap().address() > 0);
}

#[test]
fn debug_label_symbols() {
    let code = machine_code(false);
    let obj = build_object(&code, true, Some("loop.gt")).unwrap();
    let file = File::parse(&*obj).unwrap();
    let label = file
        .symbol_by_name(&format!("{LABEL_SYMBOL_PREFIX}loop"))
        .unwrap();
    assert!(label.is_local());
    let (_, offset) = &code.source_labels[0];
    assert_eq!(label.address(), *offset);
    assert!(file
        .symbols()
        .any(|s| s.kind() == SymbolKind::File && s.name() == Ok("loop.gt")));
}
