//! End-to-end tests of the gotoc binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn gotoc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gotoc"))
}

fn program(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/programs")
        .join(name)
}

fn run(args: &[&str]) -> Output {
    gotoc().args(args).output().expect("failed to start gotoc")
}

fn write_source(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

#[test]
fn two_strategies_are_a_usage_error() {
    let countdown = program("countdown.gt");
    let output = run(&[countdown.to_str().unwrap(), "--emit-ir", "--emit-obj"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"), "{stderr}");
}

#[test]
fn missing_source_is_a_usage_error() {
    let output = run(&["--emit-asm"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn emit_ir_to_stdout() {
    let countdown = program("countdown.gt");
    let output = run(&[countdown.to_str().unwrap(), "--emit-ir", "-g"]);
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.starts_with("; gotoc IR\n"));
    assert!(text.contains("slot %0 n : int"));
    assert!(text.contains("top:\n"));
    assert!(text.contains("; line "));
}

#[test]
fn emit_asm_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("countdown.s");
    let countdown = program("countdown.gt");
    let output = run(&[
        countdown.to_str().unwrap(),
        "--emit-asm",
        "--opt",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{output:?}");
    assert!(output.stdout.is_empty());
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains("\t.globl\tmain\n"));
    assert!(text.contains("main:\n"));
}

#[test]
fn compile_errors_exit_with_one_and_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("bad.o");
    let bad = program("undefined_label.gt");
    let output = run(&[
        bad.to_str().unwrap(),
        "--emit-obj",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("undefined label `nowhere`"), "{stderr}");
    assert!(!out.exists());
}

#[test]
fn viz_writes_digraph() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "one.gt", "exit 1;\n");
    let dot = dir.path().join("grammar.dot");
    let output = run(&[
        source.to_str().unwrap(),
        "--emit-ir",
        "--viz",
        dot.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let text = std::fs::read_to_string(&dot).unwrap();
    assert!(text.starts_with("digraph grammar {\n"));
    assert!(text.contains("\"program-1\" -> \"stmt-1\" [label=\"10\"];\n"));
    assert!(text.ends_with("}\n"));
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod native {
    use super::*;

    #[test]
    fn jit_runs_program() {
        let fib = program("fibonacci.gt");
        for extra in [&[][..], &["--stack-based"][..], &["--opt=3"][..]] {
            let mut args = vec![fib.to_str().unwrap()];
            args.extend_from_slice(extra);
            let output = run(&args);
            assert_eq!(output.status.code(), Some(55), "{extra:?}");
            let stdout = String::from_utf8(output.stdout).unwrap();
            assert_eq!(stdout.lines().count(), 10);
            assert!(stdout.ends_with("34\n55\n"));
        }
    }

    #[test]
    fn jit_division_trap() {
        let output = run(&[program("division_by_zero.gt").to_str().unwrap(), "--jit"]);
        assert_eq!(output.status.code(), Some(101));
        assert_eq!(output.stdout, b"1\n");
        assert_eq!(output.stderr, b"runtime error: division by zero\n");
    }

    /// A goto to the immediately following label must not change behavior.
    #[test]
    fn goto_to_next_label_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let with_goto = write_source(
            dir.path(),
            "with.gt",
            "let x = 4;\nprint x;\ngoto next;\nnext:\nprint x * 2;\nexit x;\n",
        );
        let without = write_source(
            dir.path(),
            "without.gt",
            "let x = 4;\nprint x;\nnext:\nprint x * 2;\nexit x;\n",
        );
        let have_ld = Command::new("ld").arg("--version").output().is_ok();

        for flags in [&["--jit"][..], &["--jit", "--stack-based"][..], &["--emit-exe", "--entry-point"][..]] {
            if flags[0] == "--emit-exe" && !have_ld {
                continue;
            }
            let mut results = Vec::new();
            for source in [&with_goto, &without] {
                let mut args = vec![source.to_str().unwrap()];
                args.extend_from_slice(flags);
                if flags[0] == "--emit-exe" {
                    let exe = source.with_extension("bin");
                    args.push("-o");
                    args.push(exe.to_str().unwrap());
                    let build = run(&args);
                    assert!(build.status.success(), "{build:?}");
                    results.push(Command::new(&exe).output().unwrap());
                } else {
                    results.push(run(&args));
                }
            }
            assert_eq!(results[0].stdout, b"4\n8\n", "{flags:?}");
            assert_eq!(results[0].stdout, results[1].stdout, "{flags:?}");
            assert_eq!(results[0].status.code(), Some(4), "{flags:?}");
            assert_eq!(results[0].status.code(), results[1].status.code(), "{flags:?}");
        }

        for source in [&with_goto, &without] {
            let output = run(&[source.to_str().unwrap(), "--emit-ir", "--opt=3"]);
            assert!(output.status.success());
        }
    }

    #[test]
    fn emit_asm_builds_and_matches_jit() {
        if Command::new("cc").arg("--version").output().is_err() {
            eprintln!("skipping: cc not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        for name in ["fibonacci.gt", "booleans.gt", "division_by_zero.gt"] {
            let source = program(name);
            let asm = dir.path().join(name).with_extension("s");
            let exe = dir.path().join(name).with_extension("exe");
            let build = run(&[
                source.to_str().unwrap(),
                "--emit-asm",
                "-g",
                "-o",
                asm.to_str().unwrap(),
            ]);
            assert!(build.status.success(), "{build:?}");

            let cc = Command::new("cc")
                .arg("-o")
                .arg(&exe)
                .arg(&asm)
                .output()
                .unwrap();
            assert!(cc.status.success(), "{}", String::from_utf8_lossy(&cc.stderr));

            let native = Command::new(&exe).output().unwrap();
            let jit = run(&[source.to_str().unwrap(), "--jit"]);
            assert_eq!(native.stdout, jit.stdout, "{name}");
            assert_eq!(native.stderr, jit.stderr, "{name}");
            assert_eq!(native.status.code(), jit.status.code(), "{name}");
        }
    }

    #[test]
    fn emit_exe_without_entry_point_uses_cc() {
        let have_cc = Command::new("cc").arg("--version").output().is_ok();
        if !have_cc {
            eprintln!("skipping: cc not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("countdown");
        let countdown = program("countdown.gt");
        let build = run(&[
            countdown.to_str().unwrap(),
            "--emit-exe",
            "-o",
            exe.to_str().unwrap(),
        ]);
        assert!(build.status.success(), "{build:?}");
        let output = Command::new(&exe).output().unwrap();
        assert_eq!(output.stdout, b"3\n2\n1\n");
        assert_eq!(output.status.code(), Some(0));
    }
}
