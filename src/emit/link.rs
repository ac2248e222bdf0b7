//! System linker integration.

use std::path::Path;
use std::process::Command;

use crate::core::error::{CompileError, CompileResult};

/// The linker used for an object with or without its own `_start`.
pub fn linker_for(entry_point: bool) -> &'static str {
    if entry_point {
        "ld"
    } else {
        "cc"
    }
}

/// Link `object` into an executable and return the executable's bytes.
///
/// Objects with an `_start` stub are linked with `ld` and need nothing else;
/// otherwise `cc` supplies the C runtime that calls `main`. Both the object
/// and the executable live in a scratch directory removed afterwards.
pub fn link_executable(object: &[u8], entry_point: bool) -> CompileResult<Vec<u8>> {
    let scratch = tempfile::tempdir().map_err(|e| CompileError::io("<link scratch>", e))?;
    let obj_path = scratch.path().join("program.o");
    let exe_path = scratch.path().join("program");
    std::fs::write(&obj_path, object).map_err(|e| CompileError::io(&obj_path, e))?;

    let linker = linker_for(entry_point);
    let mut cmd = Command::new(linker);
    cmd.arg("-o").arg(&exe_path).arg(&obj_path);
    if entry_point {
        cmd.args(["-z", "noexecstack"]);
    } else {
        cmd.arg("-Wl,-z,noexecstack");
    }
    log::debug!("running {:?}", cmd);

    let output = cmd.output().map_err(|e| CompileError::Link {
        reason: format!("failed to invoke linker ({linker}): {e}"),
    })?;
    if !output.status.success() {
        return Err(CompileError::Link {
            reason: format!(
                "{linker} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    read_executable(&exe_path)
}

fn read_executable(path: &Path) -> CompileResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CompileError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linker_choice() {
        assert_eq!(linker_for(true), "ld");
        assert_eq!(linker_for(false), "cc");
    }

    #[test]
    fn test_garbage_object_fails_to_link() {
        // Either the linker rejects the input or it is missing entirely; both are link errors.
        let err = link_executable(b"not an object", true).unwrap_err();
        assert!(matches!(err, CompileError::Link { .. }));
    }
}
