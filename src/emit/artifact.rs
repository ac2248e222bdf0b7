//! All-or-nothing artifact output.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::core::error::{CompileError, CompileResult};

/// Write `bytes` to `path`, or to standard output when `path` is `None`.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// failed run never leaves a truncated artifact behind. Standard output
/// receives the whole artifact in a single write.
pub fn write_artifact(path: Option<&Path>, bytes: &[u8], executable: bool) -> CompileResult<()> {
    match path {
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(bytes)
                .and_then(|_| lock.flush())
                .map_err(|e| CompileError::io("<stdout>", e))
        }
        Some(path) => write_file(path, bytes, executable),
    }
}

fn write_file(path: &Path, bytes: &[u8], executable: bool) -> CompileResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| CompileError::io(dir, e))?;
    temp.write_all(bytes)
        .and_then(|_| temp.flush())
        .map_err(|e| CompileError::io(temp.path(), e))?;
    if executable {
        set_executable(temp.as_file()).map_err(|e| CompileError::io(path, e))?;
    }
    temp.persist(path)
        .map_err(|e| CompileError::io(path, e.error))?;
    log::debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(unix)]
fn set_executable(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.s");
        std::fs::write(&path, "old contents that are longer").unwrap();
        write_artifact(Some(&path), b"new", false).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        // only the artifact is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_directory_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.o");
        let err = write_artifact(Some(&path), b"data", false).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.out");
        write_artifact(Some(&path), b"\x7fELF", true).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
