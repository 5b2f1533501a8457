//! Writing build artifacts: code, headers, dependency lists and offload
//! stubs.

pub mod deps;
pub mod header;
pub mod stubs;

use crate::codegen::CodegenBackend;
use crate::error::{BuildError, Result};
use crate::options::OutputType;
use lanec_core::diagnostics::{Diagnostic, DiagnosticManager};
use lanec_core::lir::LirProgram;
use lanec_core::target::Target;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use deps::{render_deps, DepsFormat};
pub use header::{render_header, DispatchHeader, HeaderOptions};
pub use stubs::{render_dev_stub, render_host_stub};

/// Name of a per-target artifact: `_<isa>` goes before the last suffix of
/// the file name, or at the end when there is none.
pub fn target_file_name(path: &Path, isa: &str) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        let mut renamed = path.as_os_str().to_os_string();
        renamed.push(format!("_{}", isa));
        return PathBuf::from(renamed);
    };
    let mut renamed = stem.to_os_string();
    renamed.push(format!("_{}", isa));
    if let Some(extension) = path.extension() {
        renamed.push(".");
        renamed.push(extension);
    }
    path.with_file_name(renamed)
}

/// Warning text when `path` has a suffix unusual for `kind`. Names without
/// a suffix and dependency files are never questioned.
pub fn suffix_warning(path: &Path, kind: OutputType) -> Option<String> {
    let expected = kind.expected_suffixes();
    if expected.is_empty() {
        return None;
    }
    let file_name = path.file_name()?.to_string_lossy();
    let (_, suffix) = file_name.rsplit_once('.')?;
    if expected
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(suffix))
    {
        return None;
    }
    Some(format!(
        "Emitting {} file, but filename \"{}\" has suffix \"{}\"?",
        kind.description(),
        path.display(),
        suffix
    ))
}

pub fn is_stdout(path: &Path) -> bool {
    path == Path::new("-")
}

/// Writes `bytes` to `path`, or to stdout for `-`.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if is_stdout(path) {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(bytes)
            .and_then(|_| stdout.flush())
            .map_err(|err| BuildError::io("<stdout>", err))?;
        return Ok(());
    }
    debug!("writing {}", path.display());
    fs::write(path, bytes).map_err(|err| BuildError::io(path, err))
}

/// Runs `backend` on `program` and writes the artifact to `path`.
pub fn write_output(
    backend: &dyn CodegenBackend,
    program: &LirProgram,
    target: &Target,
    kind: OutputType,
    path: &Path,
    diagnostics: &DiagnosticManager,
) -> Result<()> {
    if !is_stdout(path) {
        if let Some(message) = suffix_warning(path, kind) {
            warn!("{}", message);
            diagnostics.warning(Diagnostic::warning(message));
        }
    }
    let mut bytes = Vec::new();
    backend.emit(program, target, kind, &mut bytes)?;
    write_file(path, &bytes)
}

/// Writes generated text after the same suffix check as code artifacts.
pub fn write_text(
    text: &str,
    kind: OutputType,
    path: &Path,
    diagnostics: &DiagnosticManager,
) -> Result<()> {
    if let Some(message) = suffix_warning(path, kind) {
        warn!("{}", message);
        diagnostics.warning(Diagnostic::warning(message));
    }
    write_file(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_goes_before_the_last_suffix() {
        assert_eq!(
            target_file_name(Path::new("scale.o"), "avx2"),
            PathBuf::from("scale_avx2.o")
        );
        assert_eq!(
            target_file_name(Path::new("out/lib.tar.gz"), "sse2"),
            PathBuf::from("out/lib.tar_sse2.gz")
        );
        assert_eq!(
            target_file_name(Path::new("build.d/kernel"), "sse4"),
            PathBuf::from("build.d/kernel_sse4")
        );
    }

    #[cfg(unix)]
    #[test]
    fn target_names_keep_non_utf8_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new("out").join(OsStr::from_bytes(b"k\xffernel.o"));
        assert_eq!(
            target_file_name(&path, "avx2"),
            Path::new("out").join(OsStr::from_bytes(b"k\xffernel_avx2.o"))
        );
    }

    #[test]
    fn unusual_suffixes_are_questioned() {
        assert_eq!(suffix_warning(Path::new("a.o"), OutputType::Object), None);
        assert_eq!(suffix_warning(Path::new("a.OBJ"), OutputType::Object), None);
        assert_eq!(suffix_warning(Path::new("a.HPP"), OutputType::Header), None);
        assert_eq!(suffix_warning(Path::new("noext"), OutputType::Asm), None);
        assert_eq!(suffix_warning(Path::new("a.txt"), OutputType::Deps), None);
        assert_eq!(
            suffix_warning(Path::new("kernel.s"), OutputType::Bitcode).as_deref(),
            Some("Emitting LLVM bitcode file, but filename \"kernel.s\" has suffix \"s\"?")
        );
        assert!(suffix_warning(Path::new("stub.h"), OutputType::HostStub).is_some());
    }

    #[test]
    fn writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        write_file(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        let missing = dir.path().join("no/such/dir/x.txt");
        assert!(matches!(
            write_file(&missing, b""),
            Err(BuildError::Io { .. })
        ));
    }
}
