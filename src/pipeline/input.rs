//! Input resolution: validate the user-supplied PDF path.
//!
//! pdfium reports a missing or non-PDF file as a generic load failure. We
//! check existence, read permission and the `%PDF` magic bytes up front so
//! the caller gets a specific error instead.

use crate::error::ChunkMdError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local PDF path and return it.
pub fn resolve_input(input: impl AsRef<Path>) -> Result<PathBuf, ChunkMdError> {
    let path = input.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(ChunkMdError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic == b"%PDF" => {}
                Ok(()) => return Err(ChunkMdError::NotAPdf { path, magic }),
                Err(_) => {
                    return Err(ChunkMdError::CorruptPdf {
                        path,
                        detail: "file is shorter than a PDF header".into(),
                    })
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ChunkMdError::PermissionDenied { path });
        }
        Err(_) => return Err(ChunkMdError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Where output goes when none is given: next to the input, `.md` extension.
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("md")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let err = resolve_input("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, ChunkMdError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, ChunkMdError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04 not a pdf").unwrap();
        match resolve_input(tmp.path()).unwrap_err() {
            ChunkMdError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%P").unwrap();
        assert!(matches!(
            resolve_input(tmp.path()).unwrap_err(),
            ChunkMdError::CorruptPdf { .. }
        ));
    }

    #[test]
    fn pdf_header_accepted() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_input(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn default_output_replaces_extension() {
        assert_eq!(
            default_output_path(Path::new("/docs/report.pdf")),
            PathBuf::from("/docs/report.md")
        );
        assert_eq!(default_output_path(Path::new("notes")), PathBuf::from("notes.md"));
    }
}
