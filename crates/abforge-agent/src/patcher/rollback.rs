//! `<file>.rollback` sidecars for single-file restore

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use abforge_core::PatchError;

const ROLLBACK_SUFFIX: &str = ".rollback";

/// `src/Button.tsx` -> `src/Button.tsx.rollback`
pub fn rollback_path(file: &Path) -> PathBuf {
    let mut name: OsString = file.as_os_str().to_owned();
    name.push(ROLLBACK_SUFFIX);
    PathBuf::from(name)
}

pub fn has_rollback(file: &Path) -> bool {
    rollback_path(file).is_file()
}

/// Copy `file` to its sidecar.
///
/// An existing sidecar is kept as is: it holds the oldest snapshot, taken
/// before any patch, and is only consumed by [`restore_from_rollback`].
pub fn create_rollback(file: &Path) -> Result<PathBuf, PatchError> {
    if !file.is_file() {
        return Err(PatchError::FileNotFound(file.to_path_buf()));
    }
    let sidecar = rollback_path(file);
    if sidecar.is_file() {
        tracing::debug!("keeping existing rollback copy {}", sidecar.display());
        return Ok(sidecar);
    }
    std::fs::copy(file, &sidecar).map_err(|source| PatchError::Io {
        path: sidecar.clone(),
        source,
    })?;
    tracing::debug!("rollback copy written to {}", sidecar.display());
    Ok(sidecar)
}

/// Move the sidecar back over `file`
pub fn restore_from_rollback(file: &Path) -> Result<(), PatchError> {
    let sidecar = rollback_path(file);
    if !sidecar.is_file() {
        return Err(PatchError::RollbackNotFound(file.to_path_buf()));
    }
    std::fs::rename(&sidecar, file).map_err(|source| PatchError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    tracing::info!("restored {} from rollback copy", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_bytes_and_removes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Button.tsx");
        let original = b"export const Button = () => {\r\n  return null;\r\n};\r\n\xef\xbb\xbf";
        std::fs::write(&file, original).unwrap();

        let sidecar = create_rollback(&file).unwrap();
        assert_eq!(sidecar, dir.path().join("Button.tsx.rollback"));

        std::fs::write(&file, "patched").unwrap();
        restore_from_rollback(&file).unwrap();

        assert_eq!(std::fs::read(&file).unwrap(), original.to_vec());
        assert!(!sidecar.exists());
        assert!(!has_rollback(&file));
    }

    #[test]
    fn existing_copy_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Button.tsx");
        std::fs::write(&file, "original").unwrap();
        create_rollback(&file).unwrap();

        std::fs::write(&file, "patched").unwrap();
        let sidecar = create_rollback(&file).unwrap();
        assert_eq!(std::fs::read_to_string(&sidecar).unwrap(), "original");

        restore_from_rollback(&file).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
    }

    #[test]
    fn restore_without_copy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Hero.tsx");
        std::fs::write(&file, "x").unwrap();

        let err = restore_from_rollback(&file).unwrap_err();
        assert!(matches!(err, PatchError::RollbackNotFound(_)));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "x");
    }

    #[test]
    fn rollback_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_rollback(&dir.path().join("Nope.tsx")).unwrap_err();
        assert!(matches!(err, PatchError::FileNotFound(_)));
    }
}
