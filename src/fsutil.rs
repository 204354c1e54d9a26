//! Local filesystem helpers for install and sync.

use crate::{Error, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// All file paths below `root`, relative to it, in manifest form
/// (`/`-separated).
pub fn relative_file_paths(root: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walked path is below its base");
        paths.push(crate::package::path_from_file_system(rel));
    }
    Ok(paths)
}

/// Remove empty directories below `path`, depth first. The root itself
/// is removed only when `remove_root` is set.
pub fn remove_empty_directories(path: &Path, remove_root: bool) -> Result<()> {
    if !path.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_empty_directories(&entry.path(), true)?;
        }
    }
    if remove_root && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_paths_are_posix_form() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("code"))?;
        fs::write(dir.path().join("code/file1.py"), b"x")?;
        fs::write(dir.path().join("top.txt"), b"y")?;

        let mut paths = relative_file_paths(dir.path())?;
        paths.sort();
        assert_eq!(paths, vec!["code/file1.py", "top.txt"]);
        Ok(())
    }

    #[test]
    fn prunes_empty_directories_but_not_root() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("a/b/c"))?;
        fs::create_dir_all(dir.path().join("keep"))?;
        fs::write(dir.path().join("keep/file"), b"x")?;

        remove_empty_directories(dir.path(), false)?;

        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("keep/file").exists());
        assert!(dir.path().exists());
        Ok(())
    }
}
