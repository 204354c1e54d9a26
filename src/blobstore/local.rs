//! Filesystem-backed blob store.
//!
//! Used both for the local download cache and for directory-backed
//! stores. Logical keys map to paths below the root directory; puts go
//! through a sibling temp file and a rename so concurrent readers never
//! observe a partial blob.

use super::{BlobMetadata, BlobStore};
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// A blob store rooted at a local directory.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(LocalBlobStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

impl BlobStore for LocalBlobStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.full_path(key).exists())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    key: key.to_string(),
                }
            } else {
                Error::Io(e)
            }
        })
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        let path = self.full_path(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(body)?;
        temp.flush()?;
        temp.as_file().sync_all()?;

        match temp.persist(&path) {
            Ok(_) => Ok(()),
            Err(persist_err) => {
                // Rename-over fails on some platforms; unlink and retry.
                fs::remove_file(&path).ok();
                persist_err
                    .file
                    .persist(&path)
                    .map(|_| ())
                    .map_err(|e| Error::Io(e.error))
            }
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.full_path(key);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.full_path(prefix);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&base)
                .expect("walked path is below its base");
            results.push(crate::package::path_from_file_system(rel));
        }
        Ok(results)
    }

    fn metadata(&self, key: &str) -> Result<BlobMetadata> {
        let meta = fs::metadata(self.full_path(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    key: key.to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        Ok(BlobMetadata {
            size: meta.len(),
            last_modified: meta.modified()?,
        })
    }
}
