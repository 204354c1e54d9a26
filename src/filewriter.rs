//! File write strategies for installation.
//!
//! Fresh installs write through [`AtomicFileWriter`]: content goes to a
//! temp file in the target directory and is renamed into place only
//! after the content has been verified and fsynced, so an aborted
//! install never leaves a half-written file under its final name.
//! Sync writes through [`InPlaceFileWriter`]; the tree is quiescent
//! during sync and the installed-manifest sidecar is absent throughout,
//! so a crash forces a fresh install on the next attempt.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A destination file being written, committed only on success.
pub trait FileWriter: Write {
    /// Finish the file. Uncommitted writers clean up after themselves.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Writes to a sibling temp file, then fsync + rename over the target.
pub struct AtomicFileWriter {
    temp: NamedTempFile,
    target: PathBuf,
}

impl AtomicFileWriter {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
        Ok(AtomicFileWriter {
            temp,
            target: target.to_path_buf(),
        })
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl FileWriter for AtomicFileWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.temp.flush()?;
        self.temp.as_file().sync_all()?;
        let AtomicFileWriter { temp, target } = *self;
        match temp.persist(&target) {
            Ok(_) => Ok(()),
            Err(persist_err) => {
                // Rename-over is not universal; unlink the target and retry.
                fs::remove_file(&target).ok();
                persist_err
                    .file
                    .persist(&target)
                    .map(|_| ())
                    .map_err(|e| Error::Io(e.error))
            }
        }
    }
}

/// Writes the target file directly.
pub struct InPlaceFileWriter {
    file: File,
}

impl InPlaceFileWriter {
    pub fn create(target: &Path) -> Result<Self> {
        Ok(InPlaceFileWriter {
            file: File::create(target)?,
        })
    }
}

impl Write for InPlaceFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl FileWriter for InPlaceFileWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
