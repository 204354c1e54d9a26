//! Progress reporting for long-running operations.
//!
//! Upload and download report `(transferred, cached)` byte pairs once
//! per chunk; install reports bytes written. Closures implement the
//! traits directly, so tests can capture callbacks without ceremony.

use std::io::Write;

/// Progress callback for upload and download operations.
pub trait TransferProgress {
    /// Called once per chunk with the bytes transferred over the wire
    /// and the bytes satisfied from an existing copy.
    fn on_chunk(&mut self, transferred: u64, cached: u64);
}

impl<F: FnMut(u64, u64)> TransferProgress for F {
    fn on_chunk(&mut self, transferred: u64, cached: u64) {
        self(transferred, cached)
    }
}

/// Progress callback for install and sync operations.
pub trait InstallProgress {
    /// Called once per chunk with the uncompressed bytes written.
    fn on_bytes(&mut self, n: u64);
}

impl<F: FnMut(u64)> InstallProgress for F {
    fn on_bytes(&mut self, n: u64) {
        self(n)
    }
}

/// Console transfer reporter: accumulates counts on one terminal line.
pub struct ConsoleTransferProgress {
    transferred: u64,
    cached: u64,
    total: Option<u64>,
}

impl ConsoleTransferProgress {
    pub fn new() -> Self {
        ConsoleTransferProgress {
            transferred: 0,
            cached: 0,
            total: None,
        }
    }

    /// Report against a known total size.
    pub fn with_total(total: u64) -> Self {
        ConsoleTransferProgress {
            total: Some(total),
            ..Self::new()
        }
    }
}

impl Default for ConsoleTransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferProgress for ConsoleTransferProgress {
    fn on_chunk(&mut self, transferred: u64, cached: u64) {
        self.transferred += transferred;
        self.cached += cached;
        match self.total {
            Some(total) => print!(
                "\r{} transferred + {} cached / {} total",
                self.transferred, self.cached, total
            ),
            None => print!("\r{} transferred + {} cached", self.transferred, self.cached),
        }
        std::io::stdout().flush().ok();
    }
}

/// Console install reporter.
pub struct ConsoleInstallProgress {
    written: u64,
    total: u64,
}

impl ConsoleInstallProgress {
    pub fn new(total: u64) -> Self {
        ConsoleInstallProgress { written: 0, total }
    }
}

impl InstallProgress for ConsoleInstallProgress {
    fn on_bytes(&mut self, n: u64) {
        self.written += n;
        print!("\r{} / {} installed", self.written, self.total);
        std::io::stdout().flush().ok();
    }
}
