//! Fixed-size chunking with streaming SHA-1.
//!
//! Files are split into `chunk_size`-byte chunks (the last one may be
//! short). The reader hashes each chunk and accumulates the whole-file
//! SHA-1 in the same pass, so a file is never read twice.

use crate::Result;
use sha1::{Digest, Sha1};
use std::io::Read;

/// SHA-1 of a byte slice, as lowercase hex.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// One chunk of a file, with the hash of its bytes.
pub struct Chunk {
    pub data: Vec<u8>,
    pub sha1: String,
}

/// Splits a reader into fixed-size chunks while hashing the whole stream.
pub struct ChunkReader<R> {
    inner: R,
    chunk_size: usize,
    file_hasher: Sha1,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        ChunkReader {
            inner,
            chunk_size,
            file_hasher: Sha1::new(),
        }
    }

    /// Read the next chunk, or `None` at end of stream.
    ///
    /// Every chunk except possibly the last is exactly `chunk_size`
    /// bytes; chunks are never empty. A zero-byte stream yields no
    /// chunks at all.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let data = read_up_to(&mut self.inner, self.chunk_size)?;
        if data.is_empty() {
            return Ok(None);
        }
        self.file_hasher.update(&data);
        let sha1 = sha1_hex(&data);
        Ok(Some(Chunk { data, sha1 }))
    }

    /// Finish the stream, returning the SHA-1 of all bytes read.
    ///
    /// For a zero-byte stream this is the SHA-1 of the empty string.
    pub fn file_sha1(self) -> String {
        hex::encode(self.file_hasher.finalize())
    }
}

/// Read up to `n` bytes, short only at end of stream.
pub fn read_up_to<R: Read>(reader: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    Ok(buf)
}
