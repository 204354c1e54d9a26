//! Keyed byte-blob stores.
//!
//! A [`BlobStore`] maps slash-delimited logical keys to byte blobs. The
//! tree store keeps its manifests and chunks behind this interface, so
//! the same orchestration code runs against a remote bucket and the
//! local on-disk cache. Keys are always POSIX-style at this boundary;
//! implementations translate to their own path conventions internally.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::SystemTime;

pub mod bucket;
pub mod local;

pub use bucket::{BucketClient, BucketStore};
pub use local::LocalBlobStore;

/// Size and modification time of a stored blob, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    pub last_modified: SystemTime,
}

/// A keyed byte-blob store.
pub trait BlobStore {
    /// Returns true if a blob with the given key exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Get the blob stored under `key`.
    ///
    /// Fails with `NotFound` when the key is absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store a blob under `key`, overwriting any existing value.
    ///
    /// The update is observably atomic: a concurrent reader sees either
    /// the old blob or the new one, never a torn write.
    fn put(&self, key: &str, body: &[u8]) -> Result<()>;

    /// Remove the blob under `key`. Succeeds silently when absent.
    fn remove(&self, key: &str) -> Result<()>;

    /// List the key-suffixes below `prefix`, relative to it.
    ///
    /// Order is unspecified.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size and modification time of the blob under `key`.
    fn metadata(&self, key: &str) -> Result<BlobMetadata>;

    /// Mint a pre-signed fetch URL for `key`.
    ///
    /// Optional capability; backends without it fail with `Unsupported`.
    fn url(&self, key: &str, expires_in_secs: u64) -> Result<String> {
        let _ = expires_in_secs;
        Err(Error::Unsupported {
            operation: format!("pre-signed url for {}", key),
        })
    }
}

/// Join logical key components with `/`.
pub fn join_key<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    parts.into_iter().collect::<Vec<_>>().join("/")
}

/// Split a logical key into its components.
pub fn split_key(key: &str) -> Vec<&str> {
    key.split('/').filter(|p| !p.is_empty()).collect()
}

/// Fetch and decode a JSON value stored under `key`.
pub fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<T> {
    let body = store.get(key)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Encode a value as JSON and store it under `key`.
pub fn put_json<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    store.put(key, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers() {
        assert_eq!(join_key(["chunks", "raw", "ab", "cd"]), "chunks/raw/ab/cd");
        assert_eq!(split_key("raw/ab/cd"), vec!["raw", "ab", "cd"]);
        assert_eq!(split_key("/raw//ab"), vec!["raw", "ab"]);
    }
}
