//! Remote bucket blob store.
//!
//! The vendor SDK stays behind the [`BucketClient`] seam; the store
//! itself only adds key handling. An optional path prefix partitions a
//! single bucket into independent tree stores.

use super::{BlobMetadata, BlobStore};
use crate::{Error, Result};

/// Interface to a remote object bucket.
///
/// Implemented outside the core by whichever SDK talks to the actual
/// service; keys at this boundary are full object keys.
pub trait BucketClient {
    /// Fetch an object, or `None` when the key is absent.
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_object(&self, key: &str, body: &[u8]) -> Result<()>;

    /// Delete an object. Absent keys are not an error.
    fn delete_object(&self, key: &str) -> Result<()>;

    /// List the full keys of all objects starting with `prefix`.
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Object metadata, or `None` when the key is absent.
    fn head_object(&self, key: &str) -> Result<Option<BlobMetadata>>;

    /// Mint a pre-signed GET URL for an object.
    fn presign_get(&self, key: &str, expires_in_secs: u64) -> Result<String>;
}

/// A blob store backed by a remote bucket.
pub struct BucketStore<C> {
    client: C,
    prefix: Option<String>,
}

impl<C: BucketClient> BucketStore<C> {
    pub fn new(client: C) -> Self {
        BucketStore {
            client,
            prefix: None,
        }
    }

    /// Partition the bucket: every key is stored below `prefix`.
    pub fn with_prefix(client: C, prefix: &str) -> Self {
        BucketStore {
            client,
            prefix: Some(prefix.trim_matches('/').to_string()),
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) if !key.is_empty() => format!("{}/{}", prefix, key),
            Some(prefix) => prefix.clone(),
            None => key.to_string(),
        }
    }
}

impl<C: BucketClient> BlobStore for BucketStore<C> {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.client.head_object(&self.full_key(key))?.is_some())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.client
            .get_object(&self.full_key(key))?
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        self.client.put_object(&self.full_key(key), body)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.client.delete_object(&self.full_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.full_key(prefix);
        let keys = self.client.list_objects(&base)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                k.strip_prefix(&base)
                    .map(|suffix| suffix.trim_start_matches('/').to_string())
            })
            .filter(|suffix| !suffix.is_empty())
            .collect())
    }

    fn metadata(&self, key: &str) -> Result<BlobMetadata> {
        self.client
            .head_object(&self.full_key(key))?
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    fn url(&self, key: &str, expires_in_secs: u64) -> Result<String> {
        self.client.presign_get(&self.full_key(key), expires_in_secs)
    }
}

/// In-memory bucket used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    /// A shared in-memory [`BucketClient`].
    ///
    /// Clones share the same object map, so several stores can address
    /// one bucket. Pre-signed URLs use a `mem://` scheme that
    /// [`MemFetcher`] resolves against the same bucket.
    #[derive(Clone, Default)]
    pub struct MemBucket {
        objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    }

    impl MemBucket {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn key_count(&self) -> usize {
            self.objects.lock().unwrap().len()
        }
    }

    impl BucketClient for MemBucket {
        fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        fn put_object(&self, key: &str, body: &[u8]) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), body.to_vec());
            Ok(())
        }

        fn delete_object(&self, key: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        fn head_object(&self, key: &str) -> Result<Option<BlobMetadata>> {
            Ok(self.objects.lock().unwrap().get(key).map(|body| BlobMetadata {
                size: body.len() as u64,
                last_modified: SystemTime::UNIX_EPOCH,
            }))
        }

        fn presign_get(&self, key: &str, expires_in_secs: u64) -> Result<String> {
            Ok(format!("mem://{}?expires={}", key, expires_in_secs))
        }
    }

    /// Resolves `mem://` URLs minted by [`MemBucket::presign_get`].
    pub struct MemFetcher {
        pub bucket: MemBucket,
    }

    impl crate::http::HttpFetcher for MemFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            let key = url
                .strip_prefix("mem://")
                .and_then(|rest| rest.split('?').next())
                .ok_or_else(|| Error::Http {
                    url: url.to_string(),
                    reason: "malformed url".to_string(),
                })?;
            self.bucket
                .get_object(key)?
                .ok_or_else(|| Error::Http {
                    url: url.to_string(),
                    reason: "status 404".to_string(),
                })
        }
    }
}
