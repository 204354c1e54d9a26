//! The directory tree store.
//!
//! A [`TreeStore`] binds a package store (usually a remote bucket) to a
//! local chunk cache sharing the same layout. Trees are uploaded as
//! named packages of content-addressed chunks, downloaded through the
//! cache, and installed or synchronized onto the local filesystem with
//! integrity verification along the way.
//!
//! Store layout:
//!
//! ```text
//! config                              store configuration
//! trees/<packageName>                 package manifests
//! meta/<metaPackageName>              metapackage manifests
//! chunks/raw/<sha1[0:2]>/<sha1[2:]>   raw chunk blobs
//! chunks/zlib/<sha1[0:2]>/<sha1[2:]>  deflate-compressed chunk blobs
//! ```

use crate::blobstore::{self, BlobMetadata, BlobStore};
use crate::chunk::{self, ChunkReader};
use crate::codec;
use crate::config::{
    self, InstallProperties, TreeStoreConfig, INSTALL_PROPERTIES_FILE,
};
use crate::filewriter::{AtomicFileWriter, FileWriter, InPlaceFileWriter};
use crate::fsutil;
use crate::http::HttpFetcher;
use crate::metapackage::MetaPackage;
use crate::package::{
    self, Encoding, FileChunk, Package, PackageFile, INSTALLED_PACKAGE_FILE,
};
use crate::progress::{InstallProgress, TransferProgress};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const CONFIG_KEY: &str = "config";
const TREES_PREFIX: &str = "trees";
const META_PREFIX: &str = "meta";
const CHUNKS_PREFIX: &str = "chunks";

/// A chunk's identity within a store: its encoding and sha1.
pub type ChunkRef = (Encoding, String);

/// Result of comparing a package against an installed directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallComparison {
    /// Paths in the package but absent on disk
    pub missing: BTreeSet<String>,
    /// Paths on disk but absent from the package (sidecars excluded)
    pub extra: BTreeSet<String>,
    /// Paths present in both whose content differs
    pub diffs: BTreeSet<String>,
}

impl InstallComparison {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.diffs.is_empty()
    }
}

/// A chunk blob that failed validation, with whatever metadata the
/// store could supply.
#[derive(Debug)]
pub struct CorruptChunk {
    pub key: String,
    pub metadata: Option<BlobMetadata>,
}

enum WriteMode {
    Atomic,
    InPlace,
}

/// A directory tree store bound to a package store and a local cache.
pub struct TreeStore {
    store: Option<Box<dyn BlobStore>>,
    cache: Box<dyn BlobStore>,
    config: Option<TreeStoreConfig>,
    dry_run: bool,
}

impl TreeStore {
    /// Create a new tree store, writing its configuration.
    ///
    /// Fails with `AlreadyInitialized` when the store already holds a
    /// configuration.
    pub fn create(
        store: Box<dyn BlobStore>,
        cache: Box<dyn BlobStore>,
        config: TreeStoreConfig,
    ) -> Result<TreeStore> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidManifest {
                reason: "chunkSize must be positive".to_string(),
            });
        }
        if store.exists(CONFIG_KEY)? {
            return Err(Error::AlreadyInitialized);
        }
        blobstore::put_json(store.as_ref(), CONFIG_KEY, &config)?;
        Ok(TreeStore {
            store: Some(store),
            cache,
            config: Some(config),
            dry_run: false,
        })
    }

    /// Open an existing tree store.
    ///
    /// Fails with `NotInitialized` when no configuration exists.
    pub fn open(store: Box<dyn BlobStore>, cache: Box<dyn BlobStore>) -> Result<TreeStore> {
        let config: TreeStoreConfig = blobstore::get_json(store.as_ref(), CONFIG_KEY)
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::NotInitialized,
                e => e,
            })?;
        Ok(TreeStore {
            store: Some(store),
            cache,
            config: Some(config),
            dry_run: false,
        })
    }

    /// Construct a store that only supports pre-signed HTTP download
    /// and local install/sync. Every other operation fails with
    /// `Unsupported`.
    pub fn for_http_only(cache: Box<dyn BlobStore>) -> TreeStore {
        TreeStore {
            store: None,
            cache,
            config: None,
            dry_run: false,
        }
    }

    /// When set, uploads write no remote data and downloads fetch
    /// nothing; progress is still reported and flush only computes.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn config(&self) -> Option<&TreeStoreConfig> {
        self.config.as_ref()
    }

    fn remote(&self) -> Result<&dyn BlobStore> {
        self.store.as_deref().ok_or_else(|| Error::Unsupported {
            operation: "store access on an http-only tree store".to_string(),
        })
    }

    fn chunk_config(&self) -> Result<&TreeStoreConfig> {
        self.config.as_ref().ok_or_else(|| Error::Unsupported {
            operation: "chunking on an http-only tree store".to_string(),
        })
    }

    // ----- upload ---------------------------------------------------

    /// Create a package for the content of `local_dir`.
    ///
    /// Uploads the package manifest and any chunks not already present
    /// in the store. `progress` receives `(transferred, cached)` byte
    /// counts once per chunk.
    pub fn upload(
        &self,
        tree_name: &str,
        description: &str,
        creation_time: NaiveDateTime,
        local_dir: &Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<Package> {
        let files = self.store_tree(self.remote()?, local_dir, progress)?;
        let pkg = Package {
            name: tree_name.to_string(),
            description: description.to_string(),
            creation_time,
            files,
        };
        if !self.dry_run {
            info!("uploading package definition for {}", tree_name);
            blobstore::put_json(self.remote()?, &tree_key(tree_name), &pkg)?;
        }
        Ok(pkg)
    }

    /// Create one package per subdirectory of `variants_dir`, each
    /// combining the files of `common_dir` with the variant's own.
    ///
    /// Packages are named `<tree_name>:<variant>`.
    pub fn upload_many(
        &self,
        tree_name: &str,
        description: &str,
        creation_time: NaiveDateTime,
        common_dir: &Path,
        variants_dir: &Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<Vec<Package>> {
        let common_files = self.store_tree(self.remote()?, common_dir, progress)?;

        let mut variants: Vec<PathBuf> = fs::read_dir(variants_dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        variants.sort();

        let mut packages = Vec::new();
        for variant_dir in variants {
            let variant = variant_dir
                .file_name()
                .and_then(OsStr::to_str)
                .ok_or_else(|| Error::InvalidManifest {
                    reason: format!("unusable variant directory {}", variant_dir.display()),
                })?;
            let variant_files = self.store_tree(self.remote()?, &variant_dir, progress)?;

            let mut files = common_files.clone();
            files.extend(variant_files);
            let pkg = Package {
                name: format!("{}:{}", tree_name, variant),
                description: description.to_string(),
                creation_time,
                files,
            };
            if !self.dry_run {
                blobstore::put_json(self.remote()?, &tree_key(&pkg.name), &pkg)?;
            }
            packages.push(pkg);
        }
        Ok(packages)
    }

    /// Store a metapackage manifest.
    pub fn upload_meta_package(&self, meta: &MetaPackage) -> Result<()> {
        blobstore::put_json(self.remote()?, &meta_key(&meta.name), meta)
    }

    /// Create a package by merging existing packages, each below its
    /// own subdirectory.
    ///
    /// This is a pure manifest operation: no chunks move.
    pub fn create_merged(
        &self,
        tree_name: &str,
        creation_time: NaiveDateTime,
        package_map: &BTreeMap<String, String>,
    ) -> Result<Package> {
        let mut files = Vec::new();
        let mut description = String::from("merged package:");

        for (subdir, sub_tree_name) in package_map {
            let subpackage = self.find_package(sub_tree_name)?;
            for pf in &subpackage.files {
                files.push(PackageFile {
                    sha1: pf.sha1.clone(),
                    path: package::join_install_path(subdir, &pf.path),
                    chunks: pf.chunks.clone(),
                });
            }
            description.push_str(&format!(
                "\n    {} : {} (created {})",
                subdir,
                sub_tree_name,
                crate::timefmt::format_iso(&subpackage.creation_time)
            ));
        }

        let pkg = Package {
            name: tree_name.to_string(),
            description,
            creation_time,
            files,
        };
        if !self.dry_run {
            info!("uploading package definition for {}", tree_name);
            blobstore::put_json(self.remote()?, &tree_key(tree_name), &pkg)?;
        }
        Ok(pkg)
    }

    // ----- find / list / remove / rename ----------------------------

    /// Return the package with the given name.
    ///
    /// Metapackages are detected and resolved against `metadata` into
    /// the equivalent regular package.
    pub fn find(&self, tree_name: &str, metadata: &HashMap<String, String>) -> Result<Package> {
        match self.find_meta_package(tree_name) {
            Ok(meta) => meta.resolve(self, metadata),
            Err(Error::NotFound { .. }) => self.find_package(tree_name),
            Err(e) => Err(e),
        }
    }

    /// Return the package manifest stored under the given name.
    pub fn find_package(&self, tree_name: &str) -> Result<Package> {
        blobstore::get_json(self.remote()?, &tree_key(tree_name))
    }

    /// Return the metapackage manifest stored under the given name.
    pub fn find_meta_package(&self, meta_tree_name: &str) -> Result<MetaPackage> {
        blobstore::get_json(self.remote()?, &meta_key(meta_tree_name))
    }

    /// Names of the available packages.
    pub fn list_packages(&self) -> Result<Vec<String>> {
        self.remote()?.list(TREES_PREFIX)
    }

    /// Names of the available metapackages.
    pub fn list_meta_packages(&self) -> Result<Vec<String>> {
        self.remote()?.list(META_PREFIX)
    }

    /// Remove a package manifest from the store.
    ///
    /// Chunks are left behind for the next [`TreeStore::flush_store`].
    pub fn remove(&self, tree_name: &str) -> Result<()> {
        self.remote()?.remove(&tree_key(tree_name))
    }

    /// Rename a package. Both names momentarily exist, then the source
    /// is removed.
    pub fn rename(&self, from_tree_name: &str, to_tree_name: &str) -> Result<()> {
        let mut pkg = self.find_package(from_tree_name)?;
        pkg.name = to_tree_name.to_string();
        blobstore::put_json(self.remote()?, &tree_key(to_tree_name), &pkg)?;
        self.remote()?.remove(&tree_key(from_tree_name))
    }

    // ----- verify ---------------------------------------------------

    /// Confirm that every chunk of the package is present in the store.
    pub fn verify(&self, pkg: &Package) -> Result<()> {
        verify_in(self.remote()?, pkg)
    }

    /// Confirm that every chunk of the package is present in the local
    /// cache.
    pub fn verify_local(&self, pkg: &Package) -> Result<()> {
        verify_in(self.cache.as_ref(), pkg)
    }

    // ----- download -------------------------------------------------

    /// Fetch all chunks not already present into the local cache.
    ///
    /// Each fetched chunk is decoded and its SHA-1 verified before the
    /// (still-encoded) bytes land in the cache.
    pub fn download(&self, pkg: &Package, progress: &mut dyn TransferProgress) -> Result<()> {
        for pf in &pkg.files {
            for chunk in &pf.chunks {
                let key = chunk_key(&chunk.sha1, chunk.encoding);
                if self.cache.exists(&key)? {
                    progress.on_chunk(0, chunk.size);
                } else {
                    if !self.dry_run {
                        debug!("fetching chunk {} to local cache", chunk.sha1);
                        let stored = self.remote()?.get(&key)?;
                        let data = codec::decompress(&stored, chunk.encoding)?;
                        check_sha1(&data, &chunk.sha1, &key)?;
                        self.cache.put(&key, &stored)?;
                    }
                    progress.on_chunk(chunk.size, 0);
                }
            }
        }
        Ok(())
    }

    /// Like [`TreeStore::download`], but chunks are fetched over HTTP
    /// from the pre-signed URLs embedded in the package.
    ///
    /// The package must have been prepared with
    /// [`TreeStore::add_urls`]; no package store is required.
    pub fn download_http(
        &self,
        pkg: &Package,
        fetcher: &dyn HttpFetcher,
        progress: &mut dyn TransferProgress,
    ) -> Result<()> {
        for pf in &pkg.files {
            for chunk in &pf.chunks {
                let key = chunk_key(&chunk.sha1, chunk.encoding);
                if self.cache.exists(&key)? {
                    progress.on_chunk(0, chunk.size);
                } else {
                    if !self.dry_run {
                        let url = chunk.url.as_deref().ok_or_else(|| Error::InvalidManifest {
                            reason: format!("chunk {} has no presigned url", chunk.sha1),
                        })?;
                        let stored = fetcher.fetch(url)?;
                        let data = codec::decompress(&stored, chunk.encoding)?;
                        check_sha1(&data, &chunk.sha1, &key)?;
                        self.cache.put(&key, &stored)?;
                    }
                    progress.on_chunk(chunk.size, 0);
                }
            }
        }
        Ok(())
    }

    // ----- install / sync -------------------------------------------

    /// Install the package into `target_dir` from the local cache.
    ///
    /// Each file is reconstructed through a temp file and renamed into
    /// place only after its content has been verified, so a failed
    /// install never leaves partial files under their final names.
    pub fn install(
        &self,
        pkg: &Package,
        target_dir: &Path,
        progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        let install_time = chrono::Utc::now().naive_utc();
        fs::create_dir_all(target_dir)?;
        self.install_tree(pkg, target_dir, WriteMode::Atomic, progress)?;
        config::write_install_properties(
            target_dir,
            &InstallProperties {
                tree_name: pkg.name.clone(),
                install_time,
            },
        )
    }

    /// Synchronise `target_dir` with the package, reusing files the
    /// previous sync left behind.
    ///
    /// Without an installed-manifest sidecar the directory is wiped and
    /// installed from scratch. Otherwise only changed files are
    /// rewritten and stale ones deleted. The sidecar is removed before
    /// any destructive step, so an interrupted sync falls back to a
    /// fresh install on the next attempt.
    pub fn sync(
        &self,
        pkg: &Package,
        target_dir: &Path,
        progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        let existing = match package::read_install_package(target_dir) {
            Ok(pkg) => Some(pkg),
            Err(Error::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let install_time = chrono::Utc::now().naive_utc();
        let (sync_pkg, paths_to_remove) = match existing {
            None => {
                if target_dir.exists() {
                    fs::remove_dir_all(target_dir)?;
                }
                fs::create_dir_all(target_dir)?;
                (pkg.clone(), BTreeSet::new())
            }
            Some(existing_pkg) => {
                let (diff, _) = package::package_diff(&existing_pkg, pkg);
                let local_paths: BTreeSet<String> =
                    fsutil::relative_file_paths(target_dir)?.into_iter().collect();
                let target_paths: BTreeSet<String> =
                    pkg.files.iter().map(|f| f.path.clone()).collect();
                let mut to_remove: BTreeSet<String> =
                    local_paths.difference(&target_paths).cloned().collect();
                to_remove.remove(INSTALLED_PACKAGE_FILE);
                to_remove.remove(INSTALL_PROPERTIES_FILE);

                // From here until the new sidecar lands, the directory
                // reads as "not installed": a crash mid-sync forces a
                // fresh install next time instead of a false clean state.
                fs::remove_file(target_dir.join(INSTALLED_PACKAGE_FILE))?;
                (diff, to_remove)
            }
        };

        // Stale files go first, and emptied directories with them, so a
        // path that changes from directory to file is clear before the
        // install walks it.
        for path in &paths_to_remove {
            let full = fs_path(target_dir, path);
            debug!("removing {}", full.display());
            fs::remove_file(full)?;
        }
        fsutil::remove_empty_directories(target_dir, false)?;

        self.install_tree(&sync_pkg, target_dir, WriteMode::InPlace, progress)?;

        package::write_install_package(target_dir, pkg)?;
        config::write_install_properties(
            target_dir,
            &InstallProperties {
                tree_name: pkg.name.clone(),
                install_time,
            },
        )
    }

    fn install_tree(
        &self,
        pkg: &Package,
        target_dir: &Path,
        mode: WriteMode,
        progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        for pf in &pkg.files {
            let target_path = fs_path(target_dir, &pf.path);
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut writer: Box<dyn FileWriter> = match mode {
                WriteMode::Atomic => Box::new(AtomicFileWriter::create(&target_path)?),
                WriteMode::InPlace => Box::new(InPlaceFileWriter::create(&target_path)?),
            };

            let mut file_hasher = Sha1::new();
            for chunk in &pf.chunks {
                let key = chunk_key(&chunk.sha1, chunk.encoding);
                let stored = self.cache.get(&key)?;
                let data = codec::decompress(&stored, chunk.encoding)?;
                check_sha1(&data, &chunk.sha1, &key)?;
                file_hasher.update(&data);
                writer.write_all(&data)?;
                progress.on_bytes(data.len() as u64);
            }

            if hex::encode(file_hasher.finalize()) != pf.sha1 {
                return Err(Error::Integrity {
                    path: pf.path.clone(),
                });
            }
            writer.commit()?;
            debug!("wrote {}", target_path.display());
        }
        Ok(())
    }

    // ----- compare --------------------------------------------------

    /// Compare the package against the files installed in a directory.
    ///
    /// Content comparison re-chunks the on-disk files, so memory use is
    /// bounded by the chunk size.
    pub fn compare_install(&self, pkg: &Package, target_dir: &Path) -> Result<InstallComparison> {
        let mut installed: BTreeSet<String> = if target_dir.is_dir() {
            fsutil::relative_file_paths(target_dir)?.into_iter().collect()
        } else {
            BTreeSet::new()
        };
        installed.remove(INSTALL_PROPERTIES_FILE);
        installed.remove(INSTALLED_PACKAGE_FILE);

        let package_paths: BTreeSet<String> =
            pkg.files.iter().map(|f| f.path.clone()).collect();

        let mut result = InstallComparison {
            missing: package_paths.difference(&installed).cloned().collect(),
            extra: installed.difference(&package_paths).cloned().collect(),
            diffs: BTreeSet::new(),
        };

        for pf in &pkg.files {
            if !installed.contains(&pf.path) {
                continue;
            }
            let mut file = File::open(fs_path(target_dir, &pf.path))?;
            let mut file_hasher = Sha1::new();
            let mut matches = true;

            for chunk in &pf.chunks {
                let data = chunk::read_up_to(&mut file, chunk.size as usize)?;
                file_hasher.update(&data);
                if chunk::sha1_hex(&data) != chunk.sha1 {
                    matches = false;
                }
            }
            // Anything left over means the on-disk file is longer.
            if !chunk::read_up_to(&mut file, 1)?.is_empty() {
                matches = false;
            }
            if hex::encode(file_hasher.finalize()) != pf.sha1 {
                matches = false;
            }
            if !matches {
                result.diffs.insert(pf.path.clone());
            }
        }
        Ok(result)
    }

    // ----- presigned urls -------------------------------------------

    /// Embed a pre-signed fetch URL into every chunk of the package, so
    /// it can be downloaded without store credentials.
    pub fn add_urls(&self, pkg: &mut Package, expires_in_secs: u64) -> Result<()> {
        let store = self.remote()?;
        for pf in &mut pkg.files {
            for chunk in &mut pf.chunks {
                let key = chunk_key(&chunk.sha1, chunk.encoding);
                chunk.url = Some(store.url(&key, expires_in_secs)?);
            }
        }
        Ok(())
    }

    // ----- cache maintenance ----------------------------------------

    /// Chunk a local directory straight into the local cache, so a
    /// later download of matching content is already satisfied.
    pub fn prime(&self, local_dir: &Path, progress: &mut dyn TransferProgress) -> Result<()> {
        self.store_tree(self.cache.as_ref(), local_dir, progress)?;
        Ok(())
    }

    /// Remove every cached chunk not referenced by the named packages.
    /// Returns the removed chunk identities.
    ///
    /// An empty package list is refused outright, since it would drain
    /// the entire cache.
    pub fn flush_local_cache(&self, package_names: &[String]) -> Result<BTreeSet<ChunkRef>> {
        if package_names.is_empty() {
            return Err(Error::Refused {
                reason: "flushing the local cache with no packages would remove everything"
                    .to_string(),
            });
        }
        let packages = package_names
            .iter()
            .map(|name| self.find_package(name))
            .collect::<Result<Vec<_>>>()?;
        self.flush_in(self.cache.as_ref(), &packages)
    }

    /// Remove dangling chunks no longer referenced by any package in
    /// the store. Returns the removed chunk identities.
    pub fn flush_store(&self) -> Result<BTreeSet<ChunkRef>> {
        let packages = self
            .list_packages()?
            .iter()
            .map(|name| self.find_package(name))
            .collect::<Result<Vec<_>>>()?;
        self.flush_in(self.remote()?, &packages)
    }

    fn flush_in(
        &self,
        store: &dyn BlobStore,
        packages: &[Package],
    ) -> Result<BTreeSet<ChunkRef>> {
        let mut keys_to_keep: BTreeSet<ChunkRef> = BTreeSet::new();
        for pkg in packages {
            for pf in &pkg.files {
                for chunk in &pf.chunks {
                    keys_to_keep.insert((chunk.encoding, chunk.sha1.clone()));
                }
            }
        }

        let mut all_keys: BTreeSet<ChunkRef> = BTreeSet::new();
        for suffix in store.list(CHUNKS_PREFIX)? {
            let parts = blobstore::split_key(&suffix);
            if let [enc, s1, s2] = parts[..] {
                if let Some(encoding) = Encoding::from_dir_name(enc) {
                    all_keys.insert((encoding, format!("{}{}", s1, s2)));
                }
            }
        }

        let keys_to_remove: BTreeSet<ChunkRef> =
            all_keys.difference(&keys_to_keep).cloned().collect();

        info!(
            "{} packages reference {} chunks; the store holds {}, removing {}",
            packages.len(),
            keys_to_keep.len(),
            all_keys.len(),
            keys_to_remove.len()
        );

        if !self.dry_run {
            for (encoding, sha1) in &keys_to_remove {
                store.remove(&chunk_key(sha1, *encoding))?;
            }
        }
        Ok(keys_to_remove)
    }

    /// Re-hash every chunk in the local cache, returning the corrupted
    /// ones. Nothing is repaired.
    pub fn validate_local_cache(&self) -> Result<Vec<CorruptChunk>> {
        validate_in(self.cache.as_ref())
    }

    /// Re-hash every chunk in the package store, returning the
    /// corrupted ones. Nothing is repaired.
    pub fn validate_store(&self) -> Result<Vec<CorruptChunk>> {
        validate_in(self.remote()?)
    }

    // ----- chunking pipeline ----------------------------------------

    fn store_tree(
        &self,
        store: &dyn BlobStore,
        local_dir: &Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<Vec<PackageFile>> {
        if !local_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("directory {} doesn't exist", local_dir.display()),
            )));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(local_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name() == OsStr::new(INSTALL_PROPERTIES_FILE) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local_dir)
                .expect("walked path is below its base")
                .to_path_buf();
            files.push(self.store_file(store, local_dir, &rel, progress)?);
        }
        Ok(files)
    }

    fn store_file(
        &self,
        store: &dyn BlobStore,
        root: &Path,
        rel: &Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<PackageFile> {
        let chunk_size = self.chunk_config()?.chunk_size;
        let file = File::open(root.join(rel))?;
        let mut reader = ChunkReader::new(file, chunk_size);

        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk()? {
            chunks.push(self.store_chunk(store, &chunk.sha1, &chunk.data, progress)?);
        }

        let path = package::path_from_file_system(rel);
        let sha1 = reader.file_sha1();
        debug!("file {} has hash {}", path, sha1);
        Ok(PackageFile { sha1, path, chunks })
    }

    fn store_chunk(
        &self,
        store: &dyn BlobStore,
        sha1: &str,
        data: &[u8],
        progress: &mut dyn TransferProgress,
    ) -> Result<FileChunk> {
        let size = data.len() as u64;

        // Deduplicate against both encodings before writing anything.
        for encoding in [Encoding::Raw, Encoding::Zlib] {
            if store.exists(&chunk_key(sha1, encoding))? {
                progress.on_chunk(0, size);
                return Ok(FileChunk {
                    sha1: sha1.to_string(),
                    size,
                    encoding,
                    url: None,
                });
            }
        }

        let (stored, encoding) = if self.chunk_config()?.use_compression {
            codec::compress(data)?
        } else {
            (data.to_vec(), Encoding::Raw)
        };
        if !self.dry_run {
            debug!("uploading {} chunk {}", encoding.dir_name(), sha1);
            store.put(&chunk_key(sha1, encoding), &stored)?;
        }
        progress.on_chunk(size, 0);
        Ok(FileChunk {
            sha1: sha1.to_string(),
            size,
            encoding,
            url: None,
        })
    }
}

fn tree_key(tree_name: &str) -> String {
    blobstore::join_key([TREES_PREFIX, tree_name])
}

fn meta_key(meta_tree_name: &str) -> String {
    blobstore::join_key([META_PREFIX, meta_tree_name])
}

fn chunk_key(sha1: &str, encoding: Encoding) -> String {
    blobstore::join_key([CHUNKS_PREFIX, encoding.dir_name(), &sha1[..2], &sha1[2..]])
}

/// Map a manifest path onto the local filesystem below `root`.
fn fs_path(root: &Path, manifest_path: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in manifest_path.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

fn check_sha1(data: &[u8], expected: &str, path: &str) -> Result<()> {
    if chunk::sha1_hex(data) != expected {
        return Err(Error::Integrity {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn verify_in(store: &dyn BlobStore, pkg: &Package) -> Result<()> {
    for pf in &pkg.files {
        for chunk in &pf.chunks {
            let key = chunk_key(&chunk.sha1, chunk.encoding);
            if !store.exists(&key)? {
                return Err(Error::ChunkMissing { key });
            }
        }
    }
    Ok(())
}

fn validate_in(store: &dyn BlobStore) -> Result<Vec<CorruptChunk>> {
    let mut corrupted = Vec::new();
    for suffix in store.list(CHUNKS_PREFIX)? {
        let key = blobstore::join_key([CHUNKS_PREFIX, suffix.as_str()]);
        let parts = blobstore::split_key(&suffix);
        let parsed = match parts[..] {
            [enc, s1, s2] => Encoding::from_dir_name(enc).map(|e| (e, format!("{}{}", s1, s2))),
            _ => None,
        };
        let ok = match parsed {
            None => false,
            Some((encoding, sha1)) => {
                let stored = store.get(&key)?;
                match codec::decompress(&stored, encoding) {
                    Err(_) => false,
                    Ok(data) => chunk::sha1_hex(&data) == sha1,
                }
            }
        };
        if !ok {
            corrupted.push(CorruptChunk {
                metadata: store.metadata(&key).ok(),
                key,
            });
        }
    }
    Ok(corrupted)
}
