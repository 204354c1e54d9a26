//! # treestore
//!
//! A content-addressed, deduplicating store for versioned directory
//! trees, backed by a blob store with a local on-disk cache.
//!
//! Trees are uploaded under a symbolic name: each file is split into
//! fixed-size chunks addressed by the SHA-1 of their content, chunks
//! are optionally deflate-compressed, and content shared between trees
//! is stored and transmitted only once. Trees are later downloaded
//! through the cache and installed, or synchronized incrementally
//! against what a previous sync left on disk, with every chunk and
//! file verified on the way.
//!
//! ## Features
//!
//! - **Chunk-level deduplication**: repeated content uploads nothing
//! - **Integrity verification**: SHA-1 checked per chunk and per file
//! - **Incremental sync**: only changed files are rewritten
//! - **Package composition**: merged packages and metapackages
//! - **Pre-signed URLs**: credential-free downloads over plain HTTP
//! - **Garbage collection**: unreferenced chunks flushed on demand

pub mod blobstore;
pub mod chunk;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod filewriter;
pub mod fsutil;
pub mod http;
pub mod metapackage;
pub mod package;
pub mod progress;
pub mod timefmt;
pub mod treestore;

pub use config::{InstallProperties, TreeStoreConfig};
pub use error::{Error, Result};
pub use package::{Encoding, FileChunk, Package, PackageFile};
pub use treestore::TreeStore;
