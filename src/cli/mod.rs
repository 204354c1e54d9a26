//! Command-line interface for the tree store.
//!
//! The store location and the local cache directory come from
//! `--store-dir` / `--cache-dir` or the corresponding environment
//! variables. The `download-http` and `install-http` commands work from
//! a presigned package file and need no store at all.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::blobstore::LocalBlobStore;
use crate::http::UreqFetcher;
use crate::metapackage::{Component, MetaPackage, SubPackage};
use crate::package::{self, Package};
use crate::progress::{ConsoleInstallProgress, ConsoleTransferProgress};
use crate::treestore::TreeStore;
use crate::TreeStoreConfig;

/// Content-addressed, deduplicating store for versioned directory trees
#[derive(Parser)]
#[command(name = "treestore", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Directory holding the package store
    #[arg(long, global = true, env = "TREESTORE_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Directory used as the local chunk cache
    #[arg(long, global = true, env = "TREESTORE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialise a new store
    Init {
        /// The maximum number of bytes to be stored in each chunk
        #[arg(long, default_value_t = 10_000_000)]
        chunk_size: usize,
        /// Store all chunks raw, without compression
        #[arg(long)]
        no_compression: bool,
    },
    /// List trees available in the store
    List,
    /// Show information about a tree
    Info {
        tree_name: String,
        #[arg(long)]
        path_regex: Option<String>,
    },
    /// Upload a tree from the local filesystem
    Upload {
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "")]
        description: String,
        tree_name: String,
        local_dir: PathBuf,
    },
    /// Upload one tree per variant subdirectory
    UploadMany {
        #[arg(long, default_value = "")]
        description: String,
        tree_name: String,
        local_dir: PathBuf,
        variants_dir: PathBuf,
    },
    /// Create a new package by merging existing packages
    CreateMerged {
        #[arg(long)]
        dry_run: bool,
        tree_name: String,
        /// Mappings of the form SUBDIR:TREENAME
        #[arg(required = true, value_name = "SUBDIR:TREENAME")]
        packages: Vec<String>,
    },
    /// Download a tree to the local cache
    Download {
        #[arg(long)]
        dry_run: bool,
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
        tree_name: String,
    },
    /// Download and install a tree into the filesystem
    Install {
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
        #[arg(long)]
        path_regex: Option<String>,
        tree_name: String,
        local_dir: PathBuf,
    },
    /// Synchronise a directory with a tree, reusing existing files
    Sync {
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
        tree_name: String,
        local_dir: PathBuf,
    },
    /// Confirm a tree has been correctly installed
    VerifyInstall {
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
        tree_name: String,
        local_dir: PathBuf,
    },
    /// Remove a tree from the store
    Remove {
        /// Don't ask for confirmation
        #[arg(long)]
        yes: bool,
        tree_name: String,
    },
    /// Rename an existing tree in the store
    Rename {
        from_tree_name: String,
        to_tree_name: String,
    },
    /// Print a package definition containing presigned urls
    Presign {
        tree_name: String,
        /// Validity of the presigned URLs in seconds
        #[arg(long, default_value_t = 3600)]
        expiry_secs: u64,
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
    },
    /// Download a tree to the local cache using a presigned package file
    DownloadHttp { package_file: PathBuf },
    /// Install a tree from the local cache using a presigned package file
    InstallHttp {
        package_file: PathBuf,
        local_dir: PathBuf,
    },
    /// Prime the local cache with the contents of a local directory
    PrimeCache { local_dir: PathBuf },
    /// Flush chunks from the store that are no longer referenced
    Flush {
        #[arg(long)]
        dry_run: bool,
    },
    /// Flush cached chunks not referenced by the given packages
    FlushCache {
        #[arg(long)]
        dry_run: bool,
        #[arg(required = true)]
        package_names: Vec<String>,
    },
    /// Re-hash every chunk in the local cache
    ValidateLocalCache,
    /// Compare two packages
    ComparePackages {
        #[arg(long = "meta", value_name = "KEY:VALUE")]
        metadata: Vec<String>,
        package1: String,
        package2: String,
    },
    /// Write a metapackage template to a local file
    NewMetapackage { metapackage_file: PathBuf },
    /// Upload a metapackage from a local file
    UploadMetapackage { metapackage_file: PathBuf },
    /// Download an existing metapackage to a local file
    DownloadMetapackage {
        metapackage_name: String,
        metapackage_file: PathBuf,
    },
}

const TEMPLATE_METAPACKAGE_NAME: &str = "METANAME-VERSION";

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init {
            chunk_size,
            no_compression,
        } => init(&cli, *chunk_size, !*no_compression),
        Commands::List => list(&cli),
        Commands::Info {
            tree_name,
            path_regex,
        } => info(&cli, tree_name, path_regex.as_deref()),
        Commands::Upload {
            dry_run,
            description,
            tree_name,
            local_dir,
        } => upload(&cli, *dry_run, description, tree_name, local_dir),
        Commands::UploadMany {
            description,
            tree_name,
            local_dir,
            variants_dir,
        } => upload_many(&cli, description, tree_name, local_dir, variants_dir),
        Commands::CreateMerged {
            dry_run,
            tree_name,
            packages,
        } => create_merged(&cli, *dry_run, tree_name, packages),
        Commands::Download {
            dry_run,
            metadata,
            tree_name,
        } => download(&cli, *dry_run, metadata, tree_name),
        Commands::Install {
            metadata,
            path_regex,
            tree_name,
            local_dir,
        } => install(&cli, metadata, path_regex.as_deref(), tree_name, local_dir),
        Commands::Sync {
            metadata,
            tree_name,
            local_dir,
        } => sync(&cli, metadata, tree_name, local_dir),
        Commands::VerifyInstall {
            metadata,
            tree_name,
            local_dir,
        } => verify_install(&cli, metadata, tree_name, local_dir),
        Commands::Remove { yes, tree_name } => remove(&cli, *yes, tree_name),
        Commands::Rename {
            from_tree_name,
            to_tree_name,
        } => rename(&cli, from_tree_name, to_tree_name),
        Commands::Presign {
            tree_name,
            expiry_secs,
            metadata,
        } => presign(&cli, tree_name, *expiry_secs, metadata),
        Commands::DownloadHttp { package_file } => download_http(&cli, package_file),
        Commands::InstallHttp {
            package_file,
            local_dir,
        } => install_http(&cli, package_file, local_dir),
        Commands::PrimeCache { local_dir } => prime_cache(&cli, local_dir),
        Commands::Flush { dry_run } => flush(&cli, *dry_run),
        Commands::FlushCache {
            dry_run,
            package_names,
        } => flush_cache(&cli, *dry_run, package_names),
        Commands::ValidateLocalCache => validate_local_cache(&cli),
        Commands::ComparePackages {
            metadata,
            package1,
            package2,
        } => compare_packages(&cli, metadata, package1, package2),
        Commands::NewMetapackage { metapackage_file } => new_metapackage(metapackage_file),
        Commands::UploadMetapackage { metapackage_file } => {
            upload_metapackage(&cli, metapackage_file)
        }
        Commands::DownloadMetapackage {
            metapackage_name,
            metapackage_file,
        } => download_metapackage(&cli, metapackage_name, metapackage_file),
    }
}

fn store_blobstore(cli: &Cli) -> anyhow::Result<LocalBlobStore> {
    let dir = cli
        .store_dir
        .as_ref()
        .context("TREESTORE_STORE_DIR (or --store-dir) must point at the package store")?;
    Ok(LocalBlobStore::new(dir)?)
}

fn cache_blobstore(cli: &Cli) -> anyhow::Result<LocalBlobStore> {
    let dir = cli
        .cache_dir
        .as_ref()
        .context("TREESTORE_CACHE_DIR (or --cache-dir) must point at the local cache")?;
    Ok(LocalBlobStore::new(dir)?)
}

fn open_tree_store(cli: &Cli, dry_run: bool) -> anyhow::Result<TreeStore> {
    let mut treestore = TreeStore::open(
        Box::new(store_blobstore(cli)?),
        Box::new(cache_blobstore(cli)?),
    )?;
    treestore.set_dry_run(dry_run);
    Ok(treestore)
}

fn http_only_tree_store(cli: &Cli) -> anyhow::Result<TreeStore> {
    Ok(TreeStore::for_http_only(Box::new(cache_blobstore(cli)?)))
}

fn metadata_map(values: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for value in values {
        let (key, val) = value
            .split_once(':')
            .with_context(|| format!("--meta argument '{}' must be of form KEY:VALUE", value))?;
        map.insert(key.to_string(), val.to_string());
    }
    Ok(map)
}

fn compile_path_regex(pattern: Option<&str>) -> anyhow::Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(p).with_context(|| format!("invalid path regex '{}'", p)))
        .transpose()
}

fn read_package_file(path: &Path) -> anyhow::Result<Package> {
    let body = fs::read(path)
        .with_context(|| format!("cannot read package file {}", path.display()))?;
    Ok(serde_json::from_slice(&body)?)
}

fn init(cli: &Cli, chunk_size: usize, use_compression: bool) -> anyhow::Result<()> {
    TreeStore::create(
        Box::new(store_blobstore(cli)?),
        Box::new(cache_blobstore(cli)?),
        TreeStoreConfig {
            chunk_size,
            use_compression,
        },
    )?;
    println!("store initialised");
    Ok(())
}

fn list(cli: &Cli) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let mut names = treestore.list_packages()?;
    names.sort();
    for name in names {
        println!("{}", name);
    }
    let mut names = treestore.list_meta_packages()?;
    names.sort();
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn info(cli: &Cli, tree_name: &str, path_regex: Option<&str>) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    match treestore.find_meta_package(tree_name) {
        Ok(meta) => {
            println!("Package: {}", tree_name);
            println!("Created At: {}", crate::timefmt::format_iso(&meta.creation_time));
            println!("Components:");
            for component in &meta.components {
                println!("    {}", component.info());
            }
        }
        Err(crate::Error::NotFound { .. }) => {
            let pkg = treestore.find_package(tree_name)?;
            let pkg = package::package_filter(pkg, compile_path_regex(path_regex)?.as_ref());
            println!("Package: {}", tree_name);
            println!("Created At: {}", crate::timefmt::format_iso(&pkg.creation_time));
            println!("Total Size: {} bytes", pkg.size());
            println!("Files:");
            for pf in &pkg.files {
                println!(
                    "    {} ({} chunks, {} bytes)",
                    pf.path,
                    pf.chunks.len(),
                    pf.size()
                );
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn upload(
    cli: &Cli,
    dry_run: bool,
    description: &str,
    tree_name: &str,
    local_dir: &Path,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, dry_run)?;
    let mut progress = ConsoleTransferProgress::new();
    treestore.upload(
        tree_name,
        description,
        Utc::now().naive_utc(),
        local_dir,
        &mut progress,
    )?;
    println!();
    Ok(())
}

fn upload_many(
    cli: &Cli,
    description: &str,
    tree_name: &str,
    local_dir: &Path,
    variants_dir: &Path,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let mut progress = ConsoleTransferProgress::new();
    let packages = treestore.upload_many(
        tree_name,
        description,
        Utc::now().naive_utc(),
        local_dir,
        variants_dir,
        &mut progress,
    )?;
    println!();
    for pkg in packages {
        println!("uploaded {}", pkg.name);
    }
    Ok(())
}

fn create_merged(
    cli: &Cli,
    dry_run: bool,
    tree_name: &str,
    packages: &[String],
) -> anyhow::Result<()> {
    let mut package_map = BTreeMap::new();
    for arg in packages {
        let (subdir, name) = arg
            .split_once(':')
            .context("create-merged arguments must be of form SUBDIR:TREENAME")?;
        package_map.insert(subdir.to_string(), name.to_string());
    }
    let treestore = open_tree_store(cli, dry_run)?;
    treestore.create_merged(tree_name, Utc::now().naive_utc(), &package_map)?;
    Ok(())
}

fn download(cli: &Cli, dry_run: bool, metadata: &[String], tree_name: &str) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, dry_run)?;
    let pkg = treestore.find(tree_name, &metadata_map(metadata)?)?;
    let mut progress = ConsoleTransferProgress::with_total(pkg.size());
    treestore.download(&pkg, &mut progress)?;
    println!();
    Ok(())
}

fn install(
    cli: &Cli,
    metadata: &[String],
    path_regex: Option<&str>,
    tree_name: &str,
    local_dir: &Path,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let pkg = treestore.find(tree_name, &metadata_map(metadata)?)?;
    let pkg = package::package_filter(pkg, compile_path_regex(path_regex)?.as_ref());

    let mut progress = ConsoleTransferProgress::with_total(pkg.size());
    treestore.download(&pkg, &mut progress)?;
    println!();
    treestore.verify_local(&pkg)?;
    let mut progress = ConsoleInstallProgress::new(pkg.size());
    treestore.install(&pkg, local_dir, &mut progress)?;
    println!();
    Ok(())
}

fn sync(cli: &Cli, metadata: &[String], tree_name: &str, local_dir: &Path) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let pkg = treestore.find(tree_name, &metadata_map(metadata)?)?;

    let mut progress = ConsoleTransferProgress::with_total(pkg.size());
    treestore.download(&pkg, &mut progress)?;
    println!();
    treestore.verify_local(&pkg)?;
    let mut progress = ConsoleInstallProgress::new(pkg.size());
    treestore.sync(&pkg, local_dir, &mut progress)?;
    println!();
    Ok(())
}

fn verify_install(
    cli: &Cli,
    metadata: &[String],
    tree_name: &str,
    local_dir: &Path,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let pkg = treestore.find(tree_name, &metadata_map(metadata)?)?;
    let result = treestore.compare_install(&pkg, local_dir)?;
    for path in &result.missing {
        println!("{} is missing", path);
    }
    for path in &result.extra {
        println!("{} is unexpected", path);
    }
    for path in &result.diffs {
        println!("{} is different", path);
    }
    if result.is_clean() {
        println!("Package {} verified ok at {}", tree_name, local_dir.display());
        Ok(())
    } else {
        bail!("package {} differs from {}", tree_name, local_dir.display());
    }
}

fn remove(cli: &Cli, confirmed: bool, tree_name: &str) -> anyhow::Result<()> {
    let confirmed = confirmed || {
        print!("Really remove tree '{}' (Y/N) ? [N] ", tree_name);
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line.trim() == "Y"
    };
    if confirmed {
        println!("Removing {}", tree_name);
        let treestore = open_tree_store(cli, false)?;
        treestore.remove(tree_name)?;
    } else {
        println!("Cancelled");
    }
    Ok(())
}

fn rename(cli: &Cli, from_tree_name: &str, to_tree_name: &str) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    treestore.rename(from_tree_name, to_tree_name)?;
    Ok(())
}

fn presign(
    cli: &Cli,
    tree_name: &str,
    expiry_secs: u64,
    metadata: &[String],
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let mut pkg = treestore.find(tree_name, &metadata_map(metadata)?)?;
    treestore.add_urls(&mut pkg, expiry_secs)?;
    println!("{}", serde_json::to_string_pretty(&pkg)?);
    Ok(())
}

fn download_http(cli: &Cli, package_file: &Path) -> anyhow::Result<()> {
    let treestore = http_only_tree_store(cli)?;
    let pkg = read_package_file(package_file)?;
    let mut progress = ConsoleTransferProgress::with_total(pkg.size());
    treestore.download_http(&pkg, &UreqFetcher::new(), &mut progress)?;
    println!();
    Ok(())
}

fn install_http(cli: &Cli, package_file: &Path, local_dir: &Path) -> anyhow::Result<()> {
    let treestore = http_only_tree_store(cli)?;
    let pkg = read_package_file(package_file)?;
    treestore.verify_local(&pkg)?;
    let mut progress = ConsoleInstallProgress::new(pkg.size());
    treestore.install(&pkg, local_dir, &mut progress)?;
    println!();
    Ok(())
}

fn prime_cache(cli: &Cli, local_dir: &Path) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let mut progress = ConsoleTransferProgress::new();
    treestore.prime(local_dir, &mut progress)?;
    println!();
    Ok(())
}

fn flush(cli: &Cli, dry_run: bool) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, dry_run)?;
    let removed = treestore.flush_store()?;
    println!("{} chunks removed", removed.len());
    Ok(())
}

fn flush_cache(cli: &Cli, dry_run: bool, package_names: &[String]) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, dry_run)?;
    let removed = treestore.flush_local_cache(package_names)?;
    println!("{} chunks removed", removed.len());
    Ok(())
}

fn validate_local_cache(cli: &Cli) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let corrupted = treestore.validate_local_cache()?;
    if corrupted.is_empty() {
        println!("local cache ok");
        Ok(())
    } else {
        for chunk in &corrupted {
            match &chunk.metadata {
                Some(meta) => println!("{} is corrupt ({} bytes)", chunk.key, meta.size),
                None => println!("{} is corrupt", chunk.key),
            }
        }
        bail!("{} corrupt chunks in the local cache", corrupted.len());
    }
}

fn compare_packages(
    cli: &Cli,
    metadata: &[String],
    package1: &str,
    package2: &str,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let metadata = metadata_map(metadata)?;
    println!("Fetching {}...", package1);
    let pkg1 = treestore.find(package1, &metadata)?;
    println!("Fetching {}...", package2);
    let pkg2 = treestore.find(package2, &metadata)?;
    println!("---");

    let (diff, removed_paths) = package::package_diff(&pkg1, &pkg2);
    for path in &removed_paths {
        println!("Removed {}", path);
    }
    let mut diff_size = 0;
    for pf in &diff.files {
        let size = pf.size();
        println!("Updated {} (size {})", pf.path, size);
        diff_size += size;
    }

    println!();
    println!("{} size = {}", pkg1.name, pkg1.size());
    println!("{} size = {}", pkg2.name, pkg2.size());
    println!("update size = {}", diff_size);
    Ok(())
}

fn new_metapackage(metapackage_file: &Path) -> anyhow::Result<()> {
    let template = MetaPackage {
        name: TEMPLATE_METAPACKAGE_NAME.to_string(),
        description: String::new(),
        creation_time: Utc::now().naive_utc(),
        components: vec![
            Component::SubPackage(SubPackage {
                install_path: "SUBDIR1".to_string(),
                package_name: "PACKAGE1-VERSION".to_string(),
            }),
            Component::SubPackage(SubPackage {
                install_path: "SUBDIR2".to_string(),
                package_name: "PACKAGE2-VERSION".to_string(),
            }),
        ],
    };
    let mut body = serde_json::to_string_pretty(&template)?;
    body.push('\n');
    fs::write(metapackage_file, body)?;
    println!(
        "metapackage template written to {}",
        metapackage_file.display()
    );
    Ok(())
}

fn upload_metapackage(cli: &Cli, metapackage_file: &Path) -> anyhow::Result<()> {
    let body = fs::read(metapackage_file)
        .with_context(|| format!("cannot read {}", metapackage_file.display()))?;
    let meta: MetaPackage = serde_json::from_slice(&body)?;
    if meta.name == TEMPLATE_METAPACKAGE_NAME {
        bail!("edit the metapackage template before uploading it");
    }
    let treestore = open_tree_store(cli, false)?;
    meta.verify(&treestore, &HashMap::new())?;
    treestore.upload_meta_package(&meta)?;
    Ok(())
}

fn download_metapackage(
    cli: &Cli,
    metapackage_name: &str,
    metapackage_file: &Path,
) -> anyhow::Result<()> {
    let treestore = open_tree_store(cli, false)?;
    let meta = treestore.find_meta_package(metapackage_name)?;
    let mut body = serde_json::to_string_pretty(&meta)?;
    body.push('\n');
    fs::write(metapackage_file, body)?;
    Ok(())
}
