//! Package manifests: named immutable snapshots of directory trees.
//!
//! A [`Package`] lists the files of a tree; each [`PackageFile`] carries an
//! ordered run of content-addressed [`FileChunk`]s covering the file
//! contiguously. Manifest paths are always stored in POSIX form with `/`
//! separators, whatever the host filesystem uses.

use crate::{timefmt, Error, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Filename of the sidecar holding the manifest a directory was synced to.
pub const INSTALLED_PACKAGE_FILE: &str = ".s3ts.package";

/// Storage form of a chunk blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Raw,
    Zlib,
}

impl Encoding {
    /// The store directory name for this encoding.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Zlib => "zlib",
        }
    }

    /// Inverse of [`Encoding::dir_name`].
    pub fn from_dir_name(name: &str) -> Option<Encoding> {
        match name {
            "raw" => Some(Encoding::Raw),
            "zlib" => Some(Encoding::Zlib),
            _ => None,
        }
    }
}

/// One content-addressed fragment of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// SHA-1 of the chunk's uncompressed bytes, lowercase hex
    pub sha1: String,
    /// Uncompressed byte length
    pub size: u64,
    pub encoding: Encoding,
    /// Pre-signed fetch URL; only present on presigned manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A single file of a package: its whole-file hash and its chunk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    /// SHA-1 of the whole file's uncompressed content
    pub sha1: String,
    /// POSIX-style relative path within the tree
    pub path: String,
    pub chunks: Vec<FileChunk>,
}

impl PackageFile {
    /// Uncompressed size of the file.
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }
}

/// A named immutable snapshot of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "timefmt")]
    pub creation_time: NaiveDateTime,
    pub files: Vec<PackageFile>,
}

impl Package {
    /// Total uncompressed size of all files.
    pub fn size(&self) -> u64 {
        self.files.iter().map(|pf| pf.size()).sum()
    }
}

/// Turn a local filesystem path into a manifest path.
///
/// Manifest paths always use `/` separators regardless of host OS.
pub fn path_from_file_system(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Normalize a POSIX path: collapse `.`, `..` and duplicate separators.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// POSIX-join an install prefix onto a manifest path and normalize.
pub fn join_install_path(install_path: &str, path: &str) -> String {
    normalize_path(&format!("{}/{}", install_path, path))
}

/// Return a package containing only the files whose path matches the
/// given regex. `None` keeps every file.
pub fn package_filter(pkg: Package, path_regex: Option<&Regex>) -> Package {
    let regex = match path_regex {
        Some(r) => r,
        None => return pkg,
    };
    let Package {
        name,
        description,
        creation_time,
        files,
    } = pkg;
    Package {
        name,
        description,
        creation_time,
        files: files
            .into_iter()
            .filter(|pf| regex.is_match(&pf.path))
            .collect(),
    }
}

/// Compute the package that turns `package1` into `package2`.
///
/// The returned package holds the files of `package2` that are new or
/// whose content changed; the returned set holds the paths that must be
/// deleted.
pub fn package_diff(package1: &Package, package2: &Package) -> (Package, BTreeSet<String>) {
    let files1: HashMap<&str, &PackageFile> =
        package1.files.iter().map(|f| (f.path.as_str(), f)).collect();
    let files2: HashMap<&str, &PackageFile> =
        package2.files.iter().map(|f| (f.path.as_str(), f)).collect();

    let removed_paths: BTreeSet<String> = files1
        .keys()
        .filter(|p| !files2.contains_key(**p))
        .map(|p| p.to_string())
        .collect();

    let mut diff_files = Vec::new();
    for pf in &package2.files {
        match files1.get(pf.path.as_str()) {
            None => diff_files.push(pf.clone()),
            Some(old) if old.sha1 != pf.sha1 => diff_files.push(pf.clone()),
            Some(_) => {}
        }
    }

    let diff = Package {
        name: format!("{}->{}", package1.name, package2.name),
        description: String::new(),
        creation_time: package2.creation_time,
        files: diff_files,
    };
    (diff, removed_paths)
}

/// Write the installed-manifest sidecar into an install directory.
pub fn write_install_package(install_dir: &Path, pkg: &Package) -> Result<()> {
    let body = serde_json::to_vec(pkg)?;
    fs::write(install_dir.join(INSTALLED_PACKAGE_FILE), body)?;
    Ok(())
}

/// Read the installed-manifest sidecar from an install directory.
///
/// Fails with `NotFound` when the directory has no sidecar.
pub fn read_install_package(install_dir: &Path) -> Result<Package> {
    let path = install_dir.join(INSTALLED_PACKAGE_FILE);
    let body = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                key: path.display().to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(sha1: &str, size: u64) -> FileChunk {
        FileChunk {
            sha1: sha1.to_string(),
            size,
            encoding: Encoding::Raw,
            url: None,
        }
    }

    fn file(path: &str, sha1: &str) -> PackageFile {
        PackageFile {
            sha1: sha1.to_string(),
            path: path.to_string(),
            chunks: vec![chunk(sha1, 10)],
        }
    }

    fn pkg(name: &str, files: Vec<PackageFile>) -> Package {
        Package {
            name: name.to_string(),
            description: String::new(),
            creation_time: timefmt::parse_iso("2015-01-01T00:00:00").unwrap(),
            files,
        }
    }

    #[test]
    fn manifest_json_shape() {
        let p = pkg("v1.0", vec![file("code/file1.py", "aa")]);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["name"], "v1.0");
        assert_eq!(json["creationTime"], "2015-01-01T00:00:00.000000");
        assert_eq!(json["files"][0]["path"], "code/file1.py");
        assert_eq!(json["files"][0]["chunks"][0]["encoding"], "raw");
        // url is omitted unless presigned
        assert!(json["files"][0]["chunks"][0].get("url").is_none());
    }

    #[test]
    fn description_defaults_when_missing() {
        let json = serde_json::json!({
            "name": "v1.0",
            "creationTime": "2015-01-01T00:00:00",
            "files": [],
        });
        let p: Package = serde_json::from_value(json).unwrap();
        assert_eq!(p.description, "");
    }

    #[test]
    fn normalize_path_cases() {
        assert_eq!(normalize_path("./code/file1.py"), "code/file1.py");
        assert_eq!(normalize_path("a//b/./c"), "a/b/c");
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("."), ".");
        assert_eq!(join_install_path(".", "code/x"), "code/x");
        assert_eq!(join_install_path("dir-1", "code/x"), "dir-1/code/x");
    }

    #[test]
    fn diff_reports_added_changed_and_removed() {
        let p1 = pkg(
            "v1.0",
            vec![file("a", "s1"), file("b", "s2"), file("c", "s3")],
        );
        let p2 = pkg("v1.1", vec![file("a", "s1"), file("b", "s9"), file("d", "s4")]);

        let (diff, removed) = package_diff(&p1, &p2);
        assert_eq!(diff.name, "v1.0->v1.1");
        let mut paths: Vec<&str> = diff.files.iter().map(|f| f.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["b", "d"]);
        assert_eq!(removed, BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn filter_keeps_matching_paths() {
        let p = pkg("v1.0", vec![file("code/a.py", "s1"), file("assets/b", "s2")]);
        let re = Regex::new("^code/").unwrap();
        let filtered = package_filter(p.clone(), Some(&re));
        assert_eq!(filtered.files.len(), 1);
        assert_eq!(filtered.files[0].path, "code/a.py");
        assert_eq!(package_filter(p, None).files.len(), 2);
    }
}
