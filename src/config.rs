//! Store configuration and the install-properties sidecar.

use crate::{timefmt, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Filename of the sidecar recording what was installed into a directory.
pub const INSTALL_PROPERTIES_FILE: &str = ".s3ts.properties";

/// Configuration data for a tree store.
///
/// Written once when the store is created and immutable thereafter, so
/// every package in a store shares the same chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStoreConfig {
    /// Maximum number of bytes stored in each chunk
    pub chunk_size: usize,
    /// Whether chunks may be stored deflate-compressed
    pub use_compression: bool,
}

/// Records the details of an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProperties {
    pub tree_name: String,
    #[serde(with = "timefmt")]
    pub install_time: NaiveDateTime,
}

/// Write the install-properties sidecar into an install directory.
pub fn write_install_properties(install_dir: &Path, props: &InstallProperties) -> Result<()> {
    let body = serde_json::to_vec(props)?;
    fs::write(install_dir.join(INSTALL_PROPERTIES_FILE), body)?;
    Ok(())
}

/// Read the install-properties sidecar from an install directory.
pub fn read_install_properties(install_dir: &Path) -> Result<InstallProperties> {
    let body = fs::read(install_dir.join(INSTALL_PROPERTIES_FILE))?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_json_field_names() {
        let config = TreeStoreConfig {
            chunk_size: 100,
            use_compression: true,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["chunkSize"], 100);
        assert_eq!(json["useCompression"], true);

        let back: TreeStoreConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn install_properties_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let props = InstallProperties {
            tree_name: "v1.0".to_string(),
            install_time: timefmt::parse_iso("2015-01-01T10:30:00.5").unwrap(),
        };
        write_install_properties(dir.path(), &props)?;
        let back = read_install_properties(dir.path())?;
        assert_eq!(back, props);
        Ok(())
    }
}
