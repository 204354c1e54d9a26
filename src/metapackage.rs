//! Metapackages: composing packages into a single directory tree.
//!
//! A metapackage lists components, each mapping an existing package
//! onto an install subdirectory. Resolving a metapackage against a
//! metadata map produces an ordinary synthetic [`Package`] that the
//! download and install machinery consumes unchanged.

use crate::package::{self, Package, PackageFile};
use crate::treestore::TreeStore;
use crate::{timefmt, Error, Result};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named arrangement of packages into one directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPackage {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "timefmt")]
    pub creation_time: NaiveDateTime,
    pub components: Vec<Component>,
}

/// One component of a metapackage.
///
/// Serialized as a tagged object, `{"subPackage": {...}}` or
/// `{"localizedPackage": {...}}`; any other tag is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    SubPackage(SubPackage),
    LocalizedPackage(LocalizedPackage),
}

/// Installs one package below a subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubPackage {
    pub install_path: String,
    pub package_name: String,
}

/// Installs a host-dependent package below a subdirectory.
///
/// `localized_package_name` may contain `{key}` placeholders filled
/// from the metadata map, e.g. `local-{hostname}`. When no package
/// exists under the substituted name, `default_package_name` is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedPackage {
    pub install_path: String,
    pub localized_package_name: String,
    pub default_package_name: String,
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^}]*)\}").expect("placeholder regex is valid"));

/// Substitute `{key}` placeholders from the metadata map.
///
/// Substitution is strict: an unknown key is an error.
pub fn substitute(template: &str, metadata: &HashMap<String, String>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let key = &caps[1];
        let value = metadata.get(key).ok_or_else(|| Error::InvalidMetadata {
            key: key.to_string(),
        })?;
        result.push_str(&template[last_end..whole.start()]);
        result.push_str(value);
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

fn files_in_subdir(subdir: &str, pkg: &Package) -> Vec<PackageFile> {
    pkg.files
        .iter()
        .map(|pf| PackageFile {
            sha1: pf.sha1.clone(),
            path: package::join_install_path(subdir, &pf.path),
            chunks: pf.chunks.clone(),
        })
        .collect()
}

impl Component {
    /// Human-readable component summary, for listings.
    pub fn info(&self) -> String {
        match self {
            Component::SubPackage(sp) => {
                format!("{} -> package {}", sp.install_path, sp.package_name)
            }
            Component::LocalizedPackage(lp) => {
                format!("{} -> package {}", lp.install_path, lp.localized_package_name)
            }
        }
    }

    fn verify(&self, store: &TreeStore, metadata: &HashMap<String, String>) -> Result<()> {
        match self {
            Component::SubPackage(sp) => {
                if sp.install_path.is_empty() || sp.package_name.is_empty() {
                    return Err(Error::InvalidManifest {
                        reason: "sub package with empty field".to_string(),
                    });
                }
                store.find_package(&sp.package_name).map_err(|e| match e {
                    Error::NotFound { .. } => Error::InvalidManifest {
                        reason: format!("package {} doesn't exist", sp.package_name),
                    },
                    e => e,
                })?;
                Ok(())
            }
            Component::LocalizedPackage(lp) => {
                if lp.install_path.is_empty()
                    || lp.localized_package_name.is_empty()
                    || lp.default_package_name.is_empty()
                {
                    return Err(Error::InvalidManifest {
                        reason: "localized package with empty field".to_string(),
                    });
                }
                let localized = substitute(&lp.localized_package_name, metadata)?;
                match store.find_package(&localized) {
                    Ok(_) => Ok(()),
                    Err(Error::NotFound { .. }) => {
                        store
                            .find_package(&lp.default_package_name)
                            .map_err(|e| match e {
                                Error::NotFound { .. } => Error::InvalidManifest {
                                    reason: format!(
                                        "package {} doesn't exist",
                                        lp.default_package_name
                                    ),
                                },
                                e => e,
                            })?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn package_files(
        &self,
        store: &TreeStore,
        metadata: &HashMap<String, String>,
    ) -> Result<Vec<PackageFile>> {
        match self {
            Component::SubPackage(sp) => {
                let pkg = store.find_package(&sp.package_name)?;
                Ok(files_in_subdir(&sp.install_path, &pkg))
            }
            Component::LocalizedPackage(lp) => {
                let localized = substitute(&lp.localized_package_name, metadata)?;
                let pkg = match store.find_package(&localized) {
                    Ok(pkg) => pkg,
                    Err(Error::NotFound { .. }) => store.find_package(&lp.default_package_name)?,
                    Err(e) => return Err(e),
                };
                Ok(files_in_subdir(&lp.install_path, &pkg))
            }
        }
    }
}

impl MetaPackage {
    /// Check that every component refers to packages that exist and
    /// that localized names resolve against the metadata map.
    pub fn verify(&self, store: &TreeStore, metadata: &HashMap<String, String>) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidManifest {
                reason: "metapackage with empty name".to_string(),
            });
        }
        for component in &self.components {
            component.verify(store, metadata)?;
        }
        Ok(())
    }

    /// Resolve into a synthetic package.
    ///
    /// Component file lists are concatenated in component order; path
    /// collisions across components are not detected here.
    pub fn resolve(
        &self,
        store: &TreeStore,
        metadata: &HashMap<String, String>,
    ) -> Result<Package> {
        let mut files = Vec::new();
        for component in &self.components {
            files.extend(component.package_files(store, metadata)?);
        }
        Ok(Package {
            name: self.name.clone(),
            description: self.description.clone(),
            creation_time: self.creation_time,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn component_json_is_tagged() {
        let meta = MetaPackage {
            name: "meta1".to_string(),
            description: String::new(),
            creation_time: timefmt::parse_iso("2015-01-01T00:00:00").unwrap(),
            components: vec![
                Component::SubPackage(SubPackage {
                    install_path: "dir-1".to_string(),
                    package_name: "v1.0".to_string(),
                }),
                Component::LocalizedPackage(LocalizedPackage {
                    install_path: "dir-2".to_string(),
                    localized_package_name: "local-{hostname}".to_string(),
                    default_package_name: "local-default".to_string(),
                }),
            ],
        };

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["components"][0]["subPackage"]["installPath"], "dir-1");
        assert_eq!(
            json["components"][1]["localizedPackage"]["defaultPackageName"],
            "local-default"
        );

        let back: MetaPackage = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn unknown_component_kind_is_rejected() {
        let json = serde_json::json!({
            "name": "meta1",
            "creationTime": "2015-01-01T00:00:00",
            "components": [ { "mysteryPackage": {} } ],
        });
        assert!(serde_json::from_value::<MetaPackage>(json).is_err());
    }

    #[test]
    fn substitution_is_strict() {
        let mut metadata = HashMap::new();
        metadata.insert("hostname".to_string(), "kiosk-01".to_string());

        assert_eq!(
            substitute("local-{hostname}", &metadata).unwrap(),
            "local-kiosk-01"
        );
        assert_eq!(substitute("plain", &metadata).unwrap(), "plain");

        let err = substitute("local-{region}", &metadata).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata { ref key } if key == "region"));
    }
}
