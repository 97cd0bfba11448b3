// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! On-disk lock file schemas.
//!
//! Two schemas exist. The legacy schema (version 1, or no version at all)
//! keeps flat per-manager package lists:
//!
//! ```toml
//! version = 1
//!
//! [[packages.brew]]
//! name = "ripgrep"
//! version = "14.1.0"
//! installed_at = "2024-05-01T12:00:00Z"
//! ```
//!
//! The current schema keeps a single ordered sequence of resource records.
//! Legacy data is upgraded in memory on decode, and only the current schema is
//! ever encoded.

use super::{
    Domain, LockError, LockFile, ManagedResource, Result, LOCK_VERSION, MANAGER_KEY, NAME_KEY,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lock file decoded according to its declared schema version.
#[derive(Debug)]
pub(super) enum VersionedLock {
    Legacy(LegacyLock),
    Current(CurrentLock),
}

impl VersionedLock {
    /// Decode lock data by its version field.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Parse`] if data is not valid TOML, or does not
    ///   match the current schema.
    /// - Return [`LockError::Migration`] if legacy data is malformed.
    /// - Return [`LockError::UnsupportedVersion`] for unknown versions.
    pub(super) fn decode(data: &str) -> Result<Self> {
        let header: VersionHeader = toml::de::from_str(data)?;
        match header.version {
            None | Some(1) => {
                let legacy: LegacyLock =
                    toml::de::from_str(data).map_err(|err| LockError::Migration {
                        reason: err.to_string(),
                    })?;
                legacy.validate()?;
                Ok(Self::Legacy(legacy))
            }
            Some(version) if version == i64::from(LOCK_VERSION) => {
                Ok(Self::Current(toml::de::from_str(data)?))
            }
            Some(version) => Err(LockError::UnsupportedVersion { version }),
        }
    }

    /// Upgrade decoded data into the in-memory lock file.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::InvalidRecord`] if a package record lacks a
    ///   manager.
    pub(super) fn into_lock_file(self) -> Result<LockFile> {
        match self {
            Self::Legacy(legacy) => Ok(LockFile::from(legacy)),
            Self::Current(current) => LockFile::try_from(current),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionHeader {
    version: Option<i64>,
}

/// Legacy schema: packages grouped by manager.
#[derive(Debug, Default, Deserialize)]
pub(super) struct LegacyLock {
    #[serde(default)]
    packages: BTreeMap<String, Vec<LegacyPackage>>,
}

impl LegacyLock {
    fn validate(&self) -> Result<()> {
        for (manager, packages) in &self.packages {
            if manager.is_empty() {
                return Err(LockError::Migration {
                    reason: "package list with empty manager name".into(),
                });
            }

            if packages.iter().any(|package| package.name.is_empty()) {
                return Err(LockError::Migration {
                    reason: format!("package with empty name under {manager:?}"),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LegacyPackage {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    installed_at: DateTime<Utc>,
}

impl From<LegacyLock> for LockFile {
    fn from(legacy: LegacyLock) -> Self {
        let mut resources = Vec::new();
        for (manager, packages) in legacy.packages {
            for package in packages {
                let mut metadata = BTreeMap::new();
                if let Some(version) = package.version.filter(|version| !version.is_empty()) {
                    metadata.insert("version".to_string(), version);
                }

                resources.push(ManagedResource {
                    domain: Domain::Package,
                    manager: manager.clone(),
                    id: package.name,
                    installed_at: package.installed_at,
                    metadata,
                });
            }
        }

        LockFile {
            version: LOCK_VERSION,
            resources,
        }
    }
}

/// Current schema: ordered resource records.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct CurrentLock {
    version: i64,
    #[serde(rename = "resource", default, skip_serializing_if = "Vec::is_empty")]
    resources: Vec<ResourceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceRecord {
    #[serde(rename = "type")]
    domain: Domain,
    id: String,
    #[serde(default = "managed_state")]
    state: String,
    #[serde(default)]
    installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

fn managed_state() -> String {
    "managed".into()
}

impl TryFrom<CurrentLock> for LockFile {
    type Error = LockError;

    fn try_from(current: CurrentLock) -> Result<Self, Self::Error> {
        let mut resources = Vec::with_capacity(current.resources.len());
        for mut record in current.resources {
            let (manager, id) = match record.domain {
                Domain::Dotfile => (String::new(), record.id),
                Domain::Package => {
                    let manager = record.metadata.remove(MANAGER_KEY);
                    let name = record.metadata.remove(NAME_KEY);
                    let split = record
                        .id
                        .split_once(':')
                        .map(|(manager, name)| (manager.to_string(), name.to_string()));

                    match (manager, name, split) {
                        (Some(manager), Some(name), _) => (manager, name),
                        (Some(manager), None, Some((_, name))) => (manager, name),
                        (None, name, Some((manager, split_name))) => {
                            (manager, name.unwrap_or(split_name))
                        }
                        _ => return Err(LockError::InvalidRecord { id: record.id }),
                    }
                }
            };

            resources.push(ManagedResource {
                domain: record.domain,
                manager,
                id,
                installed_at: record.installed_at,
                metadata: record.metadata,
            });
        }

        Ok(LockFile {
            version: LOCK_VERSION,
            resources,
        })
    }
}

impl From<&LockFile> for CurrentLock {
    fn from(lock: &LockFile) -> Self {
        let resources = lock
            .resources
            .iter()
            .map(|resource| {
                let mut metadata = resource.metadata.clone();
                let id = match resource.domain {
                    Domain::Dotfile => resource.id.clone(),
                    Domain::Package => {
                        metadata.insert(MANAGER_KEY.into(), resource.manager.clone());
                        metadata.insert(NAME_KEY.into(), resource.id.clone());
                        format!("{}:{}", resource.manager, resource.id)
                    }
                };

                ResourceRecord {
                    domain: resource.domain,
                    id,
                    state: managed_state(),
                    installed_at: resource.installed_at,
                    metadata,
                }
            })
            .collect();

        Self {
            version: i64::from(LOCK_VERSION),
            resources,
        }
    }
}
