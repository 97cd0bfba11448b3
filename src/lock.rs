// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lock store management.
//!
//! Driftwood records every resource it successfully installs or deploys in
//! the __lock store__. The lock store is a single TOML file named
//! "driftwood.lock" at the top-level of the config directory. It is the
//! declared half of reconciliation: anything listed in it is expected to be
//! present on the machine.
//!
//! # Identity
//!
//! Each resource is identified by its domain, manager, and id. Packages use
//! the package name as their id, while dotfiles use their relative path in the
//! source tree with an empty manager. No two resources share an identity.
//!
//! # Versioning
//!
//! Older lock files are upgraded when read, see [`format`] for the schemas.
//! The upgrade only lives in memory until the next write.

mod format;

use format::{CurrentLock, VersionedLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Name of lock file at the top-level of the config directory.
pub const LOCK_FILE_NAME: &str = "driftwood.lock";

/// Schema version every write emits.
pub const LOCK_VERSION: u32 = 2;

/// Metadata key holding the manager of a package record on disk.
pub const MANAGER_KEY: &str = "manager";

/// Metadata key holding the name of a package record on disk.
pub const NAME_KEY: &str = "name";

/// Category of managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Package,
    Dotfile,
}

impl Display for Domain {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Package => fmt.write_str("package"),
            Self::Dotfile => fmt.write_str("dotfile"),
        }
    }
}

/// Resource that driftwood installed or deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    /// Domain resource belongs to.
    pub domain: Domain,

    /// Manager of package, empty for dotfiles.
    pub manager: String,

    /// Package name, or relative path of dotfile.
    pub id: String,

    /// Time of first successful management.
    pub installed_at: DateTime<Utc>,

    /// Extra display information, e.g. "version".
    pub metadata: BTreeMap<String, String>,
}

impl ManagedResource {
    fn is(&self, domain: Domain, manager: &str, id: &str) -> bool {
        self.domain == domain && self.manager == manager && self.id == id
    }
}

/// In-memory lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockFile {
    /// Schema version.
    pub version: u32,

    /// Managed resources in recorded order.
    pub resources: Vec<ManagedResource>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCK_VERSION,
            resources: Vec::new(),
        }
    }
}

impl LockFile {
    /// Insert resource, or update it if its identity is already recorded.
    ///
    /// The installation time is only set on first insert. Metadata of an
    /// existing resource is replaced. A given `version` is stored as metadata
    /// key "version".
    ///
    /// # Errors
    ///
    /// - Return [`LockError::ReservedMetadata`] if package metadata uses
    ///   [`MANAGER_KEY`] or [`NAME_KEY`], which hold package identity on disk.
    pub fn upsert(
        &mut self,
        domain: Domain,
        manager: impl Into<String>,
        id: impl Into<String>,
        version: Option<&str>,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        if domain == Domain::Package {
            if let Some(key) = [MANAGER_KEY, NAME_KEY]
                .into_iter()
                .find(|key| metadata.contains_key(*key))
            {
                return Err(LockError::ReservedMetadata { key: key.into() });
            }
        }

        let manager = manager.into();
        let id = id.into();
        if let Some(version) = version.filter(|version| !version.is_empty()) {
            metadata.insert("version".into(), version.into());
        }

        match self
            .resources
            .iter_mut()
            .find(|resource| resource.is(domain, &manager, &id))
        {
            Some(resource) => resource.metadata = metadata,
            None => self.resources.push(ManagedResource {
                domain,
                manager,
                id,
                installed_at: Utc::now(),
                metadata,
            }),
        }

        Ok(())
    }

    /// Remove resource by identity.
    ///
    /// Returns false if the resource was not recorded.
    pub fn remove(&mut self, domain: Domain, manager: &str, id: &str) -> bool {
        let before = self.resources.len();
        self.resources
            .retain(|resource| !resource.is(domain, manager, id));
        before != self.resources.len()
    }

    /// Check if any resource of `manager` has `id`.
    pub fn has(&self, manager: &str, id: &str) -> bool {
        self.resources
            .iter()
            .any(|resource| resource.manager == manager && resource.id == id)
    }

    /// Find every resource with `id` across all managers.
    pub fn find_by_id(&self, id: &str) -> Vec<&ManagedResource> {
        self.resources
            .iter()
            .filter(|resource| resource.id == id)
            .collect()
    }

    /// Dotfiles recorded as deployed.
    pub fn dotfiles(&self) -> impl Iterator<Item = &ManagedResource> {
        self.resources
            .iter()
            .filter(|resource| resource.domain == Domain::Dotfile)
    }
}

impl FromStr for LockFile {
    type Err = LockError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        VersionedLock::decode(data)?.into_lock_file()
    }
}

impl Display for LockFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(&CurrentLock::from(self))
                .map_err(LockError::Serialize)?
                .as_str(),
        )
    }
}

/// File-backed lock store.
///
/// Holds no state besides its path. Every operation reads the file fresh, and
/// every mutation replaces the whole file atomically.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    /// Construct new lock store at `path`.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to lock file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Read lock file.
    ///
    /// A missing lock file yields an empty lock at the current version.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Read`] if lock file cannot be read.
    /// - Return any decoding error for malformed or unsupported data.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self) -> Result<LockFile> {
        match fs::read_to_string(&self.path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no lock file at {}", self.path.display());
                Ok(LockFile::default())
            }
            Err(err) => Err(LockError::Read {
                source: err,
                path: self.path.clone(),
            }),
        }
    }

    /// Write lock file in current schema.
    ///
    /// Data goes to a temporary sibling first, which then replaces the lock
    /// file, so readers only ever observe a complete file. Parent directories
    /// are created as needed.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Serialize`] if lock cannot be encoded.
    /// - Return [`LockError::Write`] if any step of replacement fails.
    #[instrument(skip(self, lock), level = "debug")]
    pub fn write(&self, lock: &LockFile) -> Result<()> {
        let data = toml::ser::to_string_pretty(&CurrentLock::from(lock))?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(parent)?;
            let mut temp = NamedTempFile::new_in(parent)?;
            temp.write_all(data.as_bytes())?;
            temp.as_file().sync_all()?;
            temp.persist(&self.path).map_err(|err| err.error)?;
            Ok(())
        };

        write().map_err(|err| LockError::Write {
            source: err,
            path: self.path.clone(),
        })?;
        debug!("wrote {} resources", lock.resources.len());

        Ok(())
    }

    /// Record resource, replacing metadata if already recorded.
    ///
    /// # Errors
    ///
    /// - Return any error from [`LockStore::read`] or [`LockStore::write`].
    #[instrument(skip(self, metadata), level = "debug")]
    pub fn add_resource(
        &self,
        domain: Domain,
        manager: &str,
        id: &str,
        version: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut lock = self.read()?;
        lock.upsert(domain, manager, id, version, metadata)?;
        self.write(&lock)
    }

    /// Forget resource.
    ///
    /// Removing a resource that is not recorded does nothing, and leaves the
    /// lock file untouched.
    ///
    /// # Errors
    ///
    /// - Return any error from [`LockStore::read`] or [`LockStore::write`].
    #[instrument(skip(self), level = "debug")]
    pub fn remove_resource(&self, domain: Domain, manager: &str, id: &str) -> Result<()> {
        let mut lock = self.read()?;
        if !lock.remove(domain, manager, id) {
            debug!("{domain} {id:?} not recorded, nothing to remove");
            return Ok(());
        }

        self.write(&lock)
    }

    /// Check if lock file records `id` under `manager`.
    ///
    /// # Errors
    ///
    /// - Return any error from [`LockStore::read`].
    pub fn has(&self, manager: &str, id: &str) -> Result<bool> {
        Ok(self.read()?.has(manager, id))
    }

    /// Find every recorded resource with `id` across all managers.
    ///
    /// # Errors
    ///
    /// - Return any error from [`LockStore::read`].
    pub fn find_by_id(&self, id: &str) -> Result<Vec<ManagedResource>> {
        Ok(self.read()?.find_by_id(id).into_iter().cloned().collect())
    }
}

/// Lock store error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Lock file exists but cannot be read.
    #[error("failed to read lock file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Lock file cannot be replaced.
    #[error("failed to write lock file {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Lock file is malformed.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    /// Lock cannot be encoded.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Lock file claims a schema this build does not know.
    #[error("unsupported lock file version {version}, expected at most {}", LOCK_VERSION)]
    UnsupportedVersion { version: i64 },

    /// Legacy lock data cannot be upgraded.
    #[error("failed to upgrade legacy lock file: {reason}")]
    Migration { reason: String },

    /// Package record without a recoverable manager.
    #[error("lock record {id:?} does not name its manager")]
    InvalidRecord { id: String },

    /// Package metadata uses a key that holds package identity.
    #[error("metadata key {key:?} is reserved for package records")]
    ReservedMetadata { key: String },
}

impl From<LockError> for FmtError {
    fn from(_: LockError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn store() -> anyhow::Result<(tempfile::TempDir, LockStore)> {
        let dir = tempfile::tempdir()?;
        let store = LockStore::new(dir.path().join("config").join(LOCK_FILE_NAME));
        Ok((dir, store))
    }

    #[test]
    fn missing_lock_file_reads_empty() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        assert_eq!(store.read()?, LockFile::default());
        assert!(!store.path().exists());

        Ok(())
    }

    #[test]
    fn write_then_read_is_lossless() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        let installed_at = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")?.with_timezone(&Utc);
        let lock = LockFile {
            version: LOCK_VERSION,
            resources: vec![
                ManagedResource {
                    domain: Domain::Package,
                    manager: "brew".into(),
                    id: "ripgrep".into(),
                    installed_at,
                    metadata: BTreeMap::from([("version".into(), "14.1.0".into())]),
                },
                ManagedResource {
                    domain: Domain::Dotfile,
                    manager: String::new(),
                    id: "config/nvim/init.lua".into(),
                    installed_at,
                    metadata: BTreeMap::new(),
                },
            ],
        };

        store.write(&lock)?;
        assert_eq!(store.read()?, lock);

        let data = fs::read_to_string(store.path())?;
        assert!(data.contains("version = 2"));
        assert!(data.contains(r#"id = "brew:ripgrep""#));
        assert!(data.contains(r#"type = "dotfile""#));

        Ok(())
    }

    #[test]
    fn legacy_lock_upgrades_in_memory() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        let legacy = indoc! {r#"
            version = 1

            [[packages.brew]]
            name = "git"
            version = "2.44.0"
            installed_at = "2024-05-01T12:00:00Z"

            [[packages.brew]]
            name = "htop"
            version = "3.3.0"
            installed_at = "2024-05-02T12:00:00Z"
        "#};
        fs::create_dir_all(store.path().parent().unwrap())?;
        fs::write(store.path(), legacy)?;

        let lock = store.read()?;
        assert!(lock.version >= 2);
        assert_eq!(lock.resources.len(), 2);
        assert!(lock.has("brew", "git"));
        assert!(lock.has("brew", "htop"));
        assert_eq!(
            lock.find_by_id("git")[0].metadata.get("version").map(String::as_str),
            Some("2.44.0")
        );
        assert_eq!(
            lock.find_by_id("htop")[0].installed_at,
            DateTime::parse_from_rfc3339("2024-05-02T12:00:00Z")?.with_timezone(&Utc)
        );

        // Upgrade is not written back until the next write.
        assert_eq!(fs::read_to_string(store.path())?, legacy);

        Ok(())
    }

    #[test]
    fn unversioned_lock_is_legacy() -> anyhow::Result<()> {
        let lock: LockFile = indoc! {r#"
            [[packages.cargo]]
            name = "bat"
        "#}
        .parse()?;

        assert_eq!(lock.version, LOCK_VERSION);
        assert!(lock.has("cargo", "bat"));
        assert_eq!(lock.resources[0].installed_at, DateTime::<Utc>::default());

        Ok(())
    }

    #[test]
    fn malformed_legacy_lock_fails_migration() {
        let result = "version = 1\n[[packages.brew]]\nname = \"\"\n".parse::<LockFile>();
        assert!(matches!(result, Err(LockError::Migration { .. })));
    }

    #[test]
    fn newer_lock_version_is_rejected() {
        let result = "version = 9\n".parse::<LockFile>();
        assert!(matches!(
            result,
            Err(LockError::UnsupportedVersion { version: 9 })
        ));
    }

    #[test]
    fn package_identity_recovered_from_id() -> anyhow::Result<()> {
        let lock: LockFile = indoc! {r#"
            version = 2

            [[resource]]
            type = "package"
            id = "npm:prettier"
            state = "managed"
            installed_at = "2025-01-01T00:00:00Z"
        "#}
        .parse()?;

        assert!(lock.has("npm", "prettier"));
        assert!(lock.resources[0].metadata.is_empty());

        Ok(())
    }

    #[test]
    fn add_resource_keeps_first_install_time() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        let first = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")?.with_timezone(&Utc);
        store.write(&LockFile {
            version: LOCK_VERSION,
            resources: vec![ManagedResource {
                domain: Domain::Package,
                manager: "brew".into(),
                id: "jq".into(),
                installed_at: first,
                metadata: BTreeMap::new(),
            }],
        })?;

        store.add_resource(Domain::Package, "brew", "jq", Some("1.7"), BTreeMap::new())?;
        store.add_resource(Domain::Package, "cargo", "jq", None, BTreeMap::new())?;

        let lock = store.read()?;
        assert_eq!(lock.resources.len(), 2);
        assert_eq!(lock.resources[0].installed_at, first);
        assert_eq!(
            lock.resources[0].metadata.get("version").map(String::as_str),
            Some("1.7")
        );
        assert_eq!(store.find_by_id("jq")?.len(), 2);

        Ok(())
    }

    #[test]
    fn remove_absent_resource_is_noop() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        store.remove_resource(Domain::Dotfile, "", "zshrc")?;
        assert!(!store.path().exists());

        store.add_resource(Domain::Dotfile, "", "zshrc", None, BTreeMap::new())?;
        assert!(store.has("", "zshrc")?);
        store.remove_resource(Domain::Dotfile, "", "zshrc")?;
        assert!(!store.has("", "zshrc")?);
        assert_eq!(store.read()?.dotfiles().count(), 0);

        Ok(())
    }

    #[test]
    fn package_identity_keys_rejected_as_metadata() -> anyhow::Result<()> {
        let (_dir, store) = store()?;
        let metadata = BTreeMap::from([("name".to_string(), "ripgrep".to_string())]);

        assert!(matches!(
            store.add_resource(Domain::Package, "brew", "rg", None, metadata.clone()),
            Err(LockError::ReservedMetadata { key }) if key == NAME_KEY
        ));
        assert!(!store.path().exists());

        store.add_resource(Domain::Dotfile, "", "zshrc", None, metadata)?;
        let lock = store.read()?;
        assert_eq!(
            lock.find_by_id("zshrc")[0].metadata.get("name").map(String::as_str),
            Some("ripgrep")
        );

        Ok(())
    }
}
