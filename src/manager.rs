// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package manager abstraction.
//!
//! Every package manager driftwood can talk to sits behind the
//! [`PackageManager`] trait. Managers are registered by name in a
//! [`ManagerRegistry`], which is the one place that decides which
//! implementation backs a given name. The built-in managers and any manager
//! declared in configuration are all [`CommandManager`] instances driven by a
//! command table.

pub mod command;

pub use command::CommandManager;

use crate::config::ManagerDefinition;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// Operations driftwood needs from a package manager.
///
/// Implementations only report what the manager says. Deciding what to
/// install is left to the caller.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Check if manager can be used on this machine.
    async fn is_available(&self) -> bool;

    /// Names of every installed package.
    async fn list_installed(&self) -> Result<Vec<String>>;

    /// Install package `name`. Installing an installed package succeeds.
    async fn install(&self, name: &str) -> Result<()>;

    /// Uninstall package `name`. Uninstalling a missing package succeeds.
    async fn uninstall(&self, name: &str) -> Result<()>;

    /// Check if package `name` is installed.
    async fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self
            .list_installed()
            .await?
            .iter()
            .any(|installed| installed == name))
    }

    /// Installed version of package `name`, if the manager can tell.
    async fn installed_version(&self, name: &str) -> Result<Option<String>>;
}

/// Package managers keyed by name.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: BTreeMap<String, Box<dyn PackageManager>>,
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_set().entries(self.managers.keys()).finish()
    }
}

impl ManagerRegistry {
    /// Construct empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct registry of built-in managers plus `definitions`.
    ///
    /// A definition named after a built-in manager replaces it.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::Pattern`] if a list pattern does not compile.
    pub fn from_definitions(definitions: &BTreeMap<String, ManagerDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        let mut tables = command::builtin_definitions();
        tables.extend(
            definitions
                .iter()
                .map(|(name, definition)| (name.clone(), definition.clone())),
        );

        for (name, definition) in tables {
            debug!("register manager {name}");
            let manager = CommandManager::new(name.as_str(), definition)?;
            registry.register(name, manager);
        }

        Ok(registry)
    }

    /// Register `manager` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, manager: impl PackageManager + 'static) {
        self.managers.insert(name.into(), Box::new(manager));
    }

    /// Lookup manager by `name`.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::UnknownManager`] if nothing is registered
    ///   under `name`.
    pub fn get(&self, name: &str) -> Result<&dyn PackageManager> {
        self.managers
            .get(name)
            .map(|manager| manager.as_ref())
            .ok_or_else(|| ManagerError::UnknownManager {
                manager: name.into(),
            })
    }

    /// Check if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.managers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }
}

/// Package manager error types.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Manager cannot be used on this machine.
    #[error("package manager {manager:?} is not available")]
    Unavailable { manager: String },

    /// Nothing registered under name.
    #[error("unknown package manager {manager:?}")]
    UnknownManager { manager: String },

    /// Manager command exited unsuccessfully.
    #[error("command {command:?} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Manager command could not be started.
    #[error("failed to run command {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Manager operation took too long.
    #[error("{manager} {operation} of {package:?} timed out after {seconds}s")]
    Timeout {
        manager: String,
        operation: &'static str,
        package: String,
        seconds: u64,
    },

    /// Manager has no command for operation.
    #[error("package manager {manager:?} has no {operation} command")]
    NotConfigured {
        manager: String,
        operation: &'static str,
    },

    /// List pattern does not compile.
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
