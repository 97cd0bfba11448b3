// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-invocation context.
//!
//! Everything an operation needs is bundled into one [`Context`] that is
//! built once and passed down explicitly.

use crate::{
    config::{Config, ConfigError, CONFIG_FILE_NAME},
    dotfile::{DotfileError, DotfileManager},
    lock::{LockStore, LOCK_FILE_NAME},
    manager::{ManagerError, ManagerRegistry},
    sync::Orchestrator,
};

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, instrument};

/// Shared flag telling long running operations to stop.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Construct unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Configuration, stores, and providers for one invocation.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub lock: LockStore,
    pub dotfiles: DotfileManager,
    pub registry: ManagerRegistry,
    pub cancellation: Cancellation,
}

impl Context {
    /// Assemble context from its parts.
    pub fn new(
        config: Config,
        lock: LockStore,
        dotfiles: DotfileManager,
        registry: ManagerRegistry,
    ) -> Self {
        Self {
            config,
            lock,
            dotfiles,
            registry,
            cancellation: Cancellation::new(),
        }
    }

    /// Load context for `home` and `config_dir`.
    ///
    /// Reads configuration from the config directory, registers built-in and
    /// configured package managers, and checks the default manager exists.
    ///
    /// # Errors
    ///
    /// - Return [`ContextError::Config`] if configuration is invalid.
    /// - Return [`ContextError::UnknownDefaultManager`] if default manager is
    ///   not registered.
    /// - Return [`ContextError::Dotfile`] or [`ContextError::Manager`] if
    ///   either provider cannot be built.
    #[instrument(skip(home, config_dir), level = "debug")]
    pub fn load(home: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let config_dir = config_dir.into();
        debug!("config directory {}", config_dir.display());

        let config = Config::load(config_dir.join(CONFIG_FILE_NAME))?;
        let registry = ManagerRegistry::from_definitions(&config.managers)?;
        if !registry.contains(&config.settings.default_manager) {
            return Err(ContextError::UnknownDefaultManager {
                manager: config.settings.default_manager.clone(),
            });
        }

        let dotfiles = DotfileManager::new(&home, &config_dir, &config.settings.ignore_patterns)?;
        let lock = LockStore::new(config_dir.join(LOCK_FILE_NAME));

        Ok(Self::new(config, lock, dotfiles, registry))
    }

    /// Orchestrator over this context.
    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(self)
    }
}

/// Context loading error types.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dotfile manager cannot be built.
    #[error(transparent)]
    Dotfile(#[from] DotfileError),

    /// Manager registry cannot be built.
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// Default manager names nothing registered.
    #[error("default manager {manager:?} is not a known package manager")]
    UnknownDefaultManager { manager: String },
}

/// Friendly result alias :3
type Result<T, E = ContextError> = std::result::Result<T, E>;
