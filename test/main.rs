// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use driftwood::{
    config::{Config, CONFIG_FILE_NAME},
    dotfile::DotfileManager,
    lock::{LockStore, LOCK_FILE_NAME},
    manager::{ManagerError, ManagerRegistry, PackageManager},
    Cancellation, Context,
};

use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;

/// Home directory with a config directory inside it.
pub(crate) struct Fixture {
    _root: TempDir,
    pub(crate) home: PathBuf,
    pub(crate) config_dir: PathBuf,
}

impl Fixture {
    pub(crate) fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let home = root.path().join("home");
        let config_dir = home.join(".config").join("driftwood");
        fs::create_dir_all(&config_dir)?;

        Ok(Self {
            _root: root,
            home,
            config_dir,
        })
    }

    pub(crate) fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<PathBuf> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents.as_ref())?;

        Ok(path)
    }

    pub(crate) fn write_config(&self, contents: impl AsRef<str>) -> Result<PathBuf> {
        self.write(self.config_dir.join(CONFIG_FILE_NAME), contents)
    }

    pub(crate) fn lock_path(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE_NAME)
    }

    /// Build context whose registry only holds `managers`.
    ///
    /// Templates see HOME as "/x" and nothing else.
    pub(crate) fn context(&self, managers: Vec<(&str, FakeManager)>) -> Result<Context> {
        let config = Config::load(self.config_dir.join(CONFIG_FILE_NAME))?;
        let mut registry = ManagerRegistry::new();
        for (name, manager) in managers {
            registry.register(name, manager);
        }

        let dotfiles = DotfileManager::new(
            &self.home,
            &self.config_dir,
            &config.settings.ignore_patterns,
        )?
        .with_env(|name| (name == "HOME").then(|| "/x".to_string()));
        let lock = LockStore::new(self.lock_path());

        Ok(Context::new(config, lock, dotfiles, registry))
    }
}

/// In-memory package manager.
#[derive(Clone, Debug)]
pub(crate) struct FakeManager {
    installed: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: BTreeSet<String>,
    available: bool,
    delay: Option<Duration>,
    cancel_after_install: Option<Cancellation>,
}

impl FakeManager {
    pub(crate) fn new(installed: &[&str]) -> Self {
        Self {
            installed: Arc::new(Mutex::new(installed.iter().map(ToString::to_string).collect())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_on: BTreeSet::new(),
            available: true,
            delay: None,
            cancel_after_install: None,
        }
    }

    pub(crate) fn failing_on(mut self, names: &[&str]) -> Self {
        self.fail_on = names.iter().map(ToString::to_string).collect();
        self
    }

    pub(crate) fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Request cancellation once an install succeeds.
    pub(crate) fn cancelling(mut self, cancellation: Cancellation) -> Self {
        self.cancel_after_install = Some(cancellation);
        self
    }

    pub(crate) fn installed(&self) -> BTreeSet<String> {
        self.installed.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn operate(&self, operation: &str, name: &str) -> Result<(), ManagerError> {
        self.calls.lock().unwrap().push(format!("{operation} {name}"));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on.contains(name) {
            return Err(ManagerError::CommandFailed {
                command: format!("fake {operation} {name}"),
                message: format!("no package named {name}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PackageManager for FakeManager {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn list_installed(&self) -> Result<Vec<String>, ManagerError> {
        Ok(self.installed().into_iter().collect())
    }

    async fn install(&self, name: &str) -> Result<(), ManagerError> {
        self.operate("install", name).await?;
        self.installed.lock().unwrap().insert(name.to_string());
        if let Some(cancellation) = &self.cancel_after_install {
            cancellation.cancel();
        }
        Ok(())
    }

    async fn uninstall(&self, name: &str) -> Result<(), ManagerError> {
        self.operate("uninstall", name).await?;
        self.installed.lock().unwrap().remove(name);
        Ok(())
    }

    async fn installed_version(&self, name: &str) -> Result<Option<String>, ManagerError> {
        Ok(self
            .installed
            .lock()
            .unwrap()
            .contains(name)
            .then(|| "1.0.0".to_string()))
    }
}
