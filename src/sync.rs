// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Synchronization orchestration.
//!
//! The orchestrator reconciles each domain, then applies whatever is missing
//! one item at a time in sorted order. Every success is recorded in the lock
//! store before the next item starts, so an interrupted run never loses track
//! of what it already did. Failures of individual items are collected into a
//! [`SyncReport`] and do not stop the batch. Failing to record into the lock
//! store does.

use crate::{
    context::Context,
    dotfile::{Dotfile, DotfileError},
    lock::{Domain, LockError},
    manager::{ManagerError, PackageManager},
    reconcile::{reconcile_domain, Item, Reconciliation},
};

use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
    future::Future,
    path::PathBuf,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Options controlling a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Report what would change without changing anything.
    pub dry_run: bool,

    /// Redeploy managed dotfiles whose target drifted from the source.
    pub restore_drifted: bool,

    /// Only sync packages.
    pub packages: bool,

    /// Only sync dotfiles.
    pub dotfiles: bool,
}

impl SyncOptions {
    /// Check if `domain` takes part in the run.
    ///
    /// Selecting neither domain selects both.
    pub fn selects(&self, domain: Domain) -> bool {
        if !self.packages && !self.dotfiles {
            return true;
        }

        match domain {
            Domain::Package => self.packages,
            Domain::Dotfile => self.dotfiles,
        }
    }
}

/// Operation attempted on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Uninstall,
    Deploy,
    Add,
    Remove,
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Install => fmt.write_str("install"),
            Self::Uninstall => fmt.write_str("uninstall"),
            Self::Deploy => fmt.write_str("deploy"),
            Self::Add => fmt.write_str("add"),
            Self::Remove => fmt.write_str("remove"),
        }
    }
}

/// How an attempted operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Operation applied and recorded.
    Succeeded,

    /// Dry run, operation would have been applied.
    WouldApply,

    /// Provider failed, nothing recorded.
    Failed { error: String },

    /// Never attempted because the run was cancelled.
    Skipped,
}

/// Result of one item in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub domain: Domain,
    pub manager: String,
    pub name: String,
    pub action: Action,
    pub outcome: Outcome,
}

impl Display for ItemResult {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let subject = if self.manager.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.manager, self.name)
        };

        match &self.outcome {
            Outcome::Succeeded => write!(fmt, "{} {subject}", self.action),
            Outcome::WouldApply => write!(fmt, "would {} {subject}", self.action),
            Outcome::Failed { error } => write!(fmt, "failed to {} {subject}: {error}", self.action),
            Outcome::Skipped => write!(fmt, "skipped {} {subject}", self.action),
        }
    }
}

/// Results of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub results: Vec<ItemResult>,
}

impl SyncReport {
    /// Number of applied operations.
    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Succeeded))
    }

    /// Number of failed operations.
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed { .. }))
    }

    /// Number of operations skipped due to cancellation.
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped))
    }

    /// Number of operations a dry run would apply.
    pub fn would_apply(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::WouldApply))
    }

    /// Check that no operation failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| predicate(&result.outcome))
            .count()
    }

    fn push(&mut self, domain: Domain, manager: &str, name: &str, action: Action, outcome: Outcome) {
        match &outcome {
            Outcome::Succeeded => info!("{action} {name}"),
            Outcome::Failed { error } => warn!("failed to {action} {name}: {error}"),
            Outcome::Skipped => debug!("skipped {action} {name}"),
            Outcome::WouldApply => debug!("would {action} {name}"),
        }

        self.results.push(ItemResult {
            domain,
            manager: manager.into(),
            name: name.into(),
            action,
            outcome,
        });
    }
}

/// Reconcile domains and apply changes.
#[derive(Debug)]
pub struct Orchestrator<'ctx> {
    ctx: &'ctx Context,
}

impl<'ctx> Orchestrator<'ctx> {
    /// Construct new orchestrator over `ctx`.
    pub fn new(ctx: &'ctx Context) -> Self {
        Self { ctx }
    }

    /// Reconcile declared packages against installed packages.
    ///
    /// Declared packages are everything in the lock store plus everything in
    /// configuration. Installed packages come from every available manager.
    /// Managers that are unknown, unavailable, or fail to list contribute no
    /// installed packages.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if lock store cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub async fn reconcile_packages(&self) -> Result<Reconciliation> {
        let lock = self.ctx.lock.read()?;
        let mut declared: Vec<Item> = lock
            .resources
            .iter()
            .filter(|resource| resource.domain == Domain::Package)
            .map(|resource| {
                Item::package(&resource.manager, &resource.id)
                    .with_metadata(resource.metadata.clone())
            })
            .collect();
        declared.extend(
            self.ctx
                .config
                .packages
                .iter()
                .map(|package| Item::package(self.ctx.config.manager_of(package), &package.name)),
        );

        for manager in declared.iter().map(|item| item.manager.as_str()).collect::<BTreeSet<_>>() {
            if !self.ctx.registry.contains(manager) {
                warn!("packages declared for unknown manager {manager:?}");
            }
        }

        let mut live = Vec::new();
        for name in self.ctx.registry.names() {
            let manager = self.ctx.registry.get(name)?;
            if !manager.is_available().await {
                debug!("manager {name} is not available");
                continue;
            }

            match self.bounded(name, "list", "", manager.list_installed()).await {
                Ok(installed) => live.extend(
                    installed
                        .into_iter()
                        .map(|package| Item::package(name, package)),
                ),
                Err(err) => warn!("cannot list packages of {name}: {err}"),
            }
        }

        Ok(reconcile_domain(Domain::Package, declared, live))
    }

    /// Reconcile dotfiles in source tree against home directory.
    ///
    /// Managed dotfiles are checked for drift.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Dotfile`] if source tree or home directory
    ///   cannot be scanned.
    #[instrument(skip(self), level = "debug")]
    pub async fn reconcile_dotfiles(&self) -> Result<Reconciliation> {
        let dotfiles: BTreeMap<String, Dotfile> = self
            .ctx
            .dotfiles
            .list()?
            .into_iter()
            .filter(|dotfile| self.ctx.config.dotfiles.includes(&dotfile.name))
            .map(|dotfile| (dotfile.name.clone(), dotfile))
            .collect();

        let declared: Vec<Item> = dotfiles.values().map(Item::dotfile).collect();
        let mut live: Vec<Item> = dotfiles
            .values()
            .filter(|dotfile| dotfile.target.symlink_metadata().is_ok())
            .map(Item::dotfile)
            .collect();
        live.extend(self.ctx.dotfiles.untracked()?.iter().map(Item::dotfile));

        let mut reconciliation = reconcile_domain(Domain::Dotfile, declared, live);
        for item in &mut reconciliation.managed {
            let Some(dotfile) = dotfiles.get(&item.name) else {
                continue;
            };

            match self.ctx.dotfiles.is_drifted(dotfile) {
                Ok(drifted) => item.drifted = drifted,
                Err(err) => warn!("cannot check {} for drift: {err}", item.name),
            }
        }

        Ok(reconciliation)
    }

    /// Reconcile every domain.
    ///
    /// Warns about packages tracked by more than one manager.
    ///
    /// # Errors
    ///
    /// - Return any error from [`Orchestrator::reconcile_packages`] or
    ///   [`Orchestrator::reconcile_dotfiles`].
    pub async fn status(&self) -> Result<Vec<Reconciliation>> {
        let packages = self.reconcile_packages().await?;
        let lock = self.ctx.lock.read()?;
        let names: BTreeSet<&str> = packages
            .managed
            .iter()
            .chain(packages.missing.iter())
            .map(|item| item.name.as_str())
            .collect();

        for name in names {
            let managers: BTreeSet<&str> = lock
                .find_by_id(name)
                .into_iter()
                .filter(|resource| resource.domain == Domain::Package)
                .map(|resource| resource.manager.as_str())
                .collect();
            if managers.len() > 1 {
                warn!(
                    "package {name:?} is tracked by several managers: {}",
                    managers.into_iter().collect::<Vec<_>>().join(", ")
                );
            }
        }

        Ok(vec![packages, self.reconcile_dotfiles().await?])
    }

    /// Apply every missing item, and drifted dotfiles if asked to.
    ///
    /// Packages go first, then dotfiles.
    ///
    /// # Errors
    ///
    /// - Return any reconciliation error.
    /// - Return [`SyncError::Lock`] if a success cannot be recorded. Items
    ///   recorded before the failure stay recorded.
    #[instrument(skip(self), level = "debug")]
    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if options.selects(Domain::Package) {
            let packages = self.reconcile_packages().await?;
            for item in &packages.missing {
                self.install_one(&mut report, &item.manager, &item.name, options.dry_run)
                    .await?;
            }
        }

        if options.selects(Domain::Dotfile) {
            let dotfiles = self.reconcile_dotfiles().await?;
            let mut pending: Vec<&Item> = dotfiles.missing.iter().collect();
            if options.restore_drifted {
                pending.extend(dotfiles.drifted());
            }
            pending.sort_by(|a, b| a.name.cmp(&b.name));

            for item in pending {
                self.deploy_one(&mut report, &item.name, options.dry_run)?;
            }
        }

        info!(
            "{} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Install `names` through `manager`, or the default manager.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if a success cannot be recorded.
    pub async fn install(
        &self,
        manager: Option<&str>,
        names: &[String],
        dry_run: bool,
    ) -> Result<SyncReport> {
        let manager = manager.unwrap_or(self.ctx.config.settings.default_manager.as_str());
        let mut report = SyncReport::default();
        for name in names {
            self.install_one(&mut report, manager, name, dry_run).await?;
        }

        Ok(report)
    }

    /// Uninstall `names` through `manager`, or the default manager.
    ///
    /// Successfully uninstalled packages are dropped from the lock store.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if lock store cannot be updated.
    pub async fn uninstall(
        &self,
        manager: Option<&str>,
        names: &[String],
        dry_run: bool,
    ) -> Result<SyncReport> {
        let manager_name = manager.unwrap_or(self.ctx.config.settings.default_manager.as_str());
        let mut report = SyncReport::default();
        for name in names {
            let outcome = match self.gate(dry_run) {
                Some(outcome) => outcome,
                None => match self.available(manager_name).await {
                    Err(err) => failed(err),
                    Ok(manager) => {
                        match self
                            .bounded(manager_name, "uninstall", name, manager.uninstall(name))
                            .await
                        {
                            Err(err) => failed(err),
                            Ok(()) => {
                                self.ctx
                                    .lock
                                    .remove_resource(Domain::Package, manager_name, name)?;
                                Outcome::Succeeded
                            }
                        }
                    }
                },
            };
            report.push(Domain::Package, manager_name, name, Action::Uninstall, outcome);
        }

        Ok(report)
    }

    /// Copy `paths` from home into the source tree and record them.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if a success cannot be recorded.
    pub fn add_dotfiles(&self, paths: &[PathBuf], dry_run: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for path in paths {
            let display = path.display().to_string();
            if let Some(outcome) = self.gate(dry_run) {
                report.push(Domain::Dotfile, "", &display, Action::Add, outcome);
                continue;
            }

            match self.ctx.dotfiles.add(path) {
                Err(err) => report.push(Domain::Dotfile, "", &display, Action::Add, failed(err)),
                Ok(names) => {
                    for name in names {
                        self.ctx
                            .lock
                            .add_resource(Domain::Dotfile, "", &name, None, BTreeMap::new())?;
                        report.push(Domain::Dotfile, "", &name, Action::Add, Outcome::Succeeded);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Delete `names` from the source tree and forget them.
    ///
    /// Deployed targets are left in place.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if lock store cannot be updated.
    pub fn remove_dotfiles(&self, names: &[String], dry_run: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for name in names {
            let outcome = match self.gate(dry_run) {
                Some(outcome) => outcome,
                None => match self.ctx.dotfiles.remove(name) {
                    Err(err) => failed(err),
                    Ok(()) => {
                        self.forget_dotfiles_under(name)?;
                        Outcome::Succeeded
                    }
                },
            };
            report.push(Domain::Dotfile, "", name, Action::Remove, outcome);
        }

        Ok(report)
    }

    async fn install_one(
        &self,
        report: &mut SyncReport,
        manager_name: &str,
        name: &str,
        dry_run: bool,
    ) -> Result<()> {
        let outcome = match self.gate(dry_run) {
            Some(outcome) => outcome,
            None => match self.available(manager_name).await {
                Err(err) => failed(err),
                Ok(manager) => {
                    match self
                        .bounded(manager_name, "install", name, manager.install(name))
                        .await
                    {
                        Err(err) => failed(err),
                        Ok(()) => {
                            let version = self.version_of(manager_name, manager, name).await;
                            self.ctx.lock.add_resource(
                                Domain::Package,
                                manager_name,
                                name,
                                version.as_deref(),
                                BTreeMap::new(),
                            )?;
                            Outcome::Succeeded
                        }
                    }
                }
            },
        };

        report.push(Domain::Package, manager_name, name, Action::Install, outcome);
        Ok(())
    }

    fn deploy_one(&self, report: &mut SyncReport, name: &str, dry_run: bool) -> Result<()> {
        let outcome = match self.gate(dry_run) {
            Some(outcome) => outcome,
            None => match self.ctx.dotfiles.deploy(name) {
                Err(err) => failed(err),
                Ok(_) => {
                    self.ctx
                        .lock
                        .add_resource(Domain::Dotfile, "", name, None, BTreeMap::new())?;
                    Outcome::Succeeded
                }
            },
        };

        report.push(Domain::Dotfile, "", name, Action::Deploy, outcome);
        Ok(())
    }

    /// Outcome for items that must not reach a provider.
    fn gate(&self, dry_run: bool) -> Option<Outcome> {
        if self.ctx.cancellation.is_cancelled() {
            Some(Outcome::Skipped)
        } else if dry_run {
            Some(Outcome::WouldApply)
        } else {
            None
        }
    }

    async fn available(&self, name: &str) -> Result<&'ctx dyn PackageManager, ManagerError> {
        let manager = self.ctx.registry.get(name)?;
        if !manager.is_available().await {
            return Err(ManagerError::Unavailable {
                manager: name.into(),
            });
        }

        Ok(manager)
    }

    async fn version_of(
        &self,
        manager_name: &str,
        manager: &dyn PackageManager,
        name: &str,
    ) -> Option<String> {
        match self
            .bounded(manager_name, "version", name, manager.installed_version(name))
            .await
        {
            Ok(version) => version,
            Err(err) => {
                debug!("no version for {manager_name}:{name}: {err}");
                None
            }
        }
    }

    /// Run `operation` under the configured package timeout.
    async fn bounded<T>(
        &self,
        manager: &str,
        operation: &'static str,
        package: &str,
        future: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        let limit = self.ctx.config.settings.package_timeout();
        timeout(limit, future)
            .await
            .unwrap_or_else(|_| {
                Err(ManagerError::Timeout {
                    manager: manager.into(),
                    operation,
                    package: package.into(),
                    seconds: limit.as_secs(),
                })
            })
    }

    fn forget_dotfiles_under(&self, name: &str) -> Result<()> {
        let prefix = format!("{}/", name.trim_end_matches('/'));
        let recorded: Vec<String> = self
            .ctx
            .lock
            .read()?
            .dotfiles()
            .filter(|resource| resource.id == name || resource.id.starts_with(&prefix))
            .map(|resource| resource.id.clone())
            .collect();

        for id in recorded {
            self.ctx.lock.remove_resource(Domain::Dotfile, "", &id)?;
        }

        Ok(())
    }
}

fn failed(err: impl std::error::Error) -> Outcome {
    let mut error = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        error.push_str(": ");
        error.push_str(&cause.to_string());
        source = cause.source();
    }

    Outcome::Failed { error }
}

/// Synchronization error types.
///
/// Only failures that make the rest of a run meaningless end up here.
/// Failures of single items are part of the [`SyncReport`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Lock store cannot be read or written.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Dotfiles cannot be enumerated.
    #[error(transparent)]
    Dotfile(#[from] DotfileError),

    /// Package managers cannot be enumerated.
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Friendly result alias :3
type Result<T, E = SyncError> = std::result::Result<T, E>;
