// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use driftwood::{
    path::{default_config_dir, home_dir},
    reconcile::Reconciliation,
    Context, SyncOptions, SyncReport,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  driftwood [options] <driftwood-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<bool> {
        let ctx = Context::load(home_dir()?, default_config_dir()?)?;

        let cancellation = ctx.cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping after current operation");
                cancellation.cancel();
            }
        });

        match self.command {
            Command::Status(opts) => run_status(&ctx, opts).await,
            Command::Apply(opts) => run_apply(&ctx, opts).await,
            Command::Install(opts) => run_install(&ctx, opts).await,
            Command::Uninstall(opts) => run_uninstall(&ctx, opts).await,
            Command::Add(opts) => run_add(&ctx, opts),
            Command::Rm(opts) => run_rm(&ctx, opts),
            Command::Diff(opts) => run_diff(&ctx, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show managed, missing, and untracked packages and dotfiles.
    #[command(override_usage = "driftwood status [options]")]
    Status(StatusOptions),

    /// Install missing packages and deploy missing dotfiles.
    #[command(override_usage = "driftwood apply [options]")]
    Apply(ApplyOptions),

    /// Install packages and record them.
    #[command(override_usage = "driftwood install [options] <package>...")]
    Install(PackageOptions),

    /// Uninstall packages and forget them.
    #[command(override_usage = "driftwood uninstall [options] <package>...")]
    Uninstall(PackageOptions),

    /// Copy dotfiles from home directory into the config directory.
    #[command(override_usage = "driftwood add [options] <path>...")]
    Add(AddOptions),

    /// Remove dotfiles from the config directory.
    #[command(override_usage = "driftwood rm [options] <name>...")]
    Rm(RemoveOptions),

    /// Show how deployed dotfiles differ from their source.
    #[command(override_usage = "driftwood diff [<name>]...")]
    Diff(DiffOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Only show packages.
    #[arg(short, long)]
    pub packages: bool,

    /// Only show dotfiles.
    #[arg(short, long)]
    pub dotfiles: bool,

    /// Hide untracked items.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Show what would change without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Redeploy dotfiles whose deployed content drifted.
    #[arg(short, long)]
    pub restore_drifted: bool,

    /// Only apply packages.
    #[arg(short, long)]
    pub packages: bool,

    /// Only apply dotfiles.
    #[arg(short, long)]
    pub dotfiles: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PackageOptions {
    /// Packages to operate on.
    #[arg(required = true, value_name = "package")]
    pub packages: Vec<String>,

    /// Package manager to use instead of the default manager.
    #[arg(short, long, value_name = "manager")]
    pub manager: Option<String>,

    /// Show what would change without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Files or directories in home directory to manage.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<String>,

    /// Show what would change without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Names of dotfiles in config directory.
    #[arg(required = true, value_name = "name")]
    pub names: Vec<String>,

    /// Show what would change without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Dotfiles to compare, every drifted dotfile if empty.
    #[arg(value_name = "name")]
    pub names: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(true) => exit(0),
        Ok(false) => exit(1),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<bool> {
    Cli::parse().run().await
}

async fn run_status(ctx: &Context, opts: StatusOptions) -> Result<bool> {
    let orchestrator = ctx.orchestrator();
    let reconciliations = match (opts.packages, opts.dotfiles) {
        (true, false) => vec![orchestrator.reconcile_packages().await?],
        (false, true) => vec![orchestrator.reconcile_dotfiles().await?],
        _ => orchestrator.status().await?,
    };

    for reconciliation in &reconciliations {
        print_reconciliation(reconciliation, opts.quiet);
    }

    Ok(true)
}

async fn run_apply(ctx: &Context, opts: ApplyOptions) -> Result<bool> {
    let options = SyncOptions {
        dry_run: opts.dry_run,
        restore_drifted: opts.restore_drifted,
        packages: opts.packages,
        dotfiles: opts.dotfiles,
    };

    let report = ctx.orchestrator().sync(&options).await?;
    Ok(print_report(&report))
}

async fn run_install(ctx: &Context, opts: PackageOptions) -> Result<bool> {
    let report = ctx
        .orchestrator()
        .install(opts.manager.as_deref(), &opts.packages, opts.dry_run)
        .await?;
    Ok(print_report(&report))
}

async fn run_uninstall(ctx: &Context, opts: PackageOptions) -> Result<bool> {
    let report = ctx
        .orchestrator()
        .uninstall(opts.manager.as_deref(), &opts.packages, opts.dry_run)
        .await?;
    Ok(print_report(&report))
}

fn run_add(ctx: &Context, opts: AddOptions) -> Result<bool> {
    let paths: Vec<PathBuf> = opts
        .paths
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
        .collect();
    let report = ctx.orchestrator().add_dotfiles(&paths, opts.dry_run)?;
    Ok(print_report(&report))
}

fn run_rm(ctx: &Context, opts: RemoveOptions) -> Result<bool> {
    let report = ctx.orchestrator().remove_dotfiles(&opts.names, opts.dry_run)?;
    Ok(print_report(&report))
}

async fn run_diff(ctx: &Context, opts: DiffOptions) -> Result<bool> {
    let names = if opts.names.is_empty() {
        ctx.orchestrator()
            .reconcile_dotfiles()
            .await?
            .drifted()
            .map(|item| item.name.clone())
            .collect()
    } else {
        opts.names
    };

    for name in names {
        let dotfile = ctx.dotfiles.find(&name)?;
        print!("{}", ctx.dotfiles.diff(&dotfile)?);
    }

    Ok(true)
}

fn print_reconciliation(reconciliation: &Reconciliation, quiet: bool) {
    println!("{}s:", reconciliation.domain);
    for item in reconciliation.items() {
        if quiet && item.state == driftwood::ItemState::Untracked {
            continue;
        }

        let drifted = if item.drifted { " (drifted)" } else { "" };
        match item.metadata.get("version") {
            Some(version) => println!("  {:<10} {item} {version}{drifted}", item.state),
            None => println!("  {:<10} {item}{drifted}", item.state),
        }
    }
}

fn print_report(report: &SyncReport) -> bool {
    for result in &report.results {
        println!("{result}");
    }

    info!(
        "{} succeeded, {} failed, {} skipped, {} would apply",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.would_apply()
    );
    report.is_success()
}
