// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep declared packages and dotfiles in sync with the local machine.
//!
//! Driftwood compares three views of a machine: what the user declared in
//! configuration, what driftwood previously installed or deployed according
//! to its lock store, and what is actually present. Each package and dotfile
//! is then classified as managed, missing, or untracked, and missing items are
//! applied one at a time.
//!
//! # Layout
//!
//! - [`config`]: configuration file layout.
//! - [`lock`]: versioned record of everything driftwood manages.
//! - [`dotfile`]: source tree to home directory deployment.
//! - [`manager`]: package manager abstraction.
//! - [`reconcile`]: declared versus live classification.
//! - [`sync`]: applying reconciliation results.
//! - [`context`]: everything one invocation needs.

pub mod config;
pub mod context;
pub mod dotfile;
pub mod lock;
pub mod manager;
pub mod path;
pub mod reconcile;
pub mod sync;

pub use context::{Cancellation, Context};
pub use reconcile::{reconcile_domain, Item, ItemState, Reconciliation};
pub use sync::{Orchestrator, SyncOptions, SyncReport};
