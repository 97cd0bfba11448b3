// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! State reconciliation.
//!
//! Reconciliation compares the __declared__ state of a domain against its
//! __live__ state, and sorts every item into exactly one of three buckets:
//!
//! - __managed__: declared and live.
//! - __missing__: declared but not live.
//! - __untracked__: live but not declared.
//!
//! Items are identified by their manager and name. The same name under two
//! managers is two different items. Reconciliation is a pure function of its
//! inputs and is never persisted.

use crate::{dotfile::Dotfile, lock::Domain};

use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

/// Bucket an item was sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Managed,
    Missing,
    Untracked,
}

impl Display for ItemState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.pad(match self {
            Self::Managed => "managed",
            Self::Missing => "missing",
            Self::Untracked => "untracked",
        })
    }
}

/// Package or dotfile taking part in reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    /// Package name, or dotfile name.
    pub name: String,

    /// Package manager, empty for dotfiles.
    pub manager: String,

    /// Domain of item.
    pub domain: Domain,

    /// Reconciled state.
    pub state: ItemState,

    /// Target path of dotfiles.
    pub path: Option<PathBuf>,

    /// Display information.
    pub metadata: BTreeMap<String, String>,

    /// Deployed content of managed dotfile differs from its source.
    pub drifted: bool,
}

impl Item {
    /// Construct package item.
    pub fn package(manager: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manager: manager.into(),
            domain: Domain::Package,
            state: ItemState::Missing,
            path: None,
            metadata: BTreeMap::new(),
            drifted: false,
        }
    }

    /// Construct dotfile item targeting `dotfile`.
    pub fn dotfile(dotfile: &Dotfile) -> Self {
        Self {
            name: dotfile.name.clone(),
            manager: String::new(),
            domain: Domain::Dotfile,
            state: ItemState::Missing,
            path: Some(dotfile.target.clone()),
            metadata: BTreeMap::new(),
            drifted: false,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    fn key(&self) -> (String, String) {
        (self.manager.clone(), self.name.clone())
    }

    fn sort_key(&self) -> (&str, &str) {
        (self.name.as_str(), self.manager.as_str())
    }
}

impl Display for Item {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.manager.is_empty() {
            write!(fmt, "{}", self.name)
        } else {
            write!(fmt, "{}:{}", self.manager, self.name)
        }
    }
}

/// Items of one domain sorted into buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Domain that was reconciled.
    pub domain: Domain,

    /// Declared and live.
    pub managed: Vec<Item>,

    /// Declared, not live.
    pub missing: Vec<Item>,

    /// Live, not declared.
    pub untracked: Vec<Item>,
}

impl Reconciliation {
    /// Every item in bucket order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.managed
            .iter()
            .chain(self.missing.iter())
            .chain(self.untracked.iter())
    }

    /// Managed items whose deployed content drifted.
    pub fn drifted(&self) -> impl Iterator<Item = &Item> {
        self.managed.iter().filter(|item| item.drifted)
    }
}

/// Reconcile `declared` against `live` items of `domain`.
///
/// Managed items keep the declared item's metadata, with keys only known to
/// the live item filled in. Duplicate items within either input collapse into
/// the first one seen. Each bucket is sorted by name, then manager.
pub fn reconcile_domain(
    domain: Domain,
    declared: impl IntoIterator<Item = Item>,
    live: impl IntoIterator<Item = Item>,
) -> Reconciliation {
    let declared = keyed(domain, declared);
    let mut live = keyed(domain, live);

    let mut managed = Vec::new();
    let mut missing = Vec::new();
    for (key, mut item) in declared {
        match live.remove(&key) {
            Some(found) => {
                for (name, value) in found.metadata {
                    item.metadata.entry(name).or_insert(value);
                }
                item.path = item.path.or(found.path);
                item.state = ItemState::Managed;
                managed.push(item);
            }
            None => {
                item.state = ItemState::Missing;
                item.drifted = false;
                missing.push(item);
            }
        }
    }

    let mut untracked: Vec<Item> = live
        .into_values()
        .map(|mut item| {
            item.state = ItemState::Untracked;
            item.drifted = false;
            item
        })
        .collect();

    for bucket in [&mut managed, &mut missing, &mut untracked] {
        bucket.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    Reconciliation {
        domain,
        managed,
        missing,
        untracked,
    }
}

fn keyed(domain: Domain, items: impl IntoIterator<Item = Item>) -> BTreeMap<(String, String), Item> {
    let mut keyed = BTreeMap::new();
    for mut item in items {
        item.domain = domain;
        keyed.entry(item.key()).or_insert(item);
    }

    keyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;
    use std::collections::BTreeSet;

    fn names(items: &[Item]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn brew(names: &[&str]) -> Vec<Item> {
        names.iter().map(|name| Item::package("brew", *name)).collect()
    }

    #[test]
    fn declared_and_live_packages_partition() {
        let result = reconcile_domain(Domain::Package, brew(&["git", "vim"]), brew(&["git", "htop"]));

        pretty_assertions::assert_eq!(names(&result.managed), vec!["brew:git"]);
        pretty_assertions::assert_eq!(names(&result.missing), vec!["brew:vim"]);
        pretty_assertions::assert_eq!(names(&result.untracked), vec!["brew:htop"]);
        pretty_assertions::assert_eq!(result.managed[0].state, ItemState::Managed);
        pretty_assertions::assert_eq!(result.missing[0].state, ItemState::Missing);
        pretty_assertions::assert_eq!(result.untracked[0].state, ItemState::Untracked);
    }

    #[test_case(&[], &[]; "both empty")]
    #[test_case(&["a", "b", "c"], &[]; "nothing live")]
    #[test_case(&[], &["a", "b"]; "nothing declared")]
    #[test_case(&["a", "b", "c"], &["a", "b", "c"]; "identical")]
    #[test_case(&["d", "a", "c", "a"], &["c", "e", "b", "e"]; "overlap with duplicates")]
    #[test]
    fn buckets_partition_union(declared: &[&str], live: &[&str]) {
        let result = reconcile_domain(Domain::Package, brew(declared), brew(live));
        let declared: BTreeSet<&str> = declared.iter().copied().collect();
        let live: BTreeSet<&str> = live.iter().copied().collect();

        let managed: BTreeSet<&str> = result.managed.iter().map(|item| item.name.as_str()).collect();
        let missing: BTreeSet<&str> = result.missing.iter().map(|item| item.name.as_str()).collect();
        let untracked: BTreeSet<&str> =
            result.untracked.iter().map(|item| item.name.as_str()).collect();

        pretty_assertions::assert_eq!(managed, declared.intersection(&live).copied().collect::<BTreeSet<_>>());
        pretty_assertions::assert_eq!(missing, declared.difference(&live).copied().collect::<BTreeSet<_>>());
        pretty_assertions::assert_eq!(untracked, live.difference(&declared).copied().collect::<BTreeSet<_>>());
        pretty_assertions::assert_eq!(
            result.items().count(),
            declared.union(&live).count(),
            "no item lands in two buckets"
        );
    }

    #[test]
    fn same_name_under_two_managers_is_two_items() {
        let declared = vec![Item::package("brew", "jq"), Item::package("cargo", "jq")];
        let live = vec![Item::package("brew", "jq")];
        let result = reconcile_domain(Domain::Package, declared, live);

        pretty_assertions::assert_eq!(names(&result.managed), vec!["brew:jq"]);
        pretty_assertions::assert_eq!(names(&result.missing), vec!["cargo:jq"]);
        assert!(result.untracked.is_empty());
    }

    #[test]
    fn buckets_sort_by_name_then_manager() {
        let live = vec![
            Item::package("npm", "zx"),
            Item::package("cargo", "bat"),
            Item::package("brew", "bat"),
        ];
        let result = reconcile_domain(Domain::Package, Vec::new(), live);

        pretty_assertions::assert_eq!(names(&result.untracked), vec!["brew:bat", "cargo:bat", "npm:zx"]);
    }

    #[test]
    fn managed_items_fill_metadata_gaps_from_live() {
        let declared = vec![Item::package("brew", "git").with_metadata(BTreeMap::from([(
            "version".to_string(),
            "2.44.0".to_string(),
        )]))];
        let live = vec![Item::package("brew", "git").with_metadata(BTreeMap::from([
            ("version".to_string(), "2.45.0".to_string()),
            ("source".to_string(), "core".to_string()),
        ]))];
        let result = reconcile_domain(Domain::Package, declared, live);

        pretty_assertions::assert_eq!(
            result.managed[0].metadata,
            BTreeMap::from([
                ("source".to_string(), "core".to_string()),
                ("version".to_string(), "2.44.0".to_string()),
            ])
        );
    }

    #[test]
    fn dotfile_items_keep_target_path() {
        let dotfile = Dotfile {
            name: "zshrc".into(),
            source: PathBuf::from("/home/user/.config/driftwood/zshrc"),
            target: PathBuf::from("/home/user/.zshrc"),
        };
        let result = reconcile_domain(
            Domain::Dotfile,
            vec![Item::dotfile(&dotfile)],
            vec![Item::dotfile(&dotfile)],
        );

        pretty_assertions::assert_eq!(result.managed.len(), 1);
        pretty_assertions::assert_eq!(result.managed[0].path, Some(PathBuf::from("/home/user/.zshrc")));
        pretty_assertions::assert_eq!(result.managed[0].domain, Domain::Dotfile);
    }
}
