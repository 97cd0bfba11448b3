// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore rule matching for dotfiles.
//!
//! User ignore patterns follow gitignore syntax, and are always matched
//! against relative paths. A handful of version control and system entries are
//! never managed no matter what the user configures.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Entries that are never copied into or reported from the home directory.
pub const ALWAYS_IGNORED: &[&str] = &[
    ".git",
    ".gitignore",
    ".gitattributes",
    ".gitmodules",
    ".svn",
    ".hg",
    ".DS_Store",
    ".Trash",
    ".cache",
    ".localized",
];

/// Matcher for user ignore patterns.
#[derive(Clone, Debug)]
pub struct IgnoreFilter {
    matcher: Gitignore,
}

impl IgnoreFilter {
    /// Compile gitignore style `patterns`.
    ///
    /// # Errors
    ///
    /// - Return [`ignore::Error`] if any pattern does not compile.
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, ignore::Error> {
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            builder.add_line(None, pattern.as_ref())?;
        }

        Ok(Self {
            matcher: builder.build()?,
        })
    }

    /// Check if relative `path` or any of its parents match an ignore pattern.
    ///
    /// Absolute paths are never matched.
    pub fn is_ignored(&self, path: impl AsRef<Path>, is_dir: bool) -> bool {
        let path = path.as_ref();
        if path.has_root() || path.as_os_str().is_empty() {
            return false;
        }

        self.matcher
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}

/// Check if any component of relative `path` is in [`ALWAYS_IGNORED`].
pub fn is_always_ignored(path: impl AsRef<Path>) -> bool {
    path.as_ref().components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|part| ALWAYS_IGNORED.contains(&part))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("editor.swp", false, true; "file pattern")]
    #[test_case("config/nvim/init.lua.swp", false, true; "nested file pattern")]
    #[test_case("bash_history", false, true; "suffix pattern")]
    #[test_case("scratch", true, true; "directory pattern")]
    #[test_case("scratch/notes.txt", false, true; "inside ignored directory")]
    #[test_case("zshrc", false, false; "not ignored")]
    #[test]
    fn user_patterns_match(path: &str, is_dir: bool, expect: bool) -> anyhow::Result<()> {
        let filter = IgnoreFilter::new(["*.swp", "*_history", "scratch/"])?;
        pretty_assertions::assert_eq!(filter.is_ignored(path, is_dir), expect);

        Ok(())
    }

    #[test]
    fn absolute_paths_never_match() -> anyhow::Result<()> {
        let filter = IgnoreFilter::new(["*.swp"])?;
        assert!(!filter.is_ignored("/tmp/editor.swp", false));

        Ok(())
    }

    #[test_case(".git/config", true; "git directory")]
    #[test_case("nvim/.DS_Store", true; "nested system file")]
    #[test_case("nvim/init.lua", false; "regular file")]
    #[test_case("nvim/.gitkeep", false; "similar name")]
    #[test]
    fn fixed_entries_always_ignored(path: &str, expect: bool) {
        pretty_assertions::assert_eq!(is_always_ignored(path), expect);
    }
}
