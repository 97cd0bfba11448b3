// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::{
    env,
    path::{Component, Path, PathBuf},
};

/// Environment variable that overrides the default config directory.
pub const CONFIG_DIR_ENV: &str = "DRIFTWOOD_DIR";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the config directory.
///
/// The config directory doubles as the source tree of managed dotfiles, and
/// houses both the configuration file and the lock file at its top-level.
/// Uses `$DRIFTWOOD_DIR` if set, otherwise `$HOME/.config/driftwood`. Does not
/// check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    home_dir().map(|home| home.join(".config").join("driftwood"))
}

/// Normalize path without touching the file system.
///
/// Resolves "." and ".." components lexically. A ".." at the root stays at
/// the root, so `/../etc` becomes `/etc`. Symbolic links are not followed,
/// and the path does not need to exist.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::Prefix(prefix) => normal.push(prefix.as_os_str()),
            Component::RootDir => normal.push(component.as_os_str()),
            Component::CurDir => continue,
            Component::ParentDir => match normal.components().next_back() {
                Some(Component::Normal(_)) => {
                    normal.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => continue,
                _ => normal.push(".."),
            },
            Component::Normal(part) => normal.push(part),
        }
    }

    normal
}

/// Check that `path` lives strictly beneath `root`.
///
/// Both paths are normalized lexically first. A path equal to `root` is not
/// considered to be beneath it.
pub fn is_strictly_under(path: impl AsRef<Path>, root: impl AsRef<Path>) -> bool {
    let path = normalize(path);
    let root = normalize(root);
    path != root && path.starts_with(&root)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
