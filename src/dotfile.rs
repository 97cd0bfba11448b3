// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile deployment.
//!
//! The config directory doubles as the __source tree__ of every managed
//! dotfile. Each file in the source tree maps to exactly one __target__ in the
//! user's home directory by prefixing its relative path with a dot, e.g.
//! "config/nvim/init.lua" deploys to "~/.config/nvim/init.lua". Templates lose
//! their ".tmpl" suffix on the way, see [`template`].
//!
//! # Source Tree Layout
//!
//! Entries of the source tree whose relative path begins with a dot are never
//! treated as dotfiles, so version control data can live alongside them. The
//! configuration file and the lock file are reserved top-level names. User
//! ignore patterns exclude anything else.
//!
//! # Deployment
//!
//! Targets are replaced atomically. Rendered content goes into a temporary
//! sibling of the target which is then renamed over it, so a target is
//! either fully old or fully new.

pub mod filter;
pub mod template;

use crate::{
    config::CONFIG_FILE_NAME,
    lock::LOCK_FILE_NAME,
    path::{is_strictly_under, normalize},
};
use filter::{is_always_ignored, IgnoreFilter, ALWAYS_IGNORED};
use template::{is_template, process_env, EnvLookup, TEMPLATE_SUFFIX};

use similar::TextDiff;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Names at the top-level of the source tree that are never dotfiles.
pub const RESERVED_NAMES: &[&str] = &[CONFIG_FILE_NAME, LOCK_FILE_NAME];

/// Dotfile in the source tree paired with its target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dotfile {
    /// Slash separated path relative to source tree, no leading dot.
    pub name: String,

    /// Absolute path in source tree.
    pub source: PathBuf,

    /// Absolute path in home directory.
    pub target: PathBuf,
}

impl Dotfile {
    /// Check if dotfile is rendered as a template.
    pub fn is_template(&self) -> bool {
        is_template(&self.source)
    }
}

/// Manage dotfiles between source tree and home directory.
pub struct DotfileManager {
    home: PathBuf,
    source_dir: PathBuf,
    filter: IgnoreFilter,
    env: EnvLookup,
}

impl std::fmt::Debug for DotfileManager {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("DotfileManager")
            .field("home", &self.home)
            .field("source_dir", &self.source_dir)
            .finish_non_exhaustive()
    }
}

impl DotfileManager {
    /// Construct new dotfile manager.
    ///
    /// Templates resolve variables through the process environment.
    ///
    /// # Errors
    ///
    /// - Return [`DotfileError::Ignore`] if an ignore pattern does not
    ///   compile.
    pub fn new(
        home: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
        ignore_patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        Ok(Self {
            home: normalize(home.into()),
            source_dir: normalize(source_dir.into()),
            filter: IgnoreFilter::new(ignore_patterns)?,
            env: process_env(),
        })
    }

    /// Replace variable lookup used by templates.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env = Box::new(lookup);
        self
    }

    /// Path to home directory.
    pub fn home(&self) -> &Path {
        self.home.as_path()
    }

    /// Path to source tree.
    pub fn source_dir(&self) -> &Path {
        self.source_dir.as_path()
    }

    /// List every dotfile in source tree, sorted by name.
    ///
    /// A missing source tree holds no dotfiles.
    ///
    /// # Errors
    ///
    /// - Return [`DotfileError::Walk`] if source tree cannot be traversed.
    /// - Return [`DotfileError::TargetConflict`] if two entries deploy to the
    ///   same target.
    #[instrument(skip(self), level = "debug")]
    pub fn list(&self) -> Result<Vec<Dotfile>> {
        if !self.source_dir.is_dir() {
            debug!("no source tree at {}", self.source_dir.display());
            return Ok(Vec::new());
        }

        let mut dotfiles = Vec::new();
        let mut targets: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut walker = WalkDir::new(&self.source_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(&self.source_dir) else {
                continue;
            };

            let is_dir = entry.file_type().is_dir();
            if self.is_skipped(relative, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let dotfile = self.dotfile(slash_name(relative));
            if let Some(first) = targets.insert(dotfile.target.clone(), dotfile.name.clone()) {
                return Err(DotfileError::TargetConflict {
                    first,
                    second: dotfile.name,
                    target: dotfile.target,
                });
            }
            dotfiles.push(dotfile);
        }

        dotfiles.sort();
        Ok(dotfiles)
    }

    /// Find dotfile by `name`.
    ///
    /// # Errors
    ///
    /// - Return any name validation error.
    /// - Return [`DotfileError::NotFound`] if no such file in source tree.
    pub fn find(&self, name: &str) -> Result<Dotfile> {
        let (name, source) = self.validate_name(name)?;
        if !source.is_file() {
            return Err(DotfileError::NotFound { name });
        }

        Ok(self.dotfile(name))
    }

    /// Copy file or directory at `path` from home into source tree.
    ///
    /// Relative paths resolve against the home directory. Directories are
    /// copied recursively, skipping [`ALWAYS_IGNORED`] entries and anything
    /// matching user ignore patterns. Returns names of every dotfile added.
    ///
    /// # Errors
    ///
    /// - Return [`DotfileError::OutsideHome`] if path does not lie strictly
    ///   under home directory.
    /// - Return [`DotfileError::NotDotfile`] if first segment of path relative
    ///   to home does not begin with a dot.
    /// - Return [`DotfileError::InsideSource`] if path lies in source tree.
    /// - Return [`DotfileError::Reserved`] if path would land on the
    ///   configuration file or the lock file.
    /// - Return [`DotfileError::NothingToAdd`] if every entry of a directory
    ///   is ignored.
    /// - Return [`DotfileError::Io`] if path cannot be copied.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), level = "debug")]
    pub fn add(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let absolute = normalize(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        });

        // INVARIANT: Validate everything before touching the file system.
        if !is_strictly_under(&absolute, &self.home) {
            return Err(DotfileError::OutsideHome { path: absolute });
        }

        let Ok(relative) = absolute.strip_prefix(&self.home) else {
            return Err(DotfileError::OutsideHome { path: absolute });
        };

        let is_hidden = relative
            .components()
            .next()
            .and_then(|first| first.as_os_str().to_str())
            .is_some_and(|first| first.starts_with('.') && first.len() > 1);
        if !is_hidden {
            return Err(DotfileError::NotDotfile { path: absolute });
        }

        if absolute == self.source_dir || is_strictly_under(&absolute, &self.source_dir) {
            return Err(DotfileError::InsideSource { path: absolute });
        }

        self.source_name(&absolute)?;

        let metadata = fs::metadata(&absolute).map_err(|err| DotfileError::Io {
            source: err,
            path: absolute.clone(),
        })?;

        if !metadata.is_dir() {
            let name = self.copy_into_source(&absolute)?;
            info!("add {name}");
            return Ok(vec![name]);
        }

        let mut added = Vec::new();
        let mut walker = WalkDir::new(&absolute)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let is_dir = entry.file_type().is_dir();
            let inner = entry.path().strip_prefix(&absolute).unwrap_or(entry.path());

            // INVARIANT: Patterns match relative to the directory being added.
            if is_always_ignored(inner)
                || self.filter.is_ignored(inner, is_dir)
                || entry.path() == self.source_dir
            {
                debug!("skip {}", entry.path().display());
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_file() {
                let name = self.copy_into_source(entry.path())?;
                info!("add {name}");
                added.push(name);
            }
        }

        if added.is_empty() {
            return Err(DotfileError::NothingToAdd { path: absolute });
        }

        Ok(added)
    }

    /// Delete dotfile `name` from source tree only.
    ///
    /// Its deployed target is left alone.
    ///
    /// # Errors
    ///
    /// - Return any name validation error.
    /// - Return [`DotfileError::NotFound`] if no such entry in source tree.
    /// - Return [`DotfileError::Io`] if entry cannot be deleted.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&self, name: &str) -> Result<()> {
        let (name, source) = self.validate_name(name)?;
        let metadata = match fs::symlink_metadata(&source) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DotfileError::NotFound { name })
            }
            Err(err) => return Err(DotfileError::Io { source: err, path: source }),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&source)
        } else {
            fs::remove_file(&source)
        };
        result.map_err(|err| DotfileError::Io {
            source: err,
            path: source.clone(),
        })?;
        info!("remove {name}");

        Ok(())
    }

    /// Render content of dotfile as it should appear at its target.
    ///
    /// Templates have their placeholders resolved, everything else is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// - Return [`DotfileError::Io`] if source cannot be read.
    /// - Return [`DotfileError::UnresolvedVariables`] if a template references
    ///   undefined variables.
    pub fn render(&self, dotfile: &Dotfile) -> Result<Vec<u8>> {
        let content = fs::read(&dotfile.source).map_err(|err| DotfileError::Io {
            source: err,
            path: dotfile.source.clone(),
        })?;

        if !dotfile.is_template() {
            return Ok(content);
        }

        let content = String::from_utf8(content).map_err(|err| DotfileError::Io {
            source: std::io::Error::new(ErrorKind::InvalidData, err),
            path: dotfile.source.clone(),
        })?;

        template::render(&content, &*self.env)
            .map(String::into_bytes)
            .map_err(|vars| DotfileError::UnresolvedVariables {
                name: dotfile.name.clone(),
                vars,
            })
    }

    /// Deploy dotfile `name` to its target.
    ///
    /// Nothing is written if rendering fails. The target receives the
    /// permission bits of its source.
    ///
    /// # Errors
    ///
    /// - Return any error from [`DotfileManager::find`] or
    ///   [`DotfileManager::render`].
    /// - Return [`DotfileError::Io`] if target cannot be replaced.
    #[instrument(skip(self), level = "debug")]
    pub fn deploy(&self, name: &str) -> Result<Dotfile> {
        let dotfile = self.find(name)?;
        let content = self.render(&dotfile)?;
        let io_err = |err| DotfileError::Io {
            source: err,
            path: dotfile.target.clone(),
        };

        let parent = dotfile.target.parent().unwrap_or(self.home.as_path());
        fs::create_dir_all(parent).map_err(io_err)?;

        // INVARIANT: Temporary file is removed on drop if it never persists.
        let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
        temp.write_all(&content).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&dotfile.target)
            .map_err(|err| io_err(err.error))?;

        let permissions = fs::metadata(&dotfile.source)
            .map_err(|err| DotfileError::Io {
                source: err,
                path: dotfile.source.clone(),
            })?
            .permissions();
        fs::set_permissions(&dotfile.target, permissions).map_err(io_err)?;
        info!("deploy {} to {}", dotfile.name, dotfile.target.display());

        Ok(dotfile)
    }

    /// Check if deployed target differs from rendered source.
    ///
    /// A missing target is not drifted, it is simply not deployed.
    ///
    /// # Errors
    ///
    /// - Return any error from [`DotfileManager::render`].
    /// - Return [`DotfileError::Io`] if target exists but cannot be read.
    pub fn is_drifted(&self, dotfile: &Dotfile) -> Result<bool> {
        match fs::read(&dotfile.target) {
            Ok(deployed) => Ok(deployed != self.render(dotfile)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DotfileError::Io {
                source: err,
                path: dotfile.target.clone(),
            }),
        }
    }

    /// Unified line diff from deployed target to rendered source.
    ///
    /// Empty if both are identical.
    ///
    /// # Errors
    ///
    /// - Return any error from [`DotfileManager::render`].
    /// - Return [`DotfileError::Io`] if target exists but cannot be read.
    pub fn diff(&self, dotfile: &Dotfile) -> Result<String> {
        let rendered = self.render(dotfile)?;
        let deployed = match fs::read(&dotfile.target) {
            Ok(deployed) => deployed,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(format!(
                    "(target {} missing, source has {} bytes)\n",
                    dotfile.target.display(),
                    rendered.len()
                ))
            }
            Err(err) => {
                return Err(DotfileError::Io {
                    source: err,
                    path: dotfile.target.clone(),
                })
            }
        };

        if deployed == rendered {
            return Ok(String::new());
        }

        let old = String::from_utf8_lossy(&deployed);
        let new = String::from_utf8_lossy(&rendered);
        Ok(TextDiff::from_lines(old.as_ref(), new.as_ref())
            .unified_diff()
            .header(
                &dotfile.target.display().to_string(),
                &dotfile.source.display().to_string(),
            )
            .to_string())
    }

    /// List top-level dot entries of home directory that nothing deploys to.
    ///
    /// Skips [`ALWAYS_IGNORED`] entries, anything matching user ignore
    /// patterns, and the entry holding the source tree itself. Each result
    /// names the source path the entry would be added as.
    ///
    /// # Errors
    ///
    /// - Return any error from [`DotfileManager::list`].
    /// - Return [`DotfileError::Io`] if home directory cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn untracked(&self) -> Result<Vec<Dotfile>> {
        let covered: BTreeSet<PathBuf> = self
            .list()?
            .into_iter()
            .filter_map(|dotfile| self.top_level_entry(&dotfile.target))
            .chain(self.top_level_entry(&self.source_dir))
            .collect();

        let entries = match fs::read_dir(&self.home) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(DotfileError::Io {
                    source: err,
                    path: self.home.clone(),
                })
            }
        };

        let mut untracked = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| DotfileError::Io {
                source: err,
                path: self.home.clone(),
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            let Some(name) = file_name.strip_prefix('.').filter(|name| !name.is_empty()) else {
                continue;
            };

            let is_dir = entry.file_type().is_ok_and(|kind| kind.is_dir());
            if ALWAYS_IGNORED.contains(&file_name)
                || self.filter.is_ignored(file_name, is_dir)
                || covered.contains(&entry.path())
            {
                continue;
            }

            untracked.push(Dotfile {
                name: name.to_string(),
                source: self.source_dir.join(name),
                target: entry.path(),
            });
        }

        untracked.sort();
        Ok(untracked)
    }

    fn dotfile(&self, name: impl Into<String>) -> Dotfile {
        let name = name.into();
        let deployed = name.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(name.as_str());
        Dotfile {
            source: self.source_dir.join(&name),
            target: self.home.join(format!(".{deployed}")),
            name,
        }
    }

    /// Name that home path `from` is stored under in the source tree.
    fn source_name(&self, from: &Path) -> Result<String> {
        let relative = from.strip_prefix(&self.home).unwrap_or(from);
        let slashed = slash_name(relative);
        let name = slashed.strip_prefix('.').unwrap_or(slashed.as_str()).to_string();

        let top = name.split('/').next().unwrap_or_default();
        if RESERVED_NAMES.contains(&top) {
            return Err(DotfileError::Reserved { name });
        }

        Ok(name)
    }

    fn copy_into_source(&self, from: &Path) -> Result<String> {
        let name = self.source_name(from)?;
        let to = self.source_dir.join(&name);

        let copy = || -> std::io::Result<()> {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(from, &to)?;
            Ok(())
        };

        copy().map_err(|err| DotfileError::Io {
            source: err,
            path: to.clone(),
        })?;

        Ok(name)
    }

    fn is_skipped(&self, relative: &Path, is_dir: bool) -> bool {
        let name = slash_name(relative);
        name.starts_with('.')
            || RESERVED_NAMES.contains(&name.as_str())
            || self.filter.is_ignored(relative, is_dir)
    }

    fn validate_name(&self, name: &str) -> Result<(String, PathBuf)> {
        let trimmed = name.trim().trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return Err(DotfileError::InvalidName { name: name.into() });
        }

        let source = normalize(self.source_dir.join(trimmed));
        if !is_strictly_under(&source, &self.source_dir) {
            return Err(DotfileError::OutsideSource { name: name.into() });
        }

        let relative = source.strip_prefix(&self.source_dir).unwrap_or(&source);
        let normal = slash_name(relative);
        if RESERVED_NAMES.contains(&normal.as_str()) {
            return Err(DotfileError::Reserved { name: normal });
        }

        Ok((normal, source))
    }

    fn top_level_entry(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.home).ok()?;
        match relative.components().next()? {
            Component::Normal(first) => Some(self.home.join(first)),
            _ => None,
        }
    }
}

fn slash_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Dotfile error types.
#[derive(Debug, thiserror::Error)]
pub enum DotfileError {
    /// Path to add is not strictly under home directory.
    #[error("{:?} is not inside the home directory", path.display())]
    OutsideHome { path: PathBuf },

    /// Path to add does not start with a dot relative to home.
    #[error("{:?} is not a dotfile", path.display())]
    NotDotfile { path: PathBuf },

    /// Path to add already lives in source tree.
    #[error("{:?} is inside the dotfile source tree", path.display())]
    InsideSource { path: PathBuf },

    /// Dotfile name is empty or refers to the source tree itself.
    #[error("invalid dotfile name {name:?}")]
    InvalidName { name: String },

    /// Dotfile name escapes source tree.
    #[error("dotfile name {name:?} escapes the source tree")]
    OutsideSource { name: String },

    /// Dotfile name is reserved for driftwood itself.
    #[error("{name:?} is reserved and cannot be managed as a dotfile")]
    Reserved { name: String },

    /// Directory to add holds nothing that is not ignored.
    #[error("nothing to add under {:?}, every entry is ignored", path.display())]
    NothingToAdd { path: PathBuf },

    /// No dotfile with name in source tree.
    #[error("dotfile {name:?} not found")]
    NotFound { name: String },

    /// Two source entries deploy to same target.
    #[error("dotfiles {first:?} and {second:?} both deploy to {:?}", target.display())]
    TargetConflict {
        first: String,
        second: String,
        target: PathBuf,
    },

    /// Template references variables that are not defined.
    #[error("template {name:?} references undefined variables: {}", vars.join(", "))]
    UnresolvedVariables { name: String, vars: Vec<String> },

    /// File system operation failed.
    #[error("file operation failed on {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory traversal failed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// Ignore pattern failed to compile.
    #[error(transparent)]
    Ignore(#[from] ignore::Error),
}

/// Friendly result alias :3
type Result<T, E = DotfileError> = std::result::Result<T, E>;
