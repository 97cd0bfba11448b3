// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that driftwood uses to
//! declare packages, dotfile selection, and general settings. The file lives
//! at the top-level of the config directory as "driftwood.toml". A missing
//! file is not an error, the defaults simply apply.
//!
//! # General Layout
//!
//! ```toml
//! [settings]
//! default_manager = "brew"
//! package_timeout = 180
//! ignore_patterns = ["*.swp"]
//!
//! [dotfiles]
//! include = ["zshrc", "config/nvim"]
//!
//! [[package]]
//! name = "ripgrep"
//! manager = "brew"
//!
//! [manager.mise]
//! binary = "mise"
//! list = ["mise", "ls", "--installed", "--no-header"]
//! install = ["mise", "use", "-g", "{package}"]
//! uninstall = ["mise", "uninstall", "{package}"]
//! ```

use ignore::gitignore::GitignoreBuilder;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::debug;

/// Name of configuration file at the top-level of the config directory.
pub const CONFIG_FILE_NAME: &str = "driftwood.toml";

/// Top-level configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub settings: Settings,

    /// Dotfile selection.
    #[serde(default)]
    pub dotfiles: DotfileSettings,

    /// Packages declared directly in configuration.
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageDeclaration>,

    /// Custom package manager command tables keyed by manager name.
    #[serde(rename = "manager", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub managers: BTreeMap<String, ManagerDefinition>,
}

impl Config {
    /// Load configuration from file at `path`.
    ///
    /// Missing configuration file yields the default configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is malformed.
    /// - Return any validation error from [`Config::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Config = match read_to_string(path) {
            Ok(data) => data.parse()?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {}, using defaults", path.display());
                Config::default()
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants of configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::EmptyDefaultManager`] if no default manager.
    /// - Return [`ConfigError::EmptyPackageName`] if a declared package has no
    ///   name.
    /// - Return [`ConfigError::EmptyCommand`] if a manager definition lacks a
    ///   required command.
    /// - Return [`ConfigError::InvalidListPattern`] if a manager list pattern
    ///   does not compile.
    /// - Return [`ConfigError::InvalidIgnorePattern`] if an ignore pattern does
    ///   not compile.
    pub fn validate(&self) -> Result<()> {
        if self.settings.default_manager.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultManager);
        }

        if let Some(index) = self
            .packages
            .iter()
            .position(|package| package.name.trim().is_empty())
        {
            return Err(ConfigError::EmptyPackageName { index });
        }

        for (name, definition) in &self.managers {
            for (command, args) in [
                ("list", &definition.list),
                ("install", &definition.install),
                ("uninstall", &definition.uninstall),
            ] {
                if args.is_empty() {
                    return Err(ConfigError::EmptyCommand {
                        manager: name.clone(),
                        command,
                    });
                }
            }

            if let Some(pattern) = &definition.list_pattern {
                regex::Regex::new(pattern).map_err(|err| ConfigError::InvalidListPattern {
                    manager: name.clone(),
                    source: err,
                })?;
            }
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in &self.settings.ignore_patterns {
            builder
                .add_line(None, pattern)
                .map_err(|err| ConfigError::InvalidIgnorePattern {
                    pattern: pattern.clone(),
                    source: err,
                })?;
        }

        Ok(())
    }

    /// Determine manager for a declared package.
    pub fn manager_of<'a>(&'a self, package: &'a PackageDeclaration) -> &'a str {
        package
            .manager
            .as_deref()
            .unwrap_or(self.settings.default_manager.as_str())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on manager binary paths.
        for definition in config.managers.values_mut() {
            definition.binary = shellexpand::full(definition.binary.as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// General settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Manager used for packages that do not name one.
    #[serde(default = "default_manager")]
    pub default_manager: String,

    /// Upper bound in seconds for a single package manager operation.
    #[serde(default = "default_package_timeout")]
    pub package_timeout: u64,

    /// Gitignore style patterns excluded from dotfile management.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

impl Settings {
    /// Package timeout as [`Duration`].
    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_manager: default_manager(),
            package_timeout: default_package_timeout(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

fn default_manager() -> String {
    "brew".into()
}

fn default_package_timeout() -> u64 {
    180
}

fn default_ignore_patterns() -> Vec<String> {
    [
        ".DS_Store",
        ".Trash",
        ".cache",
        ".npm",
        ".cargo",
        ".rustup",
        ".local",
        "*.swp",
        "*.tmp",
        "*.backup",
        "*_history",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Dotfile selection settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DotfileSettings {
    /// Restrict management to these dotfile names, or directories of names.
    ///
    /// Every dotfile in the source tree is managed when unset.
    pub include: Option<Vec<String>>,
}

impl DotfileSettings {
    /// Check if dotfile name is selected for management.
    pub fn includes(&self, name: &str) -> bool {
        match &self.include {
            None => true,
            Some(include) => include.iter().any(|entry| {
                let entry = entry.trim_end_matches('/');
                name == entry
                    || name
                        .strip_prefix(entry)
                        .is_some_and(|rest| rest.starts_with('/'))
            }),
        }
    }
}

/// Package declared in configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageDeclaration {
    /// Name of the package as its manager knows it.
    pub name: String,

    /// Manager to install package through, default manager if unset.
    pub manager: Option<String>,
}

/// Command table for a package manager.
///
/// Any argument equal to or containing "{package}" has it replaced by the
/// package name.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ManagerDefinition {
    /// Binary that must be reachable for the manager to count as available.
    pub binary: String,

    /// Command listing installed packages, one per line.
    pub list: Vec<String>,

    /// Command installing a package.
    pub install: Vec<String>,

    /// Command uninstalling a package.
    pub uninstall: Vec<String>,

    /// Command printing the installed version of a package.
    pub version: Option<Vec<String>>,

    /// Regex picking the package name out of each listed line through its
    /// first capture group. Lines that do not match are skipped. Without a
    /// pattern the first word of every unindented line is taken.
    pub list_pattern: Option<String>,

    /// Output phrases that mean the operation was already satisfied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idempotent_errors: Vec<String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default manager is blank.
    #[error("default manager cannot be empty")]
    EmptyDefaultManager,

    /// Declared package has a blank name.
    #[error("package entry {index} has an empty name")]
    EmptyPackageName { index: usize },

    /// Manager definition is missing a command.
    #[error("manager {manager:?} has an empty {command} command")]
    EmptyCommand {
        manager: String,
        command: &'static str,
    },

    /// List pattern of manager does not compile.
    #[error("manager {manager:?} has an invalid list pattern")]
    InvalidListPattern {
        manager: String,
        #[source]
        source: regex::Error,
    },

    /// Ignore pattern does not compile.
    #[error("invalid ignore pattern {pattern:?}")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: ignore::Error,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("MISE_ROOT", "/opt/mise")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            [settings]
            default_manager = "cargo"
            package_timeout = 60
            ignore_patterns = ["*.swp"]

            [dotfiles]
            include = ["zshrc", "config/nvim"]

            [[package]]
            name = "ripgrep"

            [[package]]
            name = "prettier"
            manager = "npm"

            [manager.mise]
            binary = "$MISE_ROOT/bin/mise"
            list = ["mise", "ls", "--installed"]
            install = ["mise", "use", "-g", "{package}"]
            uninstall = ["mise", "uninstall", "{package}"]
        "#
        .parse()?;

        let expect = Config {
            settings: Settings {
                default_manager: "cargo".into(),
                package_timeout: 60,
                ignore_patterns: vec!["*.swp".into()],
            },
            dotfiles: DotfileSettings {
                include: Some(vec!["zshrc".into(), "config/nvim".into()]),
            },
            packages: vec![
                PackageDeclaration {
                    name: "ripgrep".into(),
                    manager: None,
                },
                PackageDeclaration {
                    name: "prettier".into(),
                    manager: Some("npm".into()),
                },
            ],
            managers: BTreeMap::from([(
                "mise".into(),
                ManagerDefinition {
                    binary: "/opt/mise/bin/mise".into(),
                    list: vec!["mise".into(), "ls".into(), "--installed".into()],
                    install: vec!["mise".into(), "use".into(), "-g".into(), "{package}".into()],
                    uninstall: vec!["mise".into(), "uninstall".into(), "{package}".into()],
                    version: None,
                    list_pattern: None,
                    idempotent_errors: vec![],
                },
            )]),
        };

        pretty_assertions::assert_eq!(result, expect);
        pretty_assertions::assert_eq!(result.manager_of(&result.packages[0]), "cargo");
        pretty_assertions::assert_eq!(result.manager_of(&result.packages[1]), "npm");

        Ok(())
    }

    #[test]
    fn empty_config_uses_defaults() -> anyhow::Result<()> {
        let result: Config = "".parse()?;
        pretty_assertions::assert_eq!(result, Config::default());
        pretty_assertions::assert_eq!(result.settings.default_manager, "brew");
        pretty_assertions::assert_eq!(result.settings.package_timeout(), Duration::from_secs(180));
        assert!(result.settings.ignore_patterns.contains(&"*.swp".to_string()));

        Ok(())
    }

    #[test]
    fn serialized_config_parses_back() -> anyhow::Result<()> {
        let config = Config {
            packages: vec![PackageDeclaration {
                name: "htop".into(),
                manager: Some("brew".into()),
            }],
            ..Default::default()
        };

        let result = config.to_string();
        assert!(result.contains("[settings]"));
        assert!(result.contains("[[package]]"));
        pretty_assertions::assert_eq!(result.parse::<Config>()?, config);

        Ok(())
    }

    #[test]
    fn validate_rejects_blank_package() {
        let config = Config {
            packages: vec![PackageDeclaration::default()],
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyPackageName { index: 0 })
        ));
    }

    #[test]
    fn validate_rejects_incomplete_manager() {
        let mut config = Config::default();
        config.managers.insert(
            "half".into(),
            ManagerDefinition {
                binary: "half".into(),
                list: vec!["half".into(), "list".into()],
                ..Default::default()
            },
        );

        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyCommand { command: "install", .. })
        ));
    }

    #[test]
    fn load_missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load(dir.path().join(CONFIG_FILE_NAME))?;
        pretty_assertions::assert_eq!(config, Config::default());

        Ok(())
    }

    #[test_case(None, "zshrc", true; "no include list")]
    #[test_case(Some(vec!["zshrc"]), "zshrc", true; "exact name")]
    #[test_case(Some(vec!["config/nvim"]), "config/nvim/init.lua", true; "nested name")]
    #[test_case(Some(vec!["config/nvim/"]), "config/nvim/init.lua", true; "trailing slash")]
    #[test_case(Some(vec!["config/nvim"]), "config/nvimrc", false; "prefix is not a directory")]
    #[test_case(Some(vec!["vimrc"]), "zshrc", false; "not listed")]
    #[test]
    fn dotfile_include_selection(include: Option<Vec<&str>>, name: &str, expect: bool) {
        let settings = DotfileSettings {
            include: include.map(|names| names.into_iter().map(String::from).collect()),
        };
        pretty_assertions::assert_eq!(settings.includes(name), expect);
    }
}
