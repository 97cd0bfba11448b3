// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command table driven package manager.
//!
//! A [`CommandManager`] knows nothing about any particular package manager.
//! It runs whatever commands its [`ManagerDefinition`] lists, replacing
//! "{package}" in each argument with the package name, and reads installed
//! packages off the listing command line by line.

use super::{ManagerError, PackageManager, Result};
use crate::config::ManagerDefinition;

use async_trait::async_trait;
use regex::Regex;
use std::{collections::BTreeMap, process::Stdio};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Placeholder replaced by the package name in command arguments.
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Package manager run through external commands.
#[derive(Debug, Clone)]
pub struct CommandManager {
    name: String,
    definition: ManagerDefinition,
    list_pattern: Option<Regex>,
}

impl CommandManager {
    /// Construct new command manager called `name`.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::Pattern`] if list pattern does not compile.
    pub fn new(name: impl Into<String>, definition: ManagerDefinition) -> Result<Self> {
        let list_pattern = definition
            .list_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        Ok(Self {
            name: name.into(),
            definition,
            list_pattern,
        })
    }

    /// Pick package names out of listing command output.
    pub fn parse_list(&self, output: &str) -> Vec<String> {
        let mut packages: Vec<String> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match &self.list_pattern {
                Some(pattern) => pattern
                    .captures(line)
                    .and_then(|captures| captures.get(1))
                    .map(|name| name.as_str().trim().to_string()),
                // INVARIANT: Indented lines continue the previous entry.
                None if line.starts_with(char::is_whitespace) => None,
                None => line.split_whitespace().next().map(ToString::to_string),
            })
            .filter(|name| !name.is_empty())
            .collect();

        packages.sort();
        packages.dedup();
        packages
    }

    async fn run(&self, command: &[String], package: Option<&str>) -> Result<CommandOutput> {
        let args: Vec<String> = command
            .iter()
            .skip(1)
            .map(|arg| match package {
                Some(package) => arg.replace(PACKAGE_PLACEHOLDER, package),
                None => arg.clone(),
            })
            .collect();
        let command_line = std::iter::once(self.program(command))
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        debug!("run {command_line}");
        let output = Command::new(self.program(command))
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ManagerError::Spawn {
                source: err,
                command: command_line.clone(),
            })?;

        Ok(CommandOutput {
            command_line,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// The configured binary stands in for the first word of every command.
    fn program<'a>(&'a self, command: &'a [String]) -> &'a str {
        if self.definition.binary.is_empty() {
            command.first().map(String::as_str).unwrap_or_default()
        } else {
            self.definition.binary.as_str()
        }
    }

    async fn run_idempotent(&self, command: &[String], package: &str) -> Result<()> {
        let output = self.run(command, Some(package)).await?;
        let message = output.message();
        if output.success {
            return Ok(());
        }

        if self
            .definition
            .idempotent_errors
            .iter()
            .any(|phrase| message.to_lowercase().contains(&phrase.to_lowercase()))
        {
            debug!("{} reports nothing to do for {package}", self.name);
            return Ok(());
        }

        Err(ManagerError::CommandFailed {
            command: output.command_line,
            message,
        })
    }
}

#[async_trait]
impl PackageManager for CommandManager {
    async fn is_available(&self) -> bool {
        let program = self.program(&self.definition.list);
        !program.is_empty() && which::which(program).is_ok()
    }

    #[instrument(skip(self), fields(manager = %self.name), level = "debug")]
    async fn list_installed(&self) -> Result<Vec<String>> {
        let output = self.run(&self.definition.list, None).await?;
        if !output.success {
            return Err(ManagerError::CommandFailed {
                message: output.message(),
                command: output.command_line,
            });
        }

        Ok(self.parse_list(&output.stdout))
    }

    #[instrument(skip(self), fields(manager = %self.name), level = "debug")]
    async fn install(&self, name: &str) -> Result<()> {
        self.run_idempotent(&self.definition.install, name).await
    }

    #[instrument(skip(self), fields(manager = %self.name), level = "debug")]
    async fn uninstall(&self, name: &str) -> Result<()> {
        self.run_idempotent(&self.definition.uninstall, name).await
    }

    async fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let Some(command) = &self.definition.version else {
            return Err(ManagerError::NotConfigured {
                manager: self.name.clone(),
                operation: "version",
            });
        };

        let output = self.run(command, Some(name)).await?;
        if !output.success {
            return Ok(None);
        }

        Ok(output
            .stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| line.split_whitespace().last())
            .map(ToString::to_string))
    }
}

struct CommandOutput {
    command_line: String,
    success: bool,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn message(&self) -> String {
        let mut message = String::new();
        if !self.stdout.trim().is_empty() {
            message.push_str(self.stdout.trim());
        }

        if !self.stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(self.stderr.trim());
        }

        message
    }
}

/// Command tables of every built-in package manager.
pub fn builtin_definitions() -> BTreeMap<String, ManagerDefinition> {
    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    fn phrases(phrases: &[&str]) -> Vec<String> {
        args(phrases)
    }

    BTreeMap::from([
        (
            "brew".into(),
            ManagerDefinition {
                binary: "brew".into(),
                list: args(&["brew", "list", "-1"]),
                install: args(&["brew", "install", PACKAGE_PLACEHOLDER]),
                uninstall: args(&["brew", "uninstall", PACKAGE_PLACEHOLDER]),
                version: Some(args(&["brew", "list", "--versions", PACKAGE_PLACEHOLDER])),
                list_pattern: None,
                idempotent_errors: phrases(&["already installed", "no such keg"]),
            },
        ),
        (
            "cargo".into(),
            ManagerDefinition {
                binary: "cargo".into(),
                list: args(&["cargo", "install", "--list"]),
                install: args(&["cargo", "install", PACKAGE_PLACEHOLDER]),
                uninstall: args(&["cargo", "uninstall", PACKAGE_PLACEHOLDER]),
                version: None,
                list_pattern: None,
                idempotent_errors: phrases(&["already exists", "already installed"]),
            },
        ),
        (
            "gem".into(),
            ManagerDefinition {
                binary: "gem".into(),
                list: args(&["gem", "list", "--local", "--no-versions"]),
                install: args(&["gem", "install", PACKAGE_PLACEHOLDER, "--user-install"]),
                uninstall: args(&["gem", "uninstall", PACKAGE_PLACEHOLDER, "-x"]),
                version: None,
                list_pattern: None,
                idempotent_errors: phrases(&["already installed", "is not installed"]),
            },
        ),
        (
            "npm".into(),
            ManagerDefinition {
                binary: "npm".into(),
                list: args(&["npm", "list", "-g", "--depth=0"]),
                install: args(&["npm", "install", "-g", PACKAGE_PLACEHOLDER]),
                uninstall: args(&["npm", "uninstall", "-g", PACKAGE_PLACEHOLDER]),
                version: None,
                list_pattern: Some(r"^[├└`+]\S*\s+(.+)@[^@]+$".into()),
                idempotent_errors: phrases(&["already installed"]),
            },
        ),
        (
            "pipx".into(),
            ManagerDefinition {
                binary: "pipx".into(),
                list: args(&["pipx", "list", "--short"]),
                install: args(&["pipx", "install", PACKAGE_PLACEHOLDER]),
                uninstall: args(&["pipx", "uninstall", PACKAGE_PLACEHOLDER]),
                version: None,
                list_pattern: None,
                idempotent_errors: phrases(&["already installed", "is not installed"]),
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;

    fn builtin(name: &str) -> CommandManager {
        let definition = builtin_definitions().remove(name).unwrap();
        CommandManager::new(name, definition).unwrap()
    }

    #[test_case("brew", "git\nhtop\n\ngit\n", vec!["git", "htop"]; "plain lines")]
    #[test_case("pipx", "black 24.1.0\nruff 0.4.2\n", vec!["black", "ruff"]; "first word")]
    #[test_case(
        "cargo",
        "ripgrep v14.1.0:\n    rg\nbat v0.24.0:\n    bat\n",
        vec!["bat", "ripgrep"];
        "indented continuation"
    )]
    #[test_case(
        "npm",
        "/usr/lib\n├── @scope/tool@1.2.3\n└── prettier@3.3.3\n",
        vec!["@scope/tool", "prettier"];
        "list pattern"
    )]
    #[test]
    fn parse_listing(manager: &str, output: &str, expect: Vec<&str>) {
        pretty_assertions::assert_eq!(builtin(manager).parse_list(output), expect);
    }

    #[test]
    fn builtin_tables_are_complete() {
        for (name, definition) in builtin_definitions() {
            assert!(!definition.list.is_empty(), "{name} list");
            assert!(
                definition.install.iter().any(|arg| arg == PACKAGE_PLACEHOLDER),
                "{name} install"
            );
            assert!(
                definition.uninstall.iter().any(|arg| arg == PACKAGE_PLACEHOLDER),
                "{name} uninstall"
            );
        }
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let manager = CommandManager::new(
            "ghost",
            ManagerDefinition {
                binary: "driftwood-no-such-binary".into(),
                list: vec!["driftwood-no-such-binary".into()],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!manager.is_available().await);
        assert!(matches!(
            manager.list_installed().await,
            Err(ManagerError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    fn shell_manager() -> CommandManager {
        let script = |body: &str| vec!["sh".to_string(), "-c".to_string(), body.to_string()];
        CommandManager::new(
            "shell",
            ManagerDefinition {
                binary: "sh".into(),
                list: script("printf 'git\\nvim\\n'"),
                install: script(indoc! {r#"
                    case "{package}" in
                        broken) echo "formula not found" >&2; exit 1 ;;
                        present) echo "Warning: present is already installed" >&2; exit 1 ;;
                    esac
                "#}),
                uninstall: script("exit 0"),
                version: Some(script("echo '{package} 1.0.0'")),
                list_pattern: None,
                idempotent_errors: vec!["already installed".into()],
            },
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_commands_drive_operations() -> anyhow::Result<()> {
        let manager = shell_manager();
        assert!(manager.is_available().await);
        pretty_assertions::assert_eq!(manager.list_installed().await?, vec!["git", "vim"]);
        assert!(manager.is_installed("vim").await?);
        assert!(!manager.is_installed("htop").await?);

        manager.install("htop").await?;
        manager.install("present").await?;
        manager.uninstall("htop").await?;
        pretty_assertions::assert_eq!(
            manager.installed_version("jq").await?,
            Some("1.0.0".to_string())
        );

        match manager.install("broken").await {
            Err(ManagerError::CommandFailed { message, .. }) => {
                pretty_assertions::assert_eq!(message, "formula not found");
            }
            other => panic!("expected command failure, got {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn version_without_command_is_not_configured() {
        let manager = builtin("cargo");
        assert!(matches!(
            manager.installed_version("ripgrep").await,
            Err(ManagerError::NotConfigured { .. })
        ));
    }
}
