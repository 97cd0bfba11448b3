// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile templating.
//!
//! Source files ending in ".tmpl" are templates. Every `{{NAME}}` placeholder
//! in a template is replaced by the value of a variable of the same name. The
//! suffix is dropped from the deployed target, so "gitconfig.tmpl" deploys to
//! "~/.gitconfig".

use regex::Regex;
use std::{collections::HashMap, path::Path, sync::LazyLock};

/// File name suffix marking a template.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap());

/// Variable lookup used to resolve placeholders.
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup through the process environment.
pub fn process_env() -> EnvLookup {
    Box::new(|name| std::env::var(name).ok())
}

/// Check if `path` names a template.
pub fn is_template(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMPLATE_SUFFIX) && name != TEMPLATE_SUFFIX)
}

/// Replace every placeholder in `content` through `lookup`.
///
/// # Errors
///
/// Return names of every variable `lookup` cannot resolve, without duplicates,
/// in order of first appearance. Nothing is rendered in that case.
pub fn render(
    content: &str,
    lookup: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> Result<String, Vec<String>> {
    let mut values = HashMap::new();
    let mut missing = Vec::new();
    for captures in PLACEHOLDER.captures_iter(content) {
        let name = &captures[1];
        if values.contains_key(name) || missing.iter().any(|seen| seen == name) {
            continue;
        }

        match lookup(name) {
            Some(value) => {
                values.insert(name.to_string(), value);
            }
            None => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(missing);
    }

    Ok(PLACEHOLDER
        .replace_all(content, |captures: &regex::Captures<'_>| {
            values.get(&captures[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}
