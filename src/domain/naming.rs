// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Prescription unit names.
//!
//! A name is a pure function of a handler prefix and the normalized semantic
//! key of the record it describes:
//! `[prefix.]package[-version][-tag][-index][-ecosystem]`. The index URL and
//! ecosystem tokens are only present when they differ from the public PyPI
//! defaults. The prefix separator never occurs in a prefix or package token,
//! so a prefix cannot run into the package name.
//!
//! Names are unique within one run. Two different keys that still end up
//! with the same name are a `NameCollision` whichever is asked for first.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Semantic key of a generated unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PrescriptionKey {
    pub package: String,
    pub version: Option<String>,
    pub ecosystem: Option<String>,
    pub tag: Option<String>,
    pub index_url: Option<String>,
}

impl PrescriptionKey {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn ecosystem(mut self, ecosystem: impl Into<String>) -> Self {
        self.ecosystem = Some(ecosystem.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn index_url(mut self, index_url: impl Into<String>) -> Self {
        self.index_url = Some(index_url.into());
        self
    }
}

impl fmt::Display for PrescriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package={}", self.package)?;
        for (field, value) in [
            ("version", &self.version),
            ("ecosystem", &self.ecosystem),
            ("tag", &self.tag),
            ("index_url", &self.index_url),
        ] {
            if let Some(value) = value {
                write!(f, " {field}={value}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PrescriptionName(String);

impl PrescriptionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrescriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrescriptionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Collapse every run of characters outside `[a-z0-9]` into one `-`.
fn collapse(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut separator = false;
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if separator && !out.is_empty() {
                out.push('-');
            }
            separator = false;
            out.push(c);
        } else {
            separator = true;
        }
    }
    out
}

/// PEP 503 style: lower case, separator runs become a single `-`.
pub fn normalize_package(name: &str) -> String {
    collapse(name)
}

/// Keeps `[a-z0-9.]`; anything else, path delimiters included, becomes `_`.
pub fn normalize_version(version: &str) -> String {
    version
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Alphanumerics only, so `sha256:abc` becomes `sha256abc`.
pub fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

pub fn normalize_index_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    collapse(without_scheme)
}

pub fn normalize_ecosystem(ecosystem: &str) -> String {
    normalize_tag(ecosystem)
}

/// Index URL whose token is left out of names.
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";
/// Ecosystem whose token is left out of names.
pub const DEFAULT_ECOSYSTEM: &str = "pypi";

const PREFIX_SEPARATOR: char = '.';

/// Issues names for one run and remembers which key owns each of them.
#[derive(Debug, Default)]
pub struct NameRegistry {
    issued: HashMap<String, (String, PrescriptionKey)>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name for `key` under the handler `prefix`.
    ///
    /// Asking again for the same prefix and key returns the same name.
    pub fn name(&mut self, prefix: &str, key: &PrescriptionKey) -> Result<PrescriptionName> {
        let name = compose(prefix, key)?;
        let owner = (normalize_package(prefix), key.clone());

        match self.issued.get(&name) {
            None => {
                self.issued.insert(name.clone(), owner);
                Ok(PrescriptionName(name))
            }
            Some(existing) if *existing == owner => Ok(PrescriptionName(name)),
            Some((_, held_by)) => Err(Error::NameCollision {
                name,
                key: format!("{key} (already issued for {held_by})"),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

fn compose(prefix: &str, key: &PrescriptionKey) -> Result<String> {
    let package = normalize_package(&key.package);
    if package.is_empty() {
        return Err(Error::MissingField {
            origin: "prescription name".into(),
            field: "package".into(),
        });
    }

    let mut tokens = vec![package];
    tokens.extend(
        key.version
            .as_deref()
            .map(normalize_version)
            .filter(|v| !v.is_empty()),
    );
    tokens.extend(
        key.tag
            .as_deref()
            .map(normalize_tag)
            .filter(|t| !t.is_empty()),
    );
    tokens.extend(
        key.index_url
            .as_deref()
            .map(normalize_index_url)
            .filter(|t| !t.is_empty() && *t != normalize_index_url(DEFAULT_INDEX_URL)),
    );
    tokens.extend(
        key.ecosystem
            .as_deref()
            .map(normalize_ecosystem)
            .filter(|t| !t.is_empty() && t.as_str() != DEFAULT_ECOSYSTEM),
    );

    let body = tokens.join("-");
    let prefix = normalize_package(prefix);
    if prefix.is_empty() {
        Ok(body)
    } else {
        Ok(format!("{prefix}{PREFIX_SEPARATOR}{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_default_tokens_are_appended() {
        let key = PrescriptionKey::new("Foo_Bar")
            .version("1.0")
            .ecosystem("Conda")
            .index_url("https://mirror.example/simple");
        assert_eq!(
            compose("gh-archived", &key).unwrap(),
            "gh-archived.foo-bar-1.0-mirror-example-simple-conda"
        );
    }

    #[test]
    fn default_tokens_are_left_out() {
        let key = PrescriptionKey::new("flask")
            .ecosystem("PyPI")
            .index_url("https://pypi.org/simple");
        assert_eq!(compose("pypi-release", &key).unwrap(), "pypi-release.flask");
    }

    #[test]
    fn empty_package_is_rejected() {
        let err = compose("", &PrescriptionKey::new("--")).unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
    }
}
