// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::domain::PrescriptionName;
use crate::error::{Error, Result};

/// Link written when upstream gives none.
pub const MISSING_LINK: &str = "no link provided";

/// Directory of the prescriptions repository holding every document.
pub const PRESCRIPTIONS_DIR: &str = "prescriptions";

pub const PRESCRIPTIONS_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitKind {
    Boot,
    Wrap,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Wrap => "wrap",
        }
    }

    fn section(&self) -> &'static str {
        match self {
            Self::Boot => "boots",
            Self::Wrap => "wraps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// One entry of a unit's `justification` or `stack_info` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Justification {
    severity: Severity,
    message: String,
    link: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl Justification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            link: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Upstream link that may be absent or blank.
    pub fn maybe_link(mut self, link: Option<&str>) -> Self {
        self.link = link
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self.extra.clone().into_iter().collect();
        map.insert("type".into(), self.severity.as_str().into());
        map.insert("message".into(), self.message.clone().into());
        map.insert(
            "link".into(),
            self.link.as_deref().unwrap_or(MISSING_LINK).into(),
        );
        Value::Object(map)
    }
}

/// A `resolved_dependencies` entry to match on.
pub fn dependency(name: &str, version: Option<&str>, index_url: Option<&str>) -> Value {
    let mut map = Map::new();
    map.insert("name".into(), name.into());
    if let Some(version) = version {
        map.insert("version".into(), format!("=={version}").into());
    }
    if let Some(index_url) = index_url {
        map.insert("index_url".into(), index_url.into());
    }
    Value::Object(map)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    name: PrescriptionName,
    kind: UnitKind,
    type_name: Option<String>,
    should_include: Map<String, Value>,
    conditions: Option<Value>,
    run: Map<String, Value>,
    metadata: Option<Value>,
}

impl Unit {
    pub fn new(kind: UnitKind, name: PrescriptionName) -> Self {
        let mut should_include = Map::new();
        should_include.insert("adviser_pipeline".into(), Value::Bool(true));
        Self {
            name,
            kind,
            type_name: None,
            should_include,
            conditions: None,
            run: Map::new(),
            metadata: None,
        }
    }

    pub fn boot(name: PrescriptionName) -> Self {
        Self::new(UnitKind::Boot, name)
    }

    pub fn wrap(name: PrescriptionName) -> Self {
        Self::new(UnitKind::Wrap, name)
    }

    pub fn name(&self) -> &PrescriptionName {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Specialised unit type such as `wrap.GHReleaseNotes`.
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn include(mut self, key: impl Into<String>, value: Value) -> Self {
        self.should_include.insert(key.into(), value);
        self
    }

    pub fn base_image(self, image: &str) -> Self {
        self.include(
            "runtime_environments",
            json!({ "base_images": [image] }),
        )
    }

    pub fn matching(mut self, dependency: Value) -> Self {
        self.conditions = Some(json!({ "state": { "resolved_dependencies": [dependency] } }));
        self
    }

    pub fn justification(self, justification: Justification) -> Self {
        self.push_run_entry("justification", justification)
    }

    pub fn stack_info(self, justification: Justification) -> Self {
        self.push_run_entry("stack_info", justification)
    }

    fn push_run_entry(mut self, list: &str, justification: Justification) -> Self {
        let entry = justification.to_value();
        match self.run.get_mut(list) {
            Some(Value::Array(entries)) => entries.push(entry),
            _ => {
                self.run.insert(list.into(), Value::Array(vec![entry]));
            }
        }
        self
    }

    pub fn run(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.run.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Provenance metadata pointing back at the prescriptions repository.
    pub fn provenance(self, repository: &str) -> Self {
        self.metadata(json!([{
            "prescriptions_repository": repository,
            "prescriptions_version": PRESCRIPTIONS_VERSION,
        }]))
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), self.name.as_str().into());
        map.insert(
            "type".into(),
            self.type_name
                .as_deref()
                .unwrap_or(self.kind.as_str())
                .into(),
        );
        map.insert(
            "should_include".into(),
            Value::Object(self.should_include.clone()),
        );
        if let Some(ref conditions) = self.conditions {
            map.insert("match".into(), conditions.clone());
        }
        map.insert("run".into(), Value::Object(self.run.clone()));
        if let Some(ref metadata) = self.metadata {
            map.insert("metadata".into(), metadata.clone());
        }
        Value::Object(map)
    }
}

/// Location of a document relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrescriptionPath(PathBuf);

impl PrescriptionPath {
    /// `prescriptions/<pr>_/<project>/<file>`; `_`-prefixed and two letter
    /// projects are not sharded.
    pub fn new(project: &str, file_name: &str) -> Self {
        let mut path = PathBuf::from(PRESCRIPTIONS_DIR);
        if !project.starts_with('_') && project.chars().count() > 2 {
            let shard: String = project.chars().take(2).collect();
            path.push(format!("{shard}_"));
        }
        path.push(project);
        path.push(file_name);
        Self(path)
    }

    /// Documents about a container image live under `_containers`.
    pub fn container(image: &str, file_name: &str) -> Self {
        Self::new(
            &format!("_containers/{}", image.replace('-', "_")),
            file_name,
        )
    }

    pub fn from_relative(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Name of the directory holding the document.
    pub fn project(&self) -> Option<&str> {
        self.0
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }
}

impl fmt::Display for PrescriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self
            .0
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        f.write_str(&parts.join("/"))
    }
}

/// A document to write, or to remove when it has no units.
#[derive(Debug, Clone, PartialEq)]
pub struct Prescription {
    pub path: PrescriptionPath,
    pub units: Vec<Unit>,
    /// One line describing the change, used in logs and the pull request
    pub summary: String,
}

impl Prescription {
    pub fn new(path: PrescriptionPath, summary: impl Into<String>) -> Self {
        Self {
            path,
            units: Vec::new(),
            summary: summary.into(),
        }
    }

    pub fn retraction(path: PrescriptionPath, summary: impl Into<String>) -> Self {
        Self::new(path, summary)
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn push(&mut self, unit: Unit) {
        self.units.push(unit);
    }

    pub fn is_retraction(&self) -> bool {
        self.units.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for unit in &self.units {
            if unit.name.as_str().is_empty() {
                return Err(self.invalid("unit with an empty name".into()));
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(self.invalid(format!("duplicate unit name '{}'", unit.name)));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidPrescription {
            path: self.path.to_string(),
            reason,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut sections: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for unit in &self.units {
            sections
                .entry(unit.kind.section())
                .or_default()
                .push(unit.to_value());
        }
        json!({ "units": sections })
    }

    /// Canonical YAML: every mapping sorted by key.
    pub fn render(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_yaml::to_string(&canonicalize(self.to_value()))?)
    }
}

/// Rebuild every object with sorted keys, whatever map backs `serde_json`.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_paths() {
        assert_eq!(
            PrescriptionPath::new("tensorflow", "gh_link.yaml").to_string(),
            "prescriptions/te_/tensorflow/gh_link.yaml"
        );
        assert_eq!(
            PrescriptionPath::new("six", "gh_link.yaml").to_string(),
            "prescriptions/si_/six/gh_link.yaml"
        );
        assert_eq!(
            PrescriptionPath::new("py", "gh_link.yaml").to_string(),
            "prescriptions/py/gh_link.yaml"
        );
        assert_eq!(
            PrescriptionPath::container("ps-tensorflow", "quay_security.yaml").to_string(),
            "prescriptions/_containers/ps_tensorflow/quay_security.yaml"
        );
    }

    #[test]
    fn project_is_parent_directory() {
        let path = PrescriptionPath::new("flask", "gh_archived.yaml");
        assert_eq!(path.project(), Some("flask"));
        assert_eq!(path.file_name(), Some("gh_archived.yaml"));
    }
}
