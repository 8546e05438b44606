// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Read-only view of the prescriptions working copy.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde_yaml::Value;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::domain::{PRESCRIPTIONS_DIR, Prescription, PrescriptionPath, normalize_package};
use crate::error::Result;
use crate::services::github::RepoSlug;

const GH_LINK_FILE: &str = "gh_link.yaml";

/// A project of the prescriptions repository linked to a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedProject {
    pub project: String,
    pub slug: RepoSlug,
}

pub struct PrescriptionsRepository {
    root: PathBuf,
    randomize: bool,
    representative: Vec<String>,
}

impl PrescriptionsRepository {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            root: root.into(),
            randomize: config.randomize,
            representative: config.representative_packages(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prescriptions_dir(&self) -> PathBuf {
        self.root.join(PRESCRIPTIONS_DIR)
    }

    /// Shuffle already sorted items when randomization is on.
    pub fn arrange<T>(&self, items: &mut [T]) {
        if self.randomize {
            items.shuffle(&mut rand::rng());
        }
    }

    /// YAML documents outside `_`-prefixed trees, sorted by path.
    fn documents(&self) -> impl Iterator<Item = DirEntry> {
        let base = self.prescriptions_dir();
        WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('_'))
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path()
                        .extension()
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
    }

    fn parse(path: &Path) -> Option<Value> {
        let content = fs::read_to_string(path)
            .map_err(|e| warn!(path = %path.display(), error = %e, "cannot read document"))
            .ok()?;
        serde_yaml::from_str(&content)
            .map_err(|e| warn!(path = %path.display(), error = %e, "cannot parse document"))
            .ok()
    }

    /// Projects holding at least one prescription document, merged with the
    /// configured representative packages. Names are PEP 503 normalized, so
    /// case and delimiter variants of one package are a single project.
    pub fn projects(&self) -> Result<Vec<String>> {
        let mut projects: BTreeSet<String> = BTreeSet::new();

        for entry in self.documents() {
            let Some(document) = Self::parse(entry.path()) else {
                continue;
            };
            if document.get("units").is_none() {
                continue;
            }
            if let Some(project) = project_of(&entry) {
                projects.insert(project);
            }
        }

        projects.extend(
            self.representative
                .iter()
                .map(|package| normalize_package(package))
                .filter(|package| !package.is_empty()),
        );

        let mut projects: Vec<String> = projects.into_iter().collect();
        self.arrange(&mut projects);
        debug!(count = projects.len(), "projects found");
        Ok(projects)
    }

    /// Projects whose `gh_link.yaml` points at a GitHub repository.
    pub fn linked_projects(&self) -> Result<Vec<LinkedProject>> {
        let mut linked = Vec::new();

        for entry in self.documents() {
            if entry.file_name() != GH_LINK_FILE {
                continue;
            }
            let Some(document) = Self::parse(entry.path()) else {
                continue;
            };
            let Some(project) = project_of(&entry) else {
                continue;
            };

            match gh_link(&document).and_then(RepoSlug::from_link) {
                Some(slug) => linked.push(LinkedProject { project, slug }),
                None => warn!(project = %project, "gh_link.yaml without a usable GitHub link"),
            }
        }

        linked.sort_by(|a, b| a.project.cmp(&b.project));
        linked.dedup_by(|a, b| a.project == b.project);
        self.arrange(&mut linked);
        debug!(count = linked.len(), "projects linked to GitHub");
        Ok(linked)
    }

    /// Current content of a document, if it exists.
    pub fn read(&self, path: &PrescriptionPath) -> Result<Option<String>> {
        let full = self.root.join(path.as_path());
        match fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, path: &PrescriptionPath) -> bool {
        self.root.join(path.as_path()).is_file()
    }

    /// Whether writing `prescription` would leave the working copy as is.
    pub fn is_current(&self, prescription: &Prescription) -> Result<bool> {
        if prescription.is_retraction() {
            return Ok(!self.exists(&prescription.path));
        }
        let rendered = prescription.render()?;
        Ok(self.read(&prescription.path)?.as_deref() == Some(rendered.as_str()))
    }
}

/// Normalized project name of the directory holding `entry`.
fn project_of(entry: &DirEntry) -> Option<String> {
    let name = entry.path().parent()?.file_name()?.to_str()?;
    let project = normalize_package(name);
    (!project.is_empty()).then_some(project)
}

/// `units.wraps[0].run.justification[0].link`
fn gh_link(document: &Value) -> Option<&str> {
    document
        .get("units")?
        .get("wraps")?
        .get(0)?
        .get("run")?
        .get("justification")?
        .get(0)?
        .get("link")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_link_of_first_wrap() {
        let document: Value = serde_yaml::from_str(
            r#"
units:
  wraps:
  - name: gh-link.flask
    run:
      justification:
      - link: https://github.com/pallets/flask
        message: Package 'flask' is hosted on GitHub
        type: INFO
"#,
        )
        .unwrap();
        assert_eq!(gh_link(&document), Some("https://github.com/pallets/flask"));
    }

    fn document(root: &Path, relative: &str, content: &str) {
        let path = root.join(PRESCRIPTIONS_DIR).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn case_variants_are_one_project() {
        let dir = tempfile::tempdir().unwrap();
        document(dir.path(), "py_/pyyaml/gh_link.yaml", "units:\n  wraps: []\n");
        document(dir.path(), "Py_/PyYAML/pypi_release.yaml", "units:\n  wraps: []\n");
        let config = Config {
            ml_packages: "PyYAML\nZope.Interface".into(),
            nlp_packages: "zope_interface".into(),
            ..Config::default()
        };

        let repository = PrescriptionsRepository::new(dir.path(), &config);
        assert_eq!(
            repository.projects().unwrap(),
            vec!["pyyaml".to_string(), "zope-interface".to_string()]
        );
    }

    #[test]
    fn documents_without_units_are_not_projects() {
        let dir = tempfile::tempdir().unwrap();
        document(dir.path(), "fl_/flask/notes.yaml", "comment: nothing here\n");
        document(dir.path(), "_containers/ps_nlp/quay_image_size.yaml", "units:\n  boots: []\n");

        let repository = PrescriptionsRepository::new(dir.path(), &Config::default());
        assert!(repository.projects().unwrap().is_empty());
    }
}
