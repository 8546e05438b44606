// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::PrescriptionPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PrescriptionPath,
    pub status: ChangeStatus,
    pub summary: String,
    /// Handler that produced the change
    pub handler: String,
}

/// Files touched during a run, keyed by path so a later write to the same
/// file replaces the earlier entry.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: BTreeMap<PrescriptionPath, FileChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. A file added and then deleted in the same run never
    /// existed as far as the repository is concerned.
    pub fn record(&mut self, change: FileChange) {
        let previous = self.changes.get(&change.path).map(|c| c.status);
        match (previous, change.status) {
            (Some(ChangeStatus::Added), ChangeStatus::Deleted) => {
                self.changes.remove(&change.path);
            }
            (Some(ChangeStatus::Added), _) => {
                self.changes.insert(
                    change.path.clone(),
                    FileChange {
                        status: ChangeStatus::Added,
                        ..change
                    },
                );
            }
            (Some(ChangeStatus::Deleted), ChangeStatus::Added) => {
                self.changes.insert(
                    change.path.clone(),
                    FileChange {
                        status: ChangeStatus::Modified,
                        ..change
                    },
                );
            }
            _ => {
                self.changes.insert(change.path.clone(), change);
            }
        }
    }

    /// Put back an entry captured before a rolled back write.
    pub(crate) fn restore(&mut self, path: &PrescriptionPath, previous: Option<FileChange>) {
        match previous {
            Some(change) => {
                self.changes.insert(path.clone(), change);
            }
            None => {
                self.changes.remove(path);
            }
        }
    }

    pub(crate) fn discard(&mut self, path: &PrescriptionPath) {
        self.changes.remove(path);
    }

    pub fn get(&self, path: &PrescriptionPath) -> Option<&FileChange> {
        self.changes.get(path)
    }

    /// Changes sorted by path.
    pub fn iter(&self) -> impl Iterator<Item = &FileChange> {
        self.changes.values()
    }

    pub fn paths(&self) -> Vec<&PrescriptionPath> {
        self.changes.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What a single write did to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Removed,
    Unchanged,
    /// Dry run; carries the content that would have been written, empty for
    /// a removal.
    DryRun { content: String },
}

impl WriteOutcome {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub dry_run: usize,
}

impl WriteSummary {
    pub fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Removed => self.removed += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
            WriteOutcome::DryRun { .. } => self.dry_run += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.created + self.updated + self.removed
    }

    pub fn total(&self) -> usize {
        self.changed() + self.unchanged + self.dry_run
    }
}

impl fmt::Display for WriteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} removed, {} unchanged",
            self.created, self.updated, self.removed, self.unchanged
        )?;
        if self.dry_run > 0 {
            write!(f, ", {} dry run", self.dry_run)?;
        }
        Ok(())
    }
}
