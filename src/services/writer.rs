// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Writes prescriptions into the working copy.
//!
//! A document is written only when its canonical rendering differs from what
//! is on disk. Every mutation is journaled with the previous file content so
//! the writes of a failed handler can be undone with [`PrescriptionWriter::rollback_to`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::domain::{
    ChangeSet, ChangeStatus, FileChange, Prescription, PrescriptionPath, WriteOutcome,
    WriteSummary,
};
use crate::error::Result;

struct JournalEntry {
    path: PrescriptionPath,
    /// File content before the write; `None` if the file did not exist
    previous: Option<Vec<u8>>,
    previous_change: Option<FileChange>,
}

/// Position in the journal to roll back to.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    journal: usize,
    summary: WriteSummary,
}

pub struct PrescriptionWriter {
    root: PathBuf,
    dry_run: bool,
    changes: ChangeSet,
    journal: Vec<JournalEntry>,
    /// Content of each touched file before the run first wrote it
    originals: HashMap<PrescriptionPath, Option<Vec<u8>>>,
    summary: WriteSummary,
}

impl PrescriptionWriter {
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
            changes: ChangeSet::new(),
            journal: Vec::new(),
            originals: HashMap::new(),
            summary: WriteSummary::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Files changed so far in this run.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }

    /// Outcomes of every write so far.
    pub fn summary(&self) -> WriteSummary {
        self.summary
    }

    fn read_existing(&self, full: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `prescription`, or remove its file for a retraction.
    pub fn write(&mut self, prescription: &Prescription, handler: &str) -> Result<WriteOutcome> {
        let path = &prescription.path;
        let full = self.root.join(path.as_path());
        let existing = self.read_existing(&full)?;

        let outcome = if prescription.is_retraction() {
            self.remove(prescription, handler, &full, existing)?
        } else {
            let content = prescription.render()?;
            self.store(prescription, handler, &full, existing, content)?
        };

        self.summary.record(&outcome);
        Ok(outcome)
    }

    fn remove(
        &mut self,
        prescription: &Prescription,
        handler: &str,
        full: &Path,
        existing: Option<Vec<u8>>,
    ) -> Result<WriteOutcome> {
        let path = &prescription.path;
        if existing.is_none() {
            debug!(handler, path = %path, "nothing to retract");
            return Ok(WriteOutcome::Unchanged);
        }

        if self.dry_run {
            info!(handler, path = %path, "dry run: would remove");
            return Ok(WriteOutcome::DryRun {
                content: String::new(),
            });
        }

        fs::remove_file(full)?;
        self.commit_entry(prescription, handler, existing, ChangeStatus::Deleted);
        self.forget_if_original(path, None);
        info!(handler, path = %path, summary = %prescription.summary, "removed");
        Ok(WriteOutcome::Removed)
    }

    fn store(
        &mut self,
        prescription: &Prescription,
        handler: &str,
        full: &Path,
        existing: Option<Vec<u8>>,
        content: String,
    ) -> Result<WriteOutcome> {
        let path = &prescription.path;
        if existing.as_deref() == Some(content.as_bytes()) {
            debug!(handler, path = %path, "unchanged");
            return Ok(WriteOutcome::Unchanged);
        }

        if self.dry_run {
            info!(handler, path = %path, "dry run: would write\n{content}");
            return Ok(WriteOutcome::DryRun { content });
        }

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content.as_bytes())?;

        let (status, outcome) = if existing.is_some() {
            (ChangeStatus::Modified, WriteOutcome::Updated)
        } else {
            (ChangeStatus::Added, WriteOutcome::Created)
        };
        self.commit_entry(prescription, handler, existing, status);
        self.forget_if_original(path, Some(content.as_bytes()));
        info!(handler, path = %path, status = %status, summary = %prescription.summary, "written");
        Ok(outcome)
    }

    fn commit_entry(
        &mut self,
        prescription: &Prescription,
        handler: &str,
        previous: Option<Vec<u8>>,
        status: ChangeStatus,
    ) {
        let path = prescription.path.clone();
        self.originals
            .entry(path.clone())
            .or_insert_with(|| previous.clone());
        self.journal.push(JournalEntry {
            path: path.clone(),
            previous,
            previous_change: self.changes.get(&path).cloned(),
        });
        self.changes.record(FileChange {
            path,
            status,
            summary: prescription.summary.clone(),
            handler: handler.to_string(),
        });
    }

    /// A file written back to the content it had before the run is not a
    /// change.
    fn forget_if_original(&mut self, path: &PrescriptionPath, current: Option<&[u8]>) {
        if self.originals.get(path).map(Option::as_deref) == Some(current) {
            debug!(path = %path, "back to its original content");
            self.changes.discard(path);
        }
    }

    /// Drain a handler's prescriptions, stopping at the first write error.
    pub async fn consume<S>(&mut self, handler: &str, mut stream: S) -> Result<WriteSummary>
    where
        S: Stream<Item = Prescription> + Unpin,
    {
        let mut summary = WriteSummary::default();
        while let Some(prescription) = stream.next().await {
            let outcome = self.write(&prescription, handler)?;
            summary.record(&outcome);
        }
        Ok(summary)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            journal: self.journal.len(),
            summary: self.summary,
        }
    }

    /// Undo every write made after `checkpoint`, newest first.
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) -> Result<usize> {
        let mut undone = 0;
        while self.journal.len() > checkpoint.journal {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            let full = self.root.join(entry.path.as_path());
            match entry.previous {
                Some(ref content) => {
                    if let Some(parent) = full.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&full, content)?;
                }
                None => {
                    if full.exists() {
                        fs::remove_file(&full)?;
                    }
                }
            }
            self.changes.restore(&entry.path, entry.previous_change);
            debug!(path = %entry.path, "rolled back");
            undone += 1;
        }
        self.summary = checkpoint.summary;
        Ok(undone)
    }
}
