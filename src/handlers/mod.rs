// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Handlers turn one upstream data source into prescription documents.
//!
//! A handler pushes its documents into a bounded [`PrescriptionSink`]; the
//! writer drains the other end in the same task, so a slow disk throttles
//! the producer instead of buffering the whole result set.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::domain::{NameRegistry, Prescription, WriteSummary};
use crate::error::{Error, Result};
use crate::services::github::GitHub;
use crate::services::pypi::PyPI;
use crate::services::quay::Quay;
use crate::services::repository::PrescriptionsRepository;
use crate::services::warehouse::Warehouse;
use crate::services::writer::PrescriptionWriter;

pub mod github;
pub mod pypi;
pub mod quay;
pub mod scorecards;

/// Documents buffered between a handler and the writer.
const SINK_CAPACITY: usize = 32;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    Scorecards,
    QuaySecurity,
    QuayImageSize,
    PypiMaintainers,
    PypiDownloads,
    PypiArtifactSize,
    PypiRelease,
    GhLink,
    GhArchived,
    GhForked,
    GhPopularity,
    GhUpdated,
    GhContributors,
    GhReleaseNotes,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 14] = [
        HandlerKind::Scorecards,
        HandlerKind::QuaySecurity,
        HandlerKind::QuayImageSize,
        HandlerKind::PypiMaintainers,
        HandlerKind::PypiDownloads,
        HandlerKind::PypiArtifactSize,
        HandlerKind::PypiRelease,
        HandlerKind::GhLink,
        HandlerKind::GhArchived,
        HandlerKind::GhForked,
        HandlerKind::GhPopularity,
        HandlerKind::GhUpdated,
        HandlerKind::GhContributors,
        HandlerKind::GhReleaseNotes,
    ];

    /// Identifier used on the command line, in branch names and as the
    /// prefix of generated unit names.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Scorecards => "scorecards",
            Self::QuaySecurity => "quay-security",
            Self::QuayImageSize => "quay-image-size",
            Self::PypiMaintainers => "pypi-maintainers",
            Self::PypiDownloads => "pypi-downloads",
            Self::PypiArtifactSize => "pypi-artifact-size",
            Self::PypiRelease => "pypi-release",
            Self::GhLink => "gh-link",
            Self::GhArchived => "gh-archived",
            Self::GhForked => "gh-forked",
            Self::GhPopularity => "gh-popularity",
            Self::GhUpdated => "gh-updated",
            Self::GhContributors => "gh-contributors",
            Self::GhReleaseNotes => "gh-release-notes",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Scorecards => "OpenSSF security scorecard checks of linked GitHub repositories",
            Self::QuaySecurity => "Vulnerabilities found by the registry scanner in stack images",
            Self::QuayImageSize => "Size of stack container images",
            Self::PypiMaintainers => "Maintainer count, reach and account age on PyPI",
            Self::PypiDownloads => "PyPI download popularity per project and version",
            Self::PypiArtifactSize => "Releases shipping large artifacts on PyPI",
            Self::PypiRelease => "Projects without a recent release on PyPI",
            Self::GhLink => "GitHub repository a project is hosted in",
            Self::GhArchived => "Archived GitHub repositories",
            Self::GhForked => "GitHub repositories that are forks",
            Self::GhPopularity => "GitHub popularity from stars, forks and watchers",
            Self::GhUpdated => "GitHub repositories without recent commits",
            Self::GhContributors => "GitHub repositories with few contributors",
            Self::GhReleaseNotes => "Release notes published as GitHub releases",
        }
    }

    /// Upstream services the handler reads.
    pub fn sources(&self) -> &'static [&'static str] {
        match self {
            Self::Scorecards => &["bigquery", "prescriptions"],
            Self::QuaySecurity | Self::QuayImageSize => &["quay"],
            Self::PypiMaintainers | Self::PypiArtifactSize | Self::PypiRelease => &["pypi"],
            Self::PypiDownloads => &["bigquery"],
            Self::GhLink => &["pypi", "github-web"],
            Self::GhArchived
            | Self::GhForked
            | Self::GhPopularity
            | Self::GhUpdated
            | Self::GhContributors => &["github", "prescriptions"],
            Self::GhReleaseNotes => &["pypi", "github-web", "prescriptions"],
        }
    }

    /// Credentials the handler cannot run without.
    pub fn credentials(&self) -> &'static [Credential] {
        match self {
            Self::Scorecards | Self::PypiDownloads => &[Credential::Warehouse],
            Self::QuaySecurity => &[Credential::Quay],
            Self::GhArchived
            | Self::GhForked
            | Self::GhPopularity
            | Self::GhUpdated
            | Self::GhContributors => &[Credential::GitHub],
            Self::QuayImageSize
            | Self::PypiMaintainers
            | Self::PypiArtifactSize
            | Self::PypiRelease
            | Self::GhLink
            | Self::GhReleaseNotes => &[],
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for HandlerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('_', "-").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown handler '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    GitHub,
    Quay,
    Warehouse,
}

impl Credential {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::GitHub => "a GitHub token or GitHub App",
            Self::Quay => "a Quay API token",
            Self::Warehouse => "BigQuery credentials",
        }
    }

    pub fn env_hint(&self) -> &'static str {
        match self {
            Self::GitHub => {
                "THOTH_PRESCRIPTIONS_REFRESH_GITHUB_TOKEN (or GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH)"
            }
            Self::Quay => "THOTH_PRESCRIPTIONS_REFRESH_QUAY_TOKEN",
            Self::Warehouse => {
                "GOOGLE_APPLICATION_CREDENTIALS (or THOTH_PRESCRIPTIONS_REFRESH_BIGQUERY_ACCESS_TOKEN)"
            }
        }
    }
}

/// Producer end of a handler's document stream.
pub struct PrescriptionSink {
    tx: mpsc::Sender<Prescription>,
    cancel: CancellationToken,
}

impl PrescriptionSink {
    /// Hand a document to the writer, waiting while its buffer is full.
    pub async fn emit(&self, prescription: Prescription) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(prescription) => sent.map_err(|_| Error::SinkClosed),
        }
    }
}

pub fn channel(cancel: CancellationToken) -> (PrescriptionSink, ReceiverStream<Prescription>) {
    let (tx, rx) = mpsc::channel(SINK_CAPACITY);
    (PrescriptionSink { tx, cancel }, ReceiverStream::new(rx))
}

/// Clients and the working copy view shared by every handler of a run.
pub struct Services {
    pub config: Arc<Config>,
    pub github: GitHub,
    pub quay: Quay,
    pub pypi: PyPI,
    pub warehouse: Warehouse,
    pub repository: PrescriptionsRepository,
}

impl Services {
    /// Repository recorded in the provenance metadata of generated units.
    pub fn provenance(&self) -> &str {
        &self.config.repo
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Emit every document of this run into `sink`. The sequence is single
    /// pass; a handler is never asked to produce twice.
    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()>;
}

pub fn create_handler(kind: HandlerKind, services: &Arc<Services>) -> Box<dyn Handler> {
    let services = Arc::clone(services);
    match kind {
        HandlerKind::Scorecards => Box::new(scorecards::Scorecards::new(services)),
        HandlerKind::QuaySecurity => Box::new(quay::QuaySecurity::new(services)),
        HandlerKind::QuayImageSize => Box::new(quay::QuayImageSize::new(services)),
        HandlerKind::PypiDownloads => Box::new(pypi::PypiDownloads::new(services)),
        HandlerKind::PypiMaintainers | HandlerKind::PypiArtifactSize | HandlerKind::PypiRelease => {
            Box::new(pypi::PackageIndex::new(kind, services))
        }
        HandlerKind::GhLink => Box::new(github::GhLink::new(services)),
        HandlerKind::GhArchived
        | HandlerKind::GhForked
        | HandlerKind::GhPopularity
        | HandlerKind::GhUpdated
        | HandlerKind::GhContributors
        | HandlerKind::GhReleaseNotes => Box::new(github::LinkedRepository::new(kind, services)),
    }
}

/// Run `handler` with the writer draining its sink in the same task.
///
/// A write failure wins over the producer's error, which is then only the
/// closed sink.
pub async fn run_handler(
    handler: &dyn Handler,
    names: &mut NameRegistry,
    writer: &mut PrescriptionWriter,
    cancel: CancellationToken,
) -> Result<WriteSummary> {
    let (sink, stream) = channel(cancel);
    let id = handler.kind().id();

    let producer = async move {
        let result = handler.produce(names, &sink).await;
        drop(sink);
        result
    };
    let (produced, consumed) = tokio::join!(producer, writer.consume(id, stream));

    match (produced, consumed) {
        (_, Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Ok(summary)) => Ok(summary),
    }
}

/// Log a per-item upstream failure and carry on; anything else stops the
/// handler.
pub fn skip_item(kind: HandlerKind, item: &str, error: Error) -> Result<()> {
    if error.is_item_failure() {
        warn!(handler = %kind, item, error = %error, "skipping");
        Ok(())
    } else {
        Err(error)
    }
}

/// Bytes in binary units with two decimals, e.g. `3.00MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2}{}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_ids_parse_back() {
        for kind in HandlerKind::ALL {
            assert_eq!(kind.id().parse::<HandlerKind>().unwrap(), kind);
        }
        assert_eq!(
            "gh_release_notes".parse::<HandlerKind>().unwrap(),
            HandlerKind::GhReleaseNotes
        );
        assert!("statistics".parse::<HandlerKind>().is_err());
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(512), "512.00B");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00MiB");
        assert_eq!(human_size(1536), "1.50KiB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024 * 1024), "5120.00GiB");
    }

    #[tokio::test]
    async fn sink_reports_closed_consumer() {
        let (sink, stream) = channel(CancellationToken::new());
        drop(stream);
        let prescription = Prescription::retraction(
            crate::domain::PrescriptionPath::new("flask", "gh_archived.yaml"),
            "flask",
        );
        assert!(matches!(sink.emit(prescription).await, Err(Error::SinkClosed)));
    }
}
