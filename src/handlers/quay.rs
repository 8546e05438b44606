// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Container registry handlers for predictable stack images.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use crate::domain::{
    Justification, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath, Unit,
};
use crate::error::Result;
use crate::handlers::{Handler, HandlerKind, PrescriptionSink, Services, human_size, skip_item};
use crate::services::quay::Vulnerability;

const SECURITY_FILE: &str = "quay_security.yaml";
const ALTERNATIVES_FILE: &str = "quay_security_alternatives.yaml";
const IMAGE_SIZE_FILE: &str = "quay_image_size.yaml";
const MISSING_DESCRIPTION: &str = "No description provided";

/// Configured images plus every predictable stack repository in the
/// namespace, sorted and without duplicates.
async fn image_names(services: &Services) -> Result<Vec<String>> {
    let mut names: BTreeSet<String> = services.config.configured_images().into_iter().collect();
    let mut listing = services.quay.repositories();
    while let Some(page) = listing.next_page().await? {
        names.extend(page);
    }

    let mut names: Vec<String> = names.into_iter().collect();
    services.repository.arrange(&mut names);
    info!(count = names.len(), "container images to check");
    Ok(names)
}

/// Scan results of one image, keyed by version tag.
#[derive(Debug, Default)]
struct ImageScan {
    findings: BTreeMap<String, Vec<Vulnerability>>,
}

impl ImageScan {
    fn record(&mut self, tag: &str, vulnerabilities: Vec<Vulnerability>) {
        let mut seen = BTreeSet::new();
        let distinct = vulnerabilities
            .into_iter()
            .filter(|v| seen.insert(v.name.clone()))
            .collect();
        self.findings.insert(tag.to_string(), distinct);
    }

    fn vulnerable(&self) -> impl Iterator<Item = (&str, &[Vulnerability])> {
        self.findings
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(tag, v)| (tag.as_str(), v.as_slice()))
    }

    fn clean(&self) -> impl Iterator<Item = &str> {
        self.findings
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(tag, _)| tag.as_str())
    }
}

/// Vulnerabilities reported by the registry scanner.
pub struct QuaySecurity {
    services: Arc<Services>,
}

impl QuaySecurity {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn scan(&self, image: &str) -> Result<ImageScan> {
        let quay = &self.services.quay;
        let mut scan = ImageScan::default();
        for container in quay.images(image).await? {
            let vulnerabilities = quay.vulnerabilities(image, &container.id).await?;
            for tag in container.version_tags() {
                info!(image, tag, found = vulnerabilities.len(), "security scan");
                scan.record(tag, vulnerabilities.clone());
            }
        }
        Ok(scan)
    }

    fn security_document(
        &self,
        names: &mut NameRegistry,
        image: &str,
        scan: &ImageScan,
    ) -> Result<Prescription> {
        let quay = &self.services.quay;
        let path = PrescriptionPath::container(image, SECURITY_FILE);
        let summary = format!("Security info update for '{image}' based on Quay scanners");
        let mut boots = Vec::new();
        let mut wraps = Vec::new();

        for (tag, vulnerabilities) in scan.vulnerable() {
            let reference = quay.image_reference(image, tag);
            for vulnerability in vulnerabilities {
                let cve = vulnerability.name.as_str();
                let description = vulnerability
                    .description
                    .as_deref()
                    .unwrap_or(MISSING_DESCRIPTION);
                let key = PrescriptionKey::new(image).version(tag).tag(cve);

                boots.push(
                    Unit::boot(names.name("quay-security", &key)?)
                        .include("recommendation_types", json!(["security"]))
                        .base_image(&reference)
                        .stack_info(
                            Justification::error(format!(
                                "Found {cve} in the base image used: {description}"
                            ))
                            .maybe_link(vulnerability.link.as_deref()),
                        )
                        .run("not_acceptable", format!("The base image used has a CVE: {cve}"))
                        .provenance(self.services.provenance()),
                );
                wraps.push(
                    Unit::wrap(names.name("quay-security-warning", &key)?)
                        .include(
                            "recommendation_types",
                            json!(["latest", "performance", "stable", "testing"]),
                        )
                        .base_image(&reference)
                        .justification(
                            Justification::error(description)
                                .maybe_link(vulnerability.link.as_deref())
                                .field("cve_name", cve),
                        )
                        .provenance(self.services.provenance()),
                );
            }
        }

        if boots.is_empty() {
            return Ok(Prescription::retraction(
                path,
                format!("No vulnerabilities found in '{image}' by Quay scanners"),
            ));
        }
        let mut document = Prescription::new(path, summary);
        for unit in boots.into_iter().chain(wraps) {
            document.push(unit);
        }
        Ok(document)
    }

    fn alternatives_document(
        &self,
        names: &mut NameRegistry,
        image: &str,
        scan: &ImageScan,
    ) -> Result<Prescription> {
        let quay = &self.services.quay;
        let path = PrescriptionPath::container(image, ALTERNATIVES_FILE);
        let link = format!("https://{}/repository/{}/{image}", quay.host(), quay.namespace());
        let mut document = Prescription::new(
            path.clone(),
            format!("Computed vulnerability-free alternatives for '{image}'"),
        );

        for (vulnerable, _) in scan.vulnerable() {
            let reference = quay.image_reference(image, vulnerable);
            for clean in scan.clean() {
                let alternative = quay.image_reference(image, clean);
                info!(image, vulnerable, clean, "vulnerability-free alternative");
                let key = PrescriptionKey::new(image).version(format!("{vulnerable}-{clean}"));
                document.push(
                    Unit::wrap(names.name("quay-security-alternative", &key)?)
                        .base_image(&reference)
                        .justification(
                            Justification::info(format!(
                                "Consider using '{alternative}' as vulnerability-free alternative to '{reference}'"
                            ))
                            .link(link.as_str()),
                        )
                        .provenance(self.services.provenance()),
                );
            }
        }

        if document.is_retraction() {
            return Ok(Prescription::retraction(
                path,
                format!("No vulnerability-free alternatives for '{image}'"),
            ));
        }
        Ok(document)
    }

    fn timestamp_document(&self, names: &mut NameRegistry) -> Result<Prescription> {
        let quay = &self.services.quay;
        let namespace = quay.namespace();
        let datetime = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let unit = Unit::boot(names.name("quay-security-timestamp", &PrescriptionKey::new(namespace))?)
            .metadata(json!({ "datetime": datetime }))
            .include("runtime_environments", json!({ "base_images": { "not": [null] } }))
            .stack_info(
                Justification::info(format!(
                    "Using security information for predictable stacks based on Quay scanners for {}/organization/{namespace} as of '{datetime}'",
                    quay.host()
                ))
                .link("https://www.projectquay.io/"),
            );

        Ok(Prescription::new(
            PrescriptionPath::new("_containers", SECURITY_FILE),
            format!("Security scans from Quay have been updated for {namespace}"),
        )
        .with_unit(unit))
    }
}

#[async_trait]
impl Handler for QuaySecurity {
    fn kind(&self) -> HandlerKind {
        HandlerKind::QuaySecurity
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        let mut changed = false;

        for image in image_names(&self.services).await? {
            let scan = match self.scan(&image).await {
                Ok(scan) => scan,
                Err(e) => {
                    skip_item(self.kind(), &image, e)?;
                    continue;
                }
            };

            let documents = [
                self.security_document(names, &image, &scan)?,
                self.alternatives_document(names, &image, &scan)?,
            ];
            for document in documents {
                changed |= !self.services.repository.is_current(&document)?;
                sink.emit(document).await?;
            }
        }

        if changed {
            sink.emit(self.timestamp_document(names)?).await?;
        } else {
            debug!("no security document changed, keeping timestamp");
        }
        Ok(())
    }
}

/// Container image sizes as reported by the registry.
pub struct QuayImageSize {
    services: Arc<Services>,
}

impl QuayImageSize {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn document(&self, names: &mut NameRegistry, image: &str) -> Result<Option<Prescription>> {
        let quay = &self.services.quay;
        let mut document = Prescription::new(
            PrescriptionPath::container(image, IMAGE_SIZE_FILE),
            format!("Container image size info for '{image}'"),
        );

        for container in quay.images(image).await? {
            let size = quay.image_size(image, &container.id).await?;
            if size == 0 {
                error!(image, id = %container.id, "registry reported an empty image, skipping");
                continue;
            }

            for tag in container.version_tags() {
                let reference = quay.image_reference(image, tag);
                let key = PrescriptionKey::new(image).version(tag);
                document.push(
                    Unit::boot(names.name(self.kind().id(), &key)?)
                        .base_image(&reference)
                        .stack_info(
                            Justification::info(format!(
                                "Container image '{reference}' has a size of {}",
                                human_size(size)
                            ))
                            .link(format!("https://{reference}")),
                        )
                        .provenance(self.services.provenance()),
                );
            }
        }

        Ok((!document.is_retraction()).then_some(document))
    }
}

#[async_trait]
impl Handler for QuayImageSize {
    fn kind(&self) -> HandlerKind {
        HandlerKind::QuayImageSize
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        for image in image_names(&self.services).await? {
            match self.document(names, &image).await {
                Ok(Some(document)) => sink.emit(document).await?,
                Ok(None) => debug!(image = %image, "no sized images"),
                Err(e) => skip_item(self.kind(), &image, e)?,
            }
        }
        Ok(())
    }
}
