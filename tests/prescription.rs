// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use serde_json::json;

use prescriptions_refresh::domain::{
    Justification, MISSING_LINK, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath,
    Unit, dependency,
};
use prescriptions_refresh::error::Error;

fn archived(names: &mut NameRegistry) -> Unit {
    Unit::wrap(names.name("gh-archived", &PrescriptionKey::new("flask")).unwrap())
        .matching(dependency("flask", None, None))
        .justification(
            Justification::warning("Archived on GitHub")
                .link("https://github.com/pallets/flask")
                .field("package_name", "flask"),
        )
}

// ─── Rendering ───────────────────────────────────────────────────────────────

#[test]
fn wrap_renders_with_sorted_keys() {
    let mut names = NameRegistry::new();
    let document = Prescription::new(
        PrescriptionPath::new("flask", "gh_archived.yaml"),
        "flask is archived",
    )
    .with_unit(archived(&mut names));

    insta::assert_snapshot!(document.render().unwrap(), @r"
    units:
      wraps:
      - match:
          state:
            resolved_dependencies:
            - name: flask
        name: gh-archived.flask
        run:
          justification:
          - link: https://github.com/pallets/flask
            message: Archived on GitHub
            package_name: flask
            type: WARNING
        should_include:
          adviser_pipeline: true
        type: wrap
    ");
}

#[test]
fn boots_and_wraps_go_to_their_own_sections() {
    let mut names = NameRegistry::new();
    let boot = Unit::boot(
        names
            .name("quay-image-size", &PrescriptionKey::new("ps-nlp").version("v1"))
            .unwrap(),
    )
    .base_image("quay.io/thoth-station/ps-nlp:v1")
    .stack_info(Justification::info("Image size"));
    let document = Prescription::new(PrescriptionPath::container("ps-nlp", "x.yaml"), "mixed")
        .with_unit(boot)
        .with_unit(archived(&mut names));

    let value = document.to_value();
    assert_eq!(value["units"]["boots"][0]["type"], "boot");
    assert_eq!(value["units"]["wraps"][0]["type"], "wrap");
    assert_eq!(
        value["units"]["boots"][0]["should_include"]["runtime_environments"],
        json!({ "base_images": ["quay.io/thoth-station/ps-nlp:v1"] })
    );
    assert_eq!(
        value["units"]["boots"][0]["run"]["stack_info"][0]["link"],
        MISSING_LINK
    );
}

#[test]
fn rendering_is_stable() {
    let mut names = NameRegistry::new();
    let document = Prescription::new(PrescriptionPath::new("flask", "gh_archived.yaml"), "x")
        .with_unit(archived(&mut names));
    assert_eq!(document.render().unwrap(), document.render().unwrap());
}

#[test]
fn provenance_names_repository_and_version() {
    let mut names = NameRegistry::new();
    let unit = archived(&mut names).provenance("https://github.com/thoth-station/prescriptions");
    let document = Prescription::new(PrescriptionPath::new("flask", "gh_archived.yaml"), "x")
        .with_unit(unit);
    let metadata = &document.to_value()["units"]["wraps"][0]["metadata"][0];
    assert_eq!(
        metadata["prescriptions_repository"],
        "https://github.com/thoth-station/prescriptions"
    );
    assert_eq!(metadata["prescriptions_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn dependency_pins_version_and_index() {
    assert_eq!(
        dependency("flask", Some("2.0.0"), Some("https://pypi.org/simple")),
        json!({ "name": "flask", "version": "==2.0.0", "index_url": "https://pypi.org/simple" })
    );
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[test]
fn duplicate_unit_names_are_rejected() {
    let mut names = NameRegistry::new();
    let document = Prescription::new(PrescriptionPath::new("flask", "gh_archived.yaml"), "x")
        .with_unit(archived(&mut names))
        .with_unit(archived(&mut names));
    match document.render() {
        Err(Error::InvalidPrescription { path, reason }) => {
            assert_eq!(path, "prescriptions/fl_/flask/gh_archived.yaml");
            assert!(reason.contains("gh-archived.flask"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn blank_upstream_link_falls_back() {
    let justification = Justification::error("CVE").maybe_link(Some("  "));
    let mut names = NameRegistry::new();
    let unit = Unit::wrap(names.name("x", &PrescriptionKey::new("y")).unwrap())
        .justification(justification);
    let document = Prescription::new(PrescriptionPath::new("y", "x.yaml"), "x").with_unit(unit);
    assert_eq!(
        document.to_value()["units"]["wraps"][0]["run"]["justification"][0]["link"],
        MISSING_LINK
    );
}

#[test]
fn retraction_has_no_units() {
    let document = Prescription::retraction(PrescriptionPath::new("flask", "gh_forked.yaml"), "gone");
    assert!(document.is_retraction());
}
