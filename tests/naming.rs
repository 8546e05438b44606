// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use proptest::prelude::*;

use prescriptions_refresh::domain::{
    NameRegistry, PrescriptionKey, normalize_package, normalize_tag, normalize_version,
};
use prescriptions_refresh::error::Error;

// ─── Normalization ───────────────────────────────────────────────────────────

#[test]
fn package_names_are_pep503_normalized() {
    assert_eq!(normalize_package("Flask_SQLAlchemy"), "flask-sqlalchemy");
    assert_eq!(normalize_package("zope.interface"), "zope-interface");
    assert_eq!(normalize_package("--weird__name--"), "weird-name");
}

#[test]
fn versions_keep_dots_and_replace_delimiters() {
    assert_eq!(normalize_version("1.0.0rc1"), "1.0.0rc1");
    assert_eq!(normalize_version("v2.3/ubi8"), "v2.3_ubi8");
    assert_eq!(normalize_version("1.0+local"), "1.0_local");
}

#[test]
fn tags_keep_alphanumerics_only() {
    assert_eq!(normalize_tag("CVE-2021-3177"), "cve20213177");
    assert_eq!(normalize_tag("sha256:abc"), "sha256abc");
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[test]
fn name_shape_is_prefix_dot_package_version_tag() {
    let mut names = NameRegistry::new();
    let key = PrescriptionKey::new("ps-tensorflow")
        .version("v0.1.0")
        .tag("CVE-2021-3177");
    let name = names.name("quay-security", &key).unwrap();
    assert_eq!(name.as_str(), "quay-security.ps-tensorflow-v0.1.0-cve20213177");
}

#[test]
fn tag_distinguishes_otherwise_equal_keys() {
    let mut names = NameRegistry::new();
    let plain = PrescriptionKey::new("foo").version("1.0").ecosystem("pypi");
    let tagged = plain.clone().tag("sha256:abc");

    for _ in 0..2 {
        assert_eq!(names.name("", &plain).unwrap().as_str(), "foo-1.0");
        assert_eq!(names.name("", &tagged).unwrap().as_str(), "foo-1.0-sha256abc");
    }
}

#[test]
fn same_key_gets_the_same_name() {
    let mut names = NameRegistry::new();
    let key = PrescriptionKey::new("flask");
    let first = names.name("gh-archived", &key).unwrap();
    let second = names.name("gh-archived", &key).unwrap();
    assert_eq!(first, second);
    assert_eq!(names.len(), 1);
}

#[test]
fn non_default_index_url_is_part_of_the_name() {
    let mut names = NameRegistry::new();
    let pypi = PrescriptionKey::new("Foo_Bar").index_url("https://pypi.org/simple");
    let mirror = PrescriptionKey::new("foo-bar").index_url("https://mirror.example/simple");

    let first = names.name("pypi-release", &pypi).unwrap();
    let second = names.name("pypi-release", &mirror).unwrap();
    assert_eq!(first.as_str(), "pypi-release.foo-bar");
    assert_eq!(second.as_str(), "pypi-release.foo-bar-mirror-example-simple");
}

#[test]
fn names_do_not_depend_on_request_order() {
    let pypi = PrescriptionKey::new("foo").index_url("https://pypi.org/simple");
    let mirror = PrescriptionKey::new("foo").index_url("https://mirror.example/simple");
    let conda = PrescriptionKey::new("foo").ecosystem("conda");

    let mut names = NameRegistry::new();
    let forward: Vec<String> = [&pypi, &mirror, &conda]
        .into_iter()
        .map(|key| names.name("pypi-maintainers", key).unwrap().to_string())
        .collect();

    let mut names = NameRegistry::new();
    let mut backward: Vec<String> = [&conda, &mirror, &pypi]
        .into_iter()
        .map(|key| names.name("pypi-maintainers", key).unwrap().to_string())
        .collect();
    backward.reverse();

    assert_eq!(forward, backward);
    assert_eq!(
        forward,
        vec![
            "pypi-maintainers.foo",
            "pypi-maintainers.foo-mirror-example-simple",
            "pypi-maintainers.foo-conda",
        ]
    );
}

#[test]
fn prefix_does_not_run_into_the_package() {
    let mut names = NameRegistry::new();
    let joined = names
        .name("pypi-maintainers", &PrescriptionKey::new("joined-foo"))
        .unwrap();
    let prefixed = names
        .name("pypi-maintainers-joined", &PrescriptionKey::new("foo"))
        .unwrap();
    assert_eq!(joined.as_str(), "pypi-maintainers.joined-foo");
    assert_eq!(prefixed.as_str(), "pypi-maintainers-joined.foo");
}

#[test]
fn equal_names_for_different_keys_are_a_collision() {
    for (first, second) in [("Foo_Bar", "foo-bar"), ("foo-bar", "Foo_Bar")] {
        let mut names = NameRegistry::new();
        names
            .name("gh-link", &PrescriptionKey::new(first))
            .unwrap();
        let err = names
            .name("gh-link", &PrescriptionKey::new(second))
            .unwrap_err();
        assert!(matches!(err, Error::NameCollision { ref name, .. } if name == "gh-link.foo-bar"));
    }
}

// ─── Property tests ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn names_are_lowercase_identifiers(
        package in "[A-Za-z][A-Za-z0-9._-]{0,30}",
        version in proptest::option::of("[0-9]{1,3}(\\.[0-9]{1,3}){0,3}"),
    ) {
        let mut names = NameRegistry::new();
        let mut key = PrescriptionKey::new(package);
        if let Some(version) = version {
            key = key.version(version);
        }
        let name = names.name("pypi-artifact-size", &key).unwrap();
        prop_assert!(name.as_str().starts_with("pypi-artifact-size."));
        prop_assert!(name
            .as_str()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' || c == '_'));
    }

    #[test]
    fn distinct_index_urls_never_collide(
        package in "[a-z]{1,12}",
        host_a in "[a-z]{1,8}",
        host_b in "[a-z]{1,8}",
    ) {
        prop_assume!(host_a != host_b);
        let mut names = NameRegistry::new();
        let a = names
            .name("pypi-maintainers", &PrescriptionKey::new(package.as_str()).index_url(format!("https://{host_a}.org/simple")))
            .unwrap();
        let b = names
            .name("pypi-maintainers", &PrescriptionKey::new(package.as_str()).index_url(format!("https://{host_b}.org/simple")))
            .unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn name_is_a_function_of_prefix_and_key(
        package in "[A-Za-z][A-Za-z0-9._-]{0,20}",
        version in proptest::option::of("[0-9]{1,3}(\\.[0-9]{1,3}){0,2}"),
        index in proptest::option::of("[a-z]{1,8}"),
        filler in proptest::collection::vec("[a-z]{1,6}", 0..4),
    ) {
        let mut key = PrescriptionKey::new(package);
        if let Some(version) = version {
            key = key.version(version);
        }
        if let Some(index) = index {
            key = key.index_url(format!("https://{index}.example/simple"));
        }

        let alone = NameRegistry::new().name("gh-link", &key).unwrap();
        let mut busy = NameRegistry::new();
        for other in &filler {
            let _ = busy.name("gh-link", &PrescriptionKey::new(format!("0{other}")));
        }
        prop_assert_eq!(busy.name("gh-link", &key).unwrap(), alone);
    }

    #[test]
    fn normalization_never_panics(input in any::<String>()) {
        let _ = normalize_package(&input);
        let _ = normalize_version(&input);
        let _ = normalize_tag(&input);
    }
}
