//! The `cardtpl` binary end to end.

use assert_cmd::Command;
use cardtpl_cli::test_utils::{read_json, write_file};
use predicates::prelude::*;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

const DASHBOARD: &str = r#"
title: Home
templates:
  t1:
    type: button
    name: "{{ context.n }}"
views:
  - title: Main
    cards:
      - type: placeholder
        ref: t1
        context: { n: World }
"#;

const BROKEN_CARD: &str = r#"
views:
  - cards:
      - { ref: nowhere }
"#;

const CYCLE: &str = r#"
templates:
  a: { type: stack, cards: [{ ref: b }] }
  b: { type: stack, cards: [{ ref: a }] }
views: []
"#;

/// `cardtpl` isolated from the user's home directory and environment.
fn cardtpl(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cardtpl").unwrap();
    cmd.env("HOME", home)
        .env("LOCALAPPDATA", home)
        .env_remove("CARDTPL_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_resolve_prints_yaml() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "d.yaml", DASHBOARD);

    cardtpl(temp.path())
        .arg("resolve")
        .arg(&dashboard)
        .assert()
        .success()
        .stdout(predicate::str::contains("name: World"))
        .stdout(predicate::str::contains("type: button"))
        .stdout(predicate::str::contains("placeholder").not());
}

#[test]
fn test_resolve_writes_json_output() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "d.yaml", DASHBOARD);
    let output = temp.path().join("resolved.json");

    cardtpl(temp.path())
        .args(["resolve", "--format", "json", "-o"])
        .arg(&output)
        .arg(&dashboard)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let resolved = read_json(&output);
    assert_eq!(resolved["title"], json!("Home"));
    assert_eq!(
        resolved["views"][0]["cards"][0],
        json!({"ref": "t1", "context": {"n": "World"}, "type": "button", "name": "World"})
    );
}

#[test]
fn test_resolve_writes_view_files() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "d.yaml", DASHBOARD);
    let views = temp.path().join("views");

    cardtpl(temp.path())
        .arg("resolve")
        .arg(&dashboard)
        .arg("--views-dir")
        .arg(&views)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("1 written"));

    assert_eq!(read_json(&views.join("main.json"))["cards"][0]["name"], json!("World"));

    cardtpl(temp.path())
        .arg("resolve")
        .arg(&dashboard)
        .arg("--views-dir")
        .arg(&views)
        .assert()
        .success()
        .stderr(predicate::str::contains("1 unchanged"));
}

#[test]
fn test_resolve_strict_fails_on_broken_cards() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "broken.yaml", BROKEN_CARD);

    // Without --strict the annotated tree is still produced.
    cardtpl(temp.path())
        .args(["resolve", "--format", "json"])
        .arg(&dashboard)
        .assert()
        .success()
        .stdout(predicate::str::contains("Template 'nowhere' failed"));

    cardtpl(temp.path())
        .args(["resolve", "--strict"])
        .arg(&dashboard)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("1 problem(s) found"))
        .stderr(predicate::str::contains("cardtpl validate"));
}

#[test]
fn test_validate_reports_per_dashboard() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "dashboards/good.yaml", DASHBOARD);
    write_file(temp.path(), "dashboards/broken.yaml", BROKEN_CARD);

    cardtpl(temp.path())
        .arg("validate")
        .arg(temp.path().join("dashboards"))
        .assert()
        .success()
        .stdout(predicate::str::contains("good.yaml"))
        .stdout(predicate::str::contains("views[0].cards[0]"))
        .stdout(predicate::str::contains("2 dashboard(s) valid"));

    cardtpl(temp.path())
        .args(["validate", "--strict"])
        .arg(temp.path().join("dashboards"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 problem(s) found"));
}

#[test]
fn test_validate_rejects_template_cycles() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "cycle.yaml", CYCLE);

    cardtpl(temp.path())
        .arg("validate")
        .arg(&dashboard)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Circular template reference"))
        .stderr(predicate::str::contains("2 problem(s) found"));
}

#[test]
fn test_missing_dashboard() {
    let temp = TempDir::new().unwrap();

    cardtpl(temp.path())
        .arg("resolve")
        .arg(temp.path().join("nope.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dashboard not found"))
        .stderr(predicate::str::contains("suggestion"));
}

#[test]
fn test_unparsable_dashboard() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "bad.yaml", "views: [\n");

    cardtpl(temp.path())
        .arg("resolve")
        .arg(&dashboard)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse dashboard"));
}

#[test]
fn test_config_file_is_honored() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(
        temp.path(),
        "deep.yaml",
        r#"
templates:
  inner: { type: button }
  outer: { type: stack, cards: [{ ref: inner }] }
views:
  - cards: [{ ref: outer }]
"#,
    );
    let config = write_file(temp.path(), "config.toml", "max_depth = 1\n");

    cardtpl(temp.path())
        .arg("--config")
        .arg(&config)
        .args(["validate", "--strict"])
        .arg(&dashboard)
        .assert()
        .failure()
        .stdout(predicate::str::contains("maximum depth of 1"));
}

#[test]
fn test_invalid_config_file() {
    let temp = TempDir::new().unwrap();
    let dashboard = write_file(temp.path(), "d.yaml", DASHBOARD);
    let config = write_file(temp.path(), "config.toml", "max_depth = \"deep\"\n");

    cardtpl(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .arg(&dashboard)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}
