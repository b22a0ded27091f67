//! Smoke tests for the drydock binary surface.

use assert_cmd::Command;
use predicates::prelude::*;

fn drydock() -> Command {
    Command::cargo_bin("drydock").unwrap()
}

#[test]
fn resolve_offline_pattern_match() {
    drydock()
        .args([
            "resolve",
            "--offline",
            "--branch",
            "feature/pr-212",
            "--commit",
            "abc1234def",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("212 (pattern-match)"));
}

#[test]
fn resolve_change_id_wins() {
    drydock()
        .args([
            "resolve",
            "--offline",
            "--change-id",
            "77",
            "--branch",
            "feature/pr-212",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("77 (platform-change-id)"));
}

#[test]
fn resolve_hash_fallback_is_deterministic() {
    let expected = "my-custom-branch-abc1234 (hash-fallback)";
    for _ in 0..2 {
        drydock()
            .args([
                "resolve",
                "--offline",
                "--branch",
                "my-custom-branch",
                "--commit",
                "abc1234def",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }
}

#[test]
fn resolve_without_checkout_fails() {
    let dir = tempfile::tempdir().unwrap();
    drydock()
        .current_dir(dir.path())
        .args(["resolve", "--offline"])
        .assert()
        .failure();
}

#[test]
fn status_reports_missing_record() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("drydock.toml");
    std::fs::write(
        &config_path,
        format!("[store]\nroot = {:?}\n", dir.path().join("store")),
    )
    .unwrap();

    drydock()
        .args(["status", "--identifier", "999", "-c"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No config record published for 999"));
}

#[test]
fn dry_run_prints_plan_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    drydock()
        .current_dir(dir.path())
        .args([
            "run",
            "--dry-run",
            "--change-id",
            "31",
            "--commit",
            "abc1234",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("app-31"))
        .stdout(predicate::str::contains("not triggered"));

    // No store directory appeared.
    assert!(!dir.path().join(".drydock").exists());
}
