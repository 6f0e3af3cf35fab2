use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn keyctl(dir: &Path) -> Command {
    let cfg = dir.join("config.toml");
    if !cfg.exists() {
        fs::write(&cfg, "log_level = \"warn\"\n").unwrap();
    }
    let mut cmd = Command::cargo_bin("keyctl").unwrap();
    cmd.arg("--config").arg(&cfg).arg("--data-dir").arg(dir.join("keys"));
    cmd
}

#[test]
fn lists_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    keyctl(dir.path())
        .args(["keys", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn imports_and_lists_keys() {
    let dir = tempfile::tempdir().unwrap();
    let block = dir.path().join("a.key");
    fs::write(&block, "a.com\nPRODUCT:CX13\nSERIAL:SN-1\nEXPIRATION:20250601\nSIGNATURE:abc\n").unwrap();

    keyctl(dir.path()).args(["keys", "import"]).arg(&block).assert().success().stdout("1\n");
    keyctl(dir.path()).args(["keys", "add", "b.com"]).assert().success().stdout("2\n");

    keyctl(dir.path())
        .args(["keys", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"a.com\"").and(predicate::str::contains("2025-06-01")))
        .stdout(predicate::str::contains("\"b.com\""));

    keyctl(dir.path())
        .args(["keys", "show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("a.com\nPRODUCT:CX13"));

    keyctl(dir.path()).args(["keys", "remove", "2"]).assert().success();
    keyctl(dir.path()).args(["keys", "remove", "2"]).assert().failure();
}

#[test]
fn parse_rejects_malformed_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let block = dir.path().join("bad.key");
    fs::write(&block, "a.com\nPRODUCT:CX13\nSERIAL:SN-1\nEXPIRATION:20251301\n").unwrap();

    keyctl(dir.path())
        .arg("parse")
        .arg(&block)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed key block"));
}

#[test]
fn encodes_with_the_configured_key() {
    let dir = tempfile::tempdir().unwrap();
    keyctl(dir.path())
        .args(["encode", "--serial", "SN-1", "--domain", "a.com", "--user", "ops"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[A-Za-z0-9+/]{342}==\n$").unwrap());
}

#[test]
fn partial_parameters_fail_without_calling_the_service() {
    let dir = tempfile::tempdir().unwrap();
    keyctl(dir.path()).args(["keys", "add", "a.com"]).assert().success();
    keyctl(dir.path())
        .args(["run", "ops", "SN-1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid invocation parameters"));
}
