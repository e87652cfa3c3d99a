//! Command-line behaviour of the db-backup binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn db_backup(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("db-backup").unwrap();
    cmd.env("DB_BACKUP_HOME", home.path())
        .env_remove("DB_BACKUP_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_list_with_empty_catalog() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found."));
}

#[test]
fn test_missing_explicit_config_is_a_configuration_error() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .args(["--config", "missing.json", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_backup_without_targets_is_a_configuration_error() {
    let home = TempDir::new().unwrap();
    db_backup(&home).arg("backup").assert().code(2);
}

#[test]
fn test_init_writes_template_once() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote template configuration"));
    assert!(home.path().join("config.json").exists());

    db_backup(&home)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_keystore_set_from_stdin_then_list() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .args(["keystore", "set", "db_password", "--stdin"])
        .write_stdin("s3cret\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 'db_password'"))
        .stdout(predicate::str::contains("s3cret").not());

    db_backup(&home)
        .args(["keystore", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("db_password"))
        .stdout(predicate::str::contains("s3cret").not());
}

#[test]
fn test_show_unknown_backup_fails() {
    let home = TempDir::new().unwrap();
    db_backup(&home)
        .args(["show", "app-20240101T000000Z-0123456789abcdef"])
        .assert()
        .failure();
}
