//! Smoke tests -- verify the binary runs and the storage commands work.

use assert_cmd::Command;

fn testops() -> Command {
    let mut cmd = Command::cargo_bin("testops").unwrap();
    cmd.env_remove("TESTOPS_CONFIG").env("RUST_LOG", "warn");
    cmd
}

/// Config file pointing the database into a temp dir.
fn config_in(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db = dir.path().join("testops.db");
    let path = dir.path().join("testops.toml");
    std::fs::write(
        &path,
        format!(
            "[storage]\npath = \"{}\"\n\n[simulation]\napi_delay_ms = 10\n",
            db.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    testops()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Test execution telemetry"));
}

#[test]
fn test_cli_version() {
    testops()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("testops"));
}

#[test]
fn test_serve_subcommand_exists() {
    testops().args(["serve", "--help"]).assert().success();
}

#[test]
fn test_run_subcommands_exist() {
    for kind in ["api", "ui", "jmeter"] {
        testops().args(["run", kind, "--help"]).assert().success();
    }
}

#[test]
fn test_executions_list_on_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(&dir);
    testops()
        .arg("--config")
        .arg(&cfg)
        .args(["executions", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No executions stored."));
}

#[test]
fn test_run_then_report_json() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(&dir);

    testops()
        .arg("--config")
        .arg(&cfg)
        .args(["run", "api", "--id", "login", "--name", "Login", "--url", "/login"])
        .assert()
        .success()
        .stdout(predicates::str::contains("api_login_"));

    testops()
        .arg("--config")
        .arg(&cfg)
        .args(["report", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"total\": 1"));

    testops()
        .arg("--config")
        .arg(&cfg)
        .args(["executions", "clear"])
        .assert()
        .success();

    testops()
        .arg("--config")
        .arg(&cfg)
        .args(["executions", "list", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("[]"));
}

#[test]
fn test_report_prints_trend() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(&dir);
    testops()
        .arg("--config")
        .arg(&cfg)
        .arg("report")
        .assert()
        .success()
        .stdout(predicates::str::contains("Pass-rate trend"));
}

#[test]
fn test_missing_explicit_config_fails() {
    testops()
        .args(["--config", "/nonexistent/testops.toml", "report"])
        .assert()
        .failure();
}
