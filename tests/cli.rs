//! Tests of the `aeta` binary.

use std::path::Path;
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use aeta::config::Config;
use aeta::sample::{SAMPLE_PACKAGE, sample_catalog};

fn aeta(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("aeta").unwrap();
    cmd.arg("-c").arg(config);
    cmd
}

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("aeta.toml");

    aeta(&config)
        .args(["init", "--mode", "immediate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains(SAMPLE_PACKAGE));
    assert!(written.contains("immediate"));

    aeta(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Storage mode: immediate"));

    aeta(&config).arg("init").assert().failure();
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("aeta.toml");
    std::fs::write(&config, "[server]\nworkers = 0\n").unwrap();

    aeta(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("server.workers"));
}

#[test]
fn test_serve_rejects_packages_outside_the_catalog() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("aeta.toml");
    std::fs::write(
        &config,
        "[tests]\npackage_names = [\"myapp.tests\"]\n[server]\nlisten = \"127.0.0.1:0\"\n",
    )
    .unwrap();

    aeta(&config)
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("myapp.tests"))
        .stderr(predicate::str::contains("only sample_package can be served"));
}

#[test]
fn test_run_exit_codes() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut server_config = Config::default();
    server_config.tests.package_names = vec![SAMPLE_PACKAGE.to_string()];
    server_config.server.listen = "127.0.0.1:0".to_string();
    let server = runtime
        .block_on(aeta::rest::start(&server_config, Arc::new(sample_catalog())))
        .unwrap();
    let url = server.base_url();

    let dir = TempDir::new().unwrap();
    let config = dir.path().join("client.toml");
    std::fs::write(&config, "[client]\npoll_interval_ms = 20\n").unwrap();

    aeta(&config)
        .args(["run", &url, "sample_package.test_one_testcase"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "sample_package.test_one_testcase.SimpleTestCase.test_pass ... ok",
        ))
        .stdout(predicate::str::contains("Some tests failed."));

    let junit = dir.path().join("out/junit.xml");
    aeta(&config)
        .args([
            "run",
            &url,
            "sample_package.test_one_testcase.SimpleTestCase.test_pass",
            "--show-output",
            "--junit",
        ])
        .arg(&junit)
        .assert()
        .success()
        .stdout(predicate::str::contains("test_pass ran"))
        .stdout(predicate::str::contains("All tests passed!"));
    assert!(std::fs::read_to_string(&junit).unwrap().contains("<testsuites"));

    aeta(&config)
        .args(["run", &url, "sample_package.test_goodmodule"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No tests with the prefix"));

    aeta(&config)
        .args(["run", &url, "sample_package.nothing_here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No data for"));

    runtime.block_on(server.shutdown()).unwrap();
}
