//! Integration tests for the `tapdeck` demo binary.
//!
//! The binary runs entirely against the simulated reader service, so
//! full payment flows execute quickly and deterministically.
#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn tapdeck_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tapdeck").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = tapdeck_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "expected exit code 2");
    let text = String::from_utf8_lossy(&output.stderr);
    assert!(text.contains("Usage"), "expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    tapdeck_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("payment")
            .and(predicate::str::contains("connect"))
            .and(predicate::str::contains("pay")),
    );
}

#[test]
fn test_version_flag() {
    tapdeck_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tapdeck"));
}

// ── Demo flows ──────────────────────────────────────────────────────

#[test]
fn test_connect_single_reader() {
    tapdeck_cmd()
        .args(["connect"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Connected to SIM-001"));
}

#[test]
fn test_connect_several_readers_auto_selects() {
    tapdeck_cmd()
        .args(["connect", "--readers", "3"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("several readers found")
                .and(predicate::str::contains("Connected to SIM-001")),
        );
}

#[test]
fn test_pay_happy_path() {
    tapdeck_cmd()
        .args(["pay", "--total", "12.50"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("validating order")
                .and(predicate::str::contains("Payment captured: 12.50 usd")),
        );
}

#[test]
fn test_pay_built_in_reader() {
    tapdeck_cmd()
        .args(["pay", "--method", "built-in"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Payment captured"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_pay_zero_total_fails() {
    tapdeck_cmd()
        .args(["pay", "--total", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn test_pay_unparseable_total_is_a_usage_error() {
    tapdeck_cmd()
        .args(["pay", "--total", "not-a-number"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
