use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const IDOR_ARGS: &[&str] = &[
    "idor",
    "-u", "http://app.test/",
    "-l", "http://app.test/login",
    "-o", "http://app.test/logout",
    "-a", "alice", "-p", "alice-pw",
    "-b", "bob", "-q", "bob-pw",
    "-t", "Alice's Profile",
];

/// Injection target without scheme gets http:// and dry-run exits 0.
#[test]
fn test_inject_dry_run_prefixes_scheme() {
    cargo_bin_cmd!("dualprobe")
        .args(&["inject", "-u", "www.example.com", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] Would probe target: http://www.example.com/ (mode: inject)",
        ))
        .stdout(predicate::str::contains("\"maxDepth\": 3"));
}

/// IDOR dry-run shows the config and never prints passwords.
#[test]
fn test_idor_dry_run() {
    let mut args = IDOR_ARGS.to_vec();
    args.extend(["-m", "5", "--dry-run"]);
    cargo_bin_cmd!("dualprobe")
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("(mode: idor)"))
        .stdout(predicate::str::contains("\"maxDepth\": 5"))
        .stdout(predicate::str::contains("alice-pw").not());
}

/// Injection options end up in the resolved configuration.
#[test]
fn test_inject_dry_run_options() {
    let mut payloads = NamedTempFile::new().unwrap();
    writeln!(payloads, "time:' OR SLEEP(10) --").unwrap();

    let path = payloads.path().to_str().unwrap().to_string();
    cargo_bin_cmd!("dualprobe")
        .args(&[
            "inject", "-u", "http://shop.test", "--payloads", &path,
            "--time-threshold", "8", "--deadline", "60", "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"timeThresholdSecs\": 8.0"))
        .stdout(predicate::str::contains("\"deadlineSecs\": 60"));
}

/// Running with no arguments should fail (clap requires a mode).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("dualprobe")
        .assert()
        .failure();
}

/// IDOR mode requires the identity pattern.
#[test]
fn test_idor_without_pattern_fails() {
    let args: Vec<&str> = IDOR_ARGS[..IDOR_ARGS.len() - 2].to_vec();
    cargo_bin_cmd!("dualprobe")
        .args(&args)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--pattern"));
}

/// Login flags in injection mode go together.
#[test]
fn test_inject_partial_login_fails() {
    cargo_bin_cmd!("dualprobe")
        .args(&["inject", "-u", "shop.test", "--username", "u", "--dry-run"])
        .assert()
        .code(2);
}

/// An unreachable login page is a failed initial login: exit code 1.
#[test]
fn test_failed_login_exits_with_one() {
    let log = NamedTempFile::new().unwrap();
    let log_path = log.path().to_str().unwrap().to_string();
    cargo_bin_cmd!("dualprobe")
        .args(&[
            "inject", "-u", "http://127.0.0.1:9/",
            "--login-url", "http://127.0.0.1:9/login",
            "--username", "u", "--password", "p",
            "--timeout", "2", "--log-file", &log_path,
        ])
        .assert()
        .code(1);

    let written = std::fs::read_to_string(&log_path).unwrap();
    assert!(written.contains(" - INFO - Logging in as u"));
    assert!(written.contains(" - ERROR - "));
}
