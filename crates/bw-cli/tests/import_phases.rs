//! Integration tests for the import and phases upload paths.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn bw_binary() -> &'static str {
    env!("CARGO_BIN_EXE_bw")
}

fn write_config(temp: &TempDir) -> PathBuf {
    let db_path = temp.path().join("bw.db");
    let config_path = temp.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!("database_path = \"{}\"\n", db_path.display()),
    )
    .unwrap();
    config_path
}

fn bw(config: &Path, args: &[&str]) -> Output {
    Command::new(bw_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run bw")
}

fn bw_with_stdin(config: &Path, args: &[&str], input: &str) -> Output {
    let mut child = Command::new(bw_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn bw");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().expect("failed to wait for bw")
}

const POINTS: &str = r#"{"source":"participant.1","generator":"pdk-app-event","secondary_id":"blocked_app","observed_at":"2025-03-10T10:00:00Z","properties":{"event_details":{"app":"com.app.a"}}}
{"source":"participant.1","generator":"pdk-foreground-application","secondary_id":"com.app.a","observed_at":1741600860000,"properties":{"duration":4000.0,"screen_active":true}}
{"source":"participant.2","generator":"pdk-foreground-application","secondary_id":"com.app.a","observed_at":"2025-03-10T10:02:00Z","properties":{"duration":2000.0,"screen_active":false}}
"#;

#[test]
fn import_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let first = bw_with_stdin(&config, &["import"], POINTS);
    assert!(
        first.status.success(),
        "import failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(
        String::from_utf8_lossy(&first.stdout).contains("Imported 3 points (0 duplicates)")
    );

    let second = bw_with_stdin(&config, &["import"], POINTS);
    assert!(second.status.success());
    assert!(
        String::from_utf8_lossy(&second.stdout).contains("Imported 0 points (3 duplicates)")
    );
}

#[test]
fn import_rejects_malformed_lines() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let output = bw_with_stdin(&config, &["import"], "{\"source\":\"participant.1\"}\n");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 1"), "{stderr}");
}

#[test]
fn phases_upload_skips_unknown_participants() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    // participant.1 and participant.2 enroll through import
    let import = bw_with_stdin(&config, &["import"], POINTS);
    assert!(import.status.success());

    let tsv = temp.path().join("phases.tsv");
    std::fs::write(
        &tsv,
        "AppCode\tReceivesSubsidy\tBlockerType\tSnoozeDelay\tStartDate\tEndDate\tTreatmentActive\n\
         participant.1\t1\tfree_snooze\t120\t2025-03-01\t2025-03-31\t1\n\
         participant.2\t0\tnone\t0\t2025-03-01\t2025-03-31\t0\n\
         stranger.9\t0\tnone\t0\t2025-03-01\t2025-03-31\t0\n",
    )
    .unwrap();

    let output = bw(&config, &["phases", tsv.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "phases failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Loaded 2 phases (1 skipped)"), "{stdout}");
}

#[test]
fn phases_upload_rejects_malformed_rows() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let tsv = temp.path().join("phases.tsv");
    std::fs::write(
        &tsv,
        "AppCode\tReceivesSubsidy\tBlockerType\tSnoozeDelay\tStartDate\tEndDate\tTreatmentActive\n\
         participant.1\tmaybe\tfree_snooze\t120\t2025-03-01\t\t1\n",
    )
    .unwrap();

    let output = bw(&config, &["phases", tsv.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid phase row on line 2"), "{stderr}");
}

#[test]
fn status_shows_counts_and_active_sources() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    // fresh store first
    let empty = bw(&config, &["status"]);
    assert!(empty.status.success());
    let stdout = String::from_utf8_lossy(&empty.stdout);
    assert!(stdout.contains("Points: 0"), "{stdout}");
    assert!(stdout.contains("No sources active in the last 7 days."), "{stdout}");

    let import = bw_with_stdin(&config, &["import"], POINTS);
    assert!(import.status.success());

    let output = bw(&config, &["status"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Points: 3"), "{stdout}");
    assert!(stdout.contains("Participants: 2"), "{stdout}");
    // fixture telemetry is long past, so nothing is recently active
    assert!(stdout.contains("No sources active in the last 7 days."), "{stdout}");
}

#[test]
fn quality_requires_a_federated_assignment() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let output = bw(&config, &["quality", "--source", "participant.1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not assigned to a federated server"), "{stderr}");
}
