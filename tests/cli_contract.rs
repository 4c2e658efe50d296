use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn run_glitchgrid(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_glitchgrid"))
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("glitchgrid command should run")
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout should be json ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn grid_json_reports_derived_dimensions() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(dir.path(), &["grid", "--viewport", "1200x600", "--json"]);
    assert!(output.status.success(), "{output:?}");

    let value = stdout_json(&output);
    assert_eq!(value["columns"], 100);
    assert_eq!(value["rows"], 50);
    assert_eq!(value["cells"], 5000);
}

#[test]
fn grid_with_fixed_aspect_uses_requested_columns() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(
        dir.path(),
        &[
            "grid",
            "--viewport",
            "1920x1080",
            "--columns",
            "180",
            "--aspect",
            "16:9",
            "--json",
        ],
    );
    assert!(output.status.success(), "{output:?}");
    let value = stdout_json(&output);
    assert_eq!(value["columns"], 180);
    assert_eq!(value["rows"], 101);
}

#[test]
fn bad_viewport_is_a_coded_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(dir.path(), &["grid", "--viewport", "0x600", "--json"]);
    assert_eq!(output.status.code(), Some(2));

    let value = stdout_json(&output);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "INVALID_VIEWPORT");
    assert_eq!(value["error"]["kind"], "usage");
}

#[test]
fn unknown_source_is_rejected_before_rendering() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(
        dir.path(),
        &["render", "--source", "library:plasma", "--json"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["code"], "INVALID_SOURCE");
}

#[test]
fn render_writes_frames_and_sidecar() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(
        dir.path(),
        &[
            "render",
            "--source",
            "library:ocean",
            "--viewport",
            "480x270",
            "--seed",
            "9",
            "--frames-dir",
            "frames",
            "--sidecar",
            "out/run.json",
        ],
    );
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[glitchgrid] sequence hash 0x"), "{stdout}");

    let sidecar: Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("out/run.json")).expect("sidecar should exist"),
    )
    .expect("sidecar should be json");
    assert_eq!(sidecar["columns"], 40);
    assert_eq!(sidecar["rows"], 22);
    assert_eq!(sidecar["frames"], 213);
    assert_eq!(sidecar["cycle_ended_at"], 212);
    assert_eq!(sidecar["dropped"], 0);

    let first = fs::read_to_string(dir.path().join("frames/frame_00000.txt"))
        .expect("first frame should exist");
    assert_eq!(first.lines().count(), 22);
    assert!(first.lines().all(|line| line.len() == 40));
    let last = fs::read_to_string(dir.path().join("frames/frame_00212.txt"))
        .expect("last frame should exist");
    assert!(last.chars().all(|ch| ch == ' ' || ch == '\n'));
}

#[test]
fn expect_hash_round_trips_and_rejects_mismatch() {
    let dir = tempdir().expect("tempdir should create");
    let base = [
        "render",
        "--source",
        "library:gradient",
        "--viewport",
        "320x180",
        "--seed",
        "4",
        "--max-ticks",
        "40",
        "--json",
    ];

    let first = run_glitchgrid(dir.path(), &base);
    assert!(first.status.success(), "{first:?}");
    let hash = stdout_json(&first)["sequence_hash"]
        .as_str()
        .expect("hash string")
        .to_owned();

    let mut matching = base.to_vec();
    matching.extend(["--expect-hash", hash.as_str()]);
    assert!(run_glitchgrid(dir.path(), &matching).status.success());

    let mut mismatched = base.to_vec();
    mismatched.extend(["--expect-hash", "0x1"]);
    let output = run_glitchgrid(dir.path(), &mismatched);
    assert_eq!(output.status.code(), Some(1));

    let value = stdout_json(&output);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "SEQUENCE_HASH_MISMATCH");
    assert_eq!(value["error"]["kind"], "verification");
    assert_eq!(value["error"]["details"]["expected"], "0x0000000000000001");
    assert_eq!(value["error"]["details"]["actual"], hash.as_str());
}

#[test]
fn video_output_requires_a_font() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_glitchgrid(
        dir.path(),
        &[
            "render",
            "--source",
            "library:bars",
            "--output",
            "glitch.mp4",
            "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["code"], "INVALID_CONFIG");
    assert!(!dir.path().join("glitch.mp4").exists());
}
