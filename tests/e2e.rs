//! End-to-end tests that run the picojit binary.

use std::process::Command;

fn run_picojit(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_picojit"))
        .args(args)
        .output()
        .expect("failed to execute picojit");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();

    (stdout, stderr, success)
}

#[test]
fn test_run_prints_sum() {
    let (stdout, stderr, success) = run_picojit(&["run"]);
    assert!(success, "run should succeed, stderr:\n{}", stderr);
    assert_eq!(stdout, "15\n");
}

#[test]
fn test_run_with_trace() {
    let (stdout, stderr, success) = run_picojit(&["run", "--trace-jit"]);
    assert!(success, "stderr:\n{}", stderr);
    assert_eq!(stdout, "15\n");
    assert!(stderr.contains("assembled"), "trace output expected:\n{}", stderr);
}

#[test]
fn test_run_rejects_zero_data_region() {
    let (_, stderr, success) = run_picojit(&["run", "--data-size", "0"]);
    assert!(!success, "zero-size data region should fail");
    assert!(stderr.contains("error"), "stderr:\n{}", stderr);
}

#[test]
fn test_run_aborts_on_code_region_overflow() {
    let (_, stderr, success) = run_picojit(&["run", "--code-size", "16"]);
    assert!(!success, "overflowing the code region should abort");
    assert!(stderr.contains("code buffer overflow"), "stderr:\n{}", stderr);
}

#[test]
fn test_dump_human_listing() {
    let (stdout, stderr, success) = run_picojit(&["dump"]);
    assert!(success, "stderr:\n{}", stderr);
    // the listing opens with the prologue: push rbp = 55
    assert!(stdout.starts_with("0000: 55"), "listing:\n{}", stdout);
}

#[test]
fn test_dump_json_listing() {
    let (stdout, stderr, success) = run_picojit(&["dump", "--format", "json"]);
    assert!(success, "stderr:\n{}", stderr);

    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let length = v["length"].as_u64().unwrap() as usize;
    let code = v["code"].as_str().unwrap();
    assert_eq!(code.len(), length * 2, "two hex digits per byte");
    assert!(code.starts_with("55"), "push rbp leads the program");
}

#[test]
fn test_dump_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("code.txt");

    let (stdout, stderr, success) =
        run_picojit(&["dump", "--output", path.to_str().unwrap()]);
    assert!(success, "stderr:\n{}", stderr);
    assert!(stdout.is_empty());

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("0000: 55"), "file listing:\n{}", text);
}
