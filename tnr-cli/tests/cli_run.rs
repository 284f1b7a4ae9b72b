use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const W: u32 = 8;
const H: u32 = 4;
const FRAME_BYTES: usize = (W * H * 3) as usize;

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("tnr_cli_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_raw_frames(path: &Path, values: &[u8]) {
    let mut bytes = Vec::new();
    for &v in values {
        bytes.extend(std::iter::repeat_n(v, FRAME_BYTES));
    }
    fs::write(path, bytes).expect("write raw frames");
}

fn tnr() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tnr"));
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_describes_arguments() {
    let output = tnr().arg("--help").output().expect("run tnr --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cuda"), "help: {stdout}");
    assert!(stdout.contains("--preset"), "help: {stdout}");
}

#[test]
fn missing_arguments_exit_one() {
    let output = tnr().output().expect("run tnr");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = unique_temp_dir("backend");
    let input = dir.join("in.bgr");
    write_raw_frames(&input, &[0]);

    let output = tnr()
        .args(["ofa", input.to_str().unwrap()])
        .arg("--output-dir")
        .arg(dir.join("out"))
        .output()
        .expect("run tnr");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ConfigurationError"), "stderr: {stderr}");
    assert!(stderr.contains("'ofa'"), "stderr: {stderr}");
    assert!(!dir.join("out").exists(), "no output before backend selection");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn raw_input_round_trip_with_json_summary() {
    let dir = unique_temp_dir("raw");
    let input = dir.join("in.bgr");
    write_raw_frames(&input, &[0, 100, 200, 30]);

    let output = tnr()
        .args(["cuda", input.to_str().unwrap()])
        .args(["--width", "8", "--height", "4", "--json"])
        .arg("--output-dir")
        .arg(&dir)
        .output()
        .expect("run tnr");

    assert!(
        output.status.success(),
        "tnr failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout is one JSON line");
    assert_eq!(summary["ok"], true);
    assert_eq!(summary["backend"], "cuda");
    assert_eq!(summary["frames_emitted"], 4);
    assert_eq!(summary["preset"], "indoor-medium-light");

    let artifact = dir.join("denoised_cuda.bgr");
    assert_eq!(
        fs::metadata(&artifact).expect("artifact").len(),
        4 * FRAME_BYTES as u64
    );

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn empty_input_succeeds_with_zero_frames() {
    let dir = unique_temp_dir("empty");
    let input = dir.join("in.raw");
    write_raw_frames(&input, &[]);

    let output = tnr()
        .args(["vic", input.to_str().unwrap(), "--width", "8", "--height", "4"])
        .arg("--output-dir")
        .arg(&dir)
        .output()
        .expect("run tnr");

    assert!(output.status.success());
    assert_eq!(fs::metadata(dir.join("denoised_vic.bgr")).unwrap().len(), 0);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn config_file_supplies_geometry_and_preset() {
    let dir = unique_temp_dir("config");
    let input = dir.join("in.bgr");
    write_raw_frames(&input, &[10, 20]);
    let config = dir.join("run.json");
    fs::write(
        &config,
        r#"{ "preset": "outdoor-high-light", "strength": 0.5, "width": 8, "height": 4 }"#,
    )
    .unwrap();

    let output = tnr()
        .args(["vic", input.to_str().unwrap(), "--json"])
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&dir)
        .output()
        .expect("run tnr");

    assert!(
        output.status.success(),
        "tnr failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&output.stdout).trim()).unwrap();
    assert_eq!(summary["preset"], "outdoor-high-light");
    assert_eq!(summary["strength"], 0.5);
    assert_eq!(summary["frames_emitted"], 2);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn missing_input_exits_one() {
    let dir = unique_temp_dir("missing");
    let output = tnr()
        .args(["cuda"])
        .arg(dir.join("nope.bgr"))
        .arg("--output-dir")
        .arg(&dir)
        .output()
        .expect("run tnr");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ConfigurationError"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn out_of_range_strength_exits_one() {
    let dir = unique_temp_dir("strength");
    let input = dir.join("in.bgr");
    write_raw_frames(&input, &[0]);

    let output = tnr()
        .args(["cuda", input.to_str().unwrap(), "--strength", "1.5", "--json"])
        .args(["--width", "8", "--height", "4"])
        .output()
        .expect("run tnr");

    assert_eq!(output.status.code(), Some(1));
    let err: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&output.stdout).trim()).unwrap();
    assert_eq!(err["ok"], false);
    assert_eq!(err["kind"], "ConfigurationError");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn odd_geometry_is_an_accelerator_error() {
    let dir = unique_temp_dir("odd");
    let input = dir.join("in.bgr");
    fs::write(&input, vec![0u8; 7 * 4 * 3]).unwrap();

    let output = tnr()
        .args(["cuda", input.to_str().unwrap(), "--width", "7", "--height", "4"])
        .arg("--output-dir")
        .arg(&dir)
        .output()
        .expect("run tnr");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("AcceleratorError"));

    let _ = fs::remove_dir_all(dir);
}
