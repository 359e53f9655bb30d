//! CLI Integration Tests for dlbridge
//!
//! Runs the `dlb` binary end to end.

use std::process::{Command, Output};

use dlbridge::Abi;

fn dlb(args: &[&str]) -> Output {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    Command::new(env!("CARGO_BIN_EXE_dlb"))
        .args(args)
        // Keep any dlbridge.toml in the checkout out of the picture
        .current_dir(dir.path())
        .env_remove("DLBRIDGE_LOG")
        .output()
        .expect("Failed to run dlb")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_plan_for_foreign_abi() {
    let output = dlb(&["plan", "--abi", "win64", "double f(int, double, long, float, ptr)"]);
    assert!(
        output.status.success(),
        "plan failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let text = stdout(&output);
    assert!(text.contains("win64"));
    assert!(text.contains("rcx"));
    assert!(text.contains("xmm1"));
    assert!(text.contains("[sp+32]"));
}

#[test]
fn test_plan_json() {
    let output = dlb(&["plan", "--abi", "aapcs64", "--json", "bool f(i32, f64)"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["abi"], "aapcs64");
    assert_eq!(json["ret_location"], "int_low_byte");
    assert_eq!(json["slots"].as_array().map(|s| s.len()), Some(2));
}

#[test]
fn test_plan_rejects_bad_declaration() {
    let output = dlb(&["plan", "--abi", "sysv", "not a declaration"]);
    assert!(!output.status.success());
}

#[test]
fn test_abi_command() {
    let output = dlb(&["abi"]);
    assert!(output.status.success());
    let text = stdout(&output);
    match Abi::native() {
        Some(abi) => assert!(text.contains(abi.name())),
        None => assert!(text.contains("none")),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_syslib_and_call() {
    let output = dlb(&["syslib"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "libc.so.6");

    if Abi::native().is_none() {
        return;
    }
    let output = dlb(&["call", "libc.so.6", "int abs(int)", "-17"]);
    assert!(
        output.status.success(),
        "call failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout(&output).trim(), "17");

    let output = dlb(&["call", "libc.so.6", "double strtod(cstr, ptr)", "2.5", "null"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "2.5");
}

#[test]
fn test_call_missing_library() {
    let output = dlb(&["call", "libdlbridge_missing.so", "int f()"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("libdlbridge_missing.so"));
}
