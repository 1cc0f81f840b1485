//! Tests for argument handling of the tutorial-runner binary.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]

use std::process::Command;

fn runner_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tutorial-runner"))
}

#[test]
fn help_lists_subcommands() {
    let output = runner_bin()
        .arg("--help")
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["run", "snapshot", "completions"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}: {stdout}");
    }
}

#[test]
fn color_flag_rejects_invalid() {
    let output = runner_bin()
        .arg("--color=sometimes")
        .arg("--help")
        .output()
        .expect("failed to execute");

    assert!(!output.status.success(), "--color=sometimes should be rejected");
}

#[test]
fn run_requires_workdir() {
    let output = runner_bin()
        .args(["run", "lessons/intro"])
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--workdir"));
}

#[test]
fn completions_generate_for_bash() {
    let output = runner_bin()
        .args(["completions", "bash"])
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("tutorial-runner"));
}
