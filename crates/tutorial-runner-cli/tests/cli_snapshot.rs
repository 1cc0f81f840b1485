//! Tests for the snapshot and run subcommands against a temporary work directory.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use std::path::Path;
use std::process::Command;

fn runner_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tutorial-runner"))
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A lesson on top of a `node` template, with one prepare and one main command.
fn course(root: &Path) {
    write(
        root,
        "intro/lesson.yaml",
        "id: intro\ntitle: Intro\ndata:\n  template: node\n  prepareCommands:\n    - echo preparing\n  mainCommand: echo started\n",
    );
    write(root, "intro/_files/index.js", "console.log('lesson')\n");
    write(root, "intro/_solution/index.js", "console.log('solved')\n");
    write(root, "templates/node/package.json", r#"{"name":"course"}"#);
    write(root, "templates/node/index.js", "// template\n");
}

#[test]
fn snapshot_prints_merged_files_with_start_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    course(dir.path());

    let output = runner_bin()
        .arg("snapshot")
        .arg(dir.path().join("intro"))
        .arg("--templates")
        .arg(dir.path().join("templates"))
        .arg("--workdir")
        .arg(dir.path().join("work"))
        .output()
        .expect("failed to execute");

    assert!(
        output.status.success(),
        "snapshot failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(snapshot["index.js"], "console.log('lesson')\n");
    let manifest: serde_json::Value =
        serde_json::from_str(snapshot["package.json"].as_str().unwrap()).unwrap();
    assert_eq!(
        manifest["stackblitz"]["startCommand"],
        "echo preparing && echo started"
    );
}

#[test]
fn snapshot_without_templates_root_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    course(dir.path());

    let output = runner_bin()
        .arg("snapshot")
        .arg(dir.path().join("intro"))
        .arg("--workdir")
        .arg(dir.path().join("work"))
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
}

#[test]
fn run_mounts_lesson_and_runs_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    course(dir.path());
    let work = dir.path().join("work");

    let output = runner_bin()
        .args(["--color=never", "run"])
        .arg(dir.path().join("intro"))
        .arg("--templates")
        .arg(dir.path().join("templates"))
        .arg("--workdir")
        .arg(&work)
        .output()
        .expect("failed to execute");

    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        std::fs::read_to_string(work.join("index.js")).unwrap(),
        "console.log('lesson')\n"
    );
    assert!(work.join("package.json").is_file());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("preparing"), "stdout: {stdout}");
    assert!(stdout.contains("started"), "stdout: {stdout}");
}

#[test]
fn failing_command_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "broken/lesson.json",
        r#"{"id":"broken","data":{"prepareCommands":["exit 3"],"mainCommand":"echo never"}}"#,
    );

    let output = runner_bin()
        .args(["--color=never", "run"])
        .arg(dir.path().join("broken"))
        .arg("--workdir")
        .arg(dir.path().join("work"))
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exit 3"), "stderr: {stderr}");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("never"));
}
