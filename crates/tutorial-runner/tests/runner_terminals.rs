// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]

//! Terminal panels: shell lifecycle, identity reuse, input and resizing.

use serde_json::json;
use std::sync::Arc;
use tutorial_runner::model::{PanelId, TerminalSchema, TerminalSize};
use tutorial_runner::TutorialRunner;
use tutorial_runner_fixtures::{wait_until, FakeBooter, FakeSandbox, RecordingSurface};

fn schema(value: serde_json::Value) -> TerminalSchema {
    serde_json::from_value(value).unwrap()
}

fn panel_titles(runner: &TutorialRunner) -> Vec<String> {
    runner
        .terminal_config()
        .get()
        .panels
        .iter()
        .map(|panel| panel.title().to_string())
        .collect()
}

async fn configure(runner: &TutorialRunner, sandbox: &FakeSandbox, value: serde_json::Value, shells: usize) {
    runner.set_terminal_configuration(Some(&schema(value)));
    assert!(
        wait_until(|| sandbox.shells().len() == shells).await,
        "expected {shells} shells, got {}",
        sandbox.shells().len()
    );
}

#[tokio::test]
async fn absent_schema_yields_single_output_panel() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();

    runner.set_terminal_configuration(None);

    assert_eq!(panel_titles(&runner), vec!["Output"]);
    assert!(runner.output_panel().is_some());
    tokio::task::yield_now().await;
    assert!(sandbox.shells().is_empty());
}

#[tokio::test]
async fn disabled_terminal_has_no_panels() {
    let (runner, _sandbox) = tutorial_runner_fixtures::runner();

    runner.set_terminal_configuration(Some(&TerminalSchema::Enabled(false)));

    assert!(runner.terminal_config().get().panels.is_empty());
    assert!(runner.output_panel().is_none());
}

#[tokio::test]
async fn unnamed_panels_are_numbered_per_type() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();

    configure(
        &runner,
        &sandbox,
        json!({ "panels": ["output", "terminal", "terminal", ["terminal", "Server"]] }),
        3,
    )
    .await;

    assert_eq!(panel_titles(&runner), vec!["Output", "Terminal", "Terminal 1", "Server"]);
}

#[tokio::test]
async fn same_id_keeps_shell_and_surface() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    let layout = json!({ "panels": [{ "type": "terminal", "id": "shell" }] });
    configure(&runner, &sandbox, layout.clone(), 1).await;
    let surface = RecordingSurface::new(24, 80);
    assert!(runner.attach_terminal(&PanelId::new("shell"), surface.clone()));

    configure(&runner, &sandbox, layout, 1).await;

    let config = runner.terminal_config().get();
    let panel = config.panel(&PanelId::new("shell")).unwrap();
    assert!(panel.surface().is_some());
    assert!(panel.process().is_some());
    assert!(!sandbox.shells()[0].is_killed());

    surface.type_input("ls\r");
    assert!(wait_until(|| sandbox.shells()[0].input() == vec!["ls\r".to_string()]).await);
}

#[tokio::test]
async fn changed_id_kills_old_shell() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    configure(&runner, &sandbox, json!({ "panels": [{ "type": "terminal", "id": "a" }] }), 1).await;
    runner.attach_terminal(&PanelId::new("a"), RecordingSurface::new(24, 80));

    configure(&runner, &sandbox, json!({ "panels": [{ "type": "terminal", "id": "b" }] }), 2).await;

    let shells = sandbox.shells();
    assert!(shells[0].is_killed());
    assert!(!shells[1].is_killed());
    let config = runner.terminal_config().get();
    assert!(config.panel(&PanelId::new("a")).is_none());
    assert!(config.panel(&PanelId::new("b")).unwrap().surface().is_none());
}

#[tokio::test]
async fn panels_without_id_are_not_reused() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    configure(&runner, &sandbox, json!({ "panels": ["terminal"] }), 1).await;

    configure(&runner, &sandbox, json!({ "panels": ["terminal"] }), 2).await;

    assert!(sandbox.shells()[0].is_killed());
}

#[tokio::test]
async fn reconfigure_during_spawn_hands_shell_to_successor() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    let layout = json!({ "panels": [{ "type": "terminal", "id": "t" }] });

    runner.set_terminal_configuration(Some(&schema(layout.clone())));
    runner.set_terminal_configuration(Some(&schema(layout)));

    assert!(wait_until(|| sandbox.shells().len() == 1).await);
    tokio::task::yield_now().await;
    assert_eq!(sandbox.shells().len(), 1);
    let config = runner.terminal_config().get();
    assert!(wait_until(|| config.panel(&PanelId::new("t")).unwrap().process().is_some()).await);
    assert!(!sandbox.shells()[0].is_killed());
}

#[tokio::test]
async fn restrictions_become_shell_flags() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();

    configure(
        &runner,
        &sandbox,
        json!({
            "panels": [
                { "type": "terminal", "id": "restricted", "allowCommands": ["ls", "cat"] },
                "terminal"
            ],
            "allowRedirects": true
        }),
        2,
    )
    .await;

    let (restricted, open): (Vec<_>, Vec<_>) = sandbox
        .shells()
        .into_iter()
        .map(|shell| shell.record.args.clone())
        .partition(|args| args.iter().any(|arg| arg.starts_with("--allow-commands")));
    assert_eq!(restricted.len(), 1);
    assert!(restricted[0].contains(&"--allow-commands=ls,cat".to_string()));
    assert!(restricted[0].contains(&"--allow-redirects".to_string()));
    assert!(open[0].contains(&"--allow-redirects".to_string()));
}

#[tokio::test]
async fn shell_output_reaches_surface() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    configure(&runner, &sandbox, json!({ "panels": [{ "type": "terminal", "id": "t" }] }), 1).await;
    let surface = RecordingSurface::new(24, 80);
    runner.attach_terminal(&PanelId::new("t"), surface.clone());

    sandbox.shells()[0].emit_output("~/project $ ");

    assert!(wait_until(|| surface.screen_text().contains("~/project $")).await);
}

#[tokio::test]
async fn resize_reaches_every_shell() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    configure(&runner, &sandbox, json!({ "panels": ["output", "terminal", "terminal"] }), 2).await;
    let config = runner.terminal_config().get();
    assert!(
        wait_until(|| config.panels.iter().skip(1).all(|panel| panel.process().is_some())).await
    );

    runner.on_terminal_resize(120, 40);

    for shell in sandbox.shells() {
        assert_eq!(shell.resizes(), vec![TerminalSize { rows: 40, cols: 120 }]);
    }
}

#[tokio::test]
async fn shell_uses_surface_size() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    runner.set_terminal_configuration(Some(&schema(
        json!({ "panels": [{ "type": "terminal", "id": "t" }] }),
    )));
    runner.attach_terminal(&PanelId::new("t"), RecordingSurface::new(30, 100));

    assert!(wait_until(|| sandbox.shells().len() == 1).await);
    assert_eq!(
        sandbox.shells()[0].record.terminal,
        Some(TerminalSize { rows: 30, cols: 100 })
    );
}

#[tokio::test]
async fn boot_failure_is_shown_in_terminal() {
    let runner = TutorialRunner::new(FakeBooter::failing(), Arc::default(), Default::default());
    let surface = RecordingSurface::new(24, 80);

    runner.set_terminal_configuration(Some(&schema(
        json!({ "panels": [{ "type": "terminal", "id": "t" }] }),
    )));
    runner.attach_terminal(&PanelId::new("t"), surface.clone());

    assert!(wait_until(|| surface.transcript().contains("E_SANDBOX_BOOT")).await);
    assert!(!surface.transcript().contains("Booting sandbox"));
}
