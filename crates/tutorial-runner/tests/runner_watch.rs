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

//! Mirroring sandbox-side edits into the editor store.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tutorial_runner::editor::EditorEntry;
use tutorial_runner::model::FileContent;
use tutorial_runner::sandbox::WatchEventKind;
use tutorial_runner::{PrepareFilesOptions, TutorialRunner};
use tutorial_runner_fixtures::{commands, files, settle, wait_until, ExitBehavior, FakeSandbox};

const INDEX: &str = "/src/index.js";

/// Runner with the lesson mounted, the dev server up and the watcher armed.
async fn watching_runner() -> (TutorialRunner, Arc<FakeSandbox>) {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    sandbox.echo_writes(true);
    sandbox.on_command("serve", ExitBehavior::Never);
    runner.set_watch_from_sandbox(true);

    let lesson = files(&[(INDEX, "v1")]);
    runner.editor().set_documents(&lesson);
    runner.prepare_files(PrepareFilesOptions::new(lesson)).await.unwrap();
    runner.set_commands(&commands(&[], Some("serve")));
    let _run = runner.run_commands();

    assert!(wait_until(|| sandbox.watcher_count() == 1).await);
    (runner, sandbox)
}

fn content(runner: &TutorialRunner, path: &str) -> Option<FileContent> {
    runner.editor().document(path).map(|doc| doc.content)
}

#[tokio::test(start_paused = true)]
async fn watcher_waits_for_setup() {
    let (runner, sandbox) = tutorial_runner_fixtures::runner();
    runner.set_watch_from_sandbox(true);
    runner
        .prepare_files(PrepareFilesOptions::new(files(&[(INDEX, "v1")])))
        .await
        .unwrap();

    settle().await;

    assert!(!runner.is_watching());
    assert_eq!(sandbox.watcher_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn external_change_reaches_editor() {
    let (runner, sandbox) = watching_runner().await;

    sandbox.set_file_external(INDEX, "v2");
    sandbox.emit_watch_event(WatchEventKind::Change, "src/index.js");
    sleep(Duration::from_millis(150)).await;

    assert_eq!(content(&runner, INDEX), Some(FileContent::from("v2")));
}

#[tokio::test(start_paused = true)]
async fn rapid_changes_are_read_once_settled() {
    let (runner, sandbox) = watching_runner().await;

    sandbox.set_file_external(INDEX, "v2");
    sandbox.emit_watch_event(WatchEventKind::Change, "src/index.js");
    sleep(Duration::from_millis(50)).await;
    sandbox.set_file_external(INDEX, "v3");
    sandbox.emit_watch_event(WatchEventKind::Change, "src/index.js");
    sleep(Duration::from_millis(60)).await;

    assert_eq!(content(&runner, INDEX), Some(FileContent::from("v1")), "window restarted");

    sleep(Duration::from_millis(60)).await;
    assert_eq!(content(&runner, INDEX), Some(FileContent::from("v3")));
}

#[tokio::test(start_paused = true)]
async fn own_writes_are_not_mirrored() {
    let (runner, sandbox) = watching_runner().await;

    runner.update_file(INDEX, "mine").await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(sandbox.file(INDEX), Some(FileContent::from("mine")));
    assert_eq!(content(&runner, INDEX), Some(FileContent::from("v1")));

    sandbox.set_file_external(INDEX, "theirs");
    sandbox.emit_watch_event(WatchEventKind::Change, "src/index.js");
    sleep(Duration::from_millis(150)).await;
    assert_eq!(content(&runner, INDEX), Some(FileContent::from("theirs")));
}

#[tokio::test(start_paused = true)]
async fn changes_to_untracked_files_are_ignored() {
    let (runner, sandbox) = watching_runner().await;

    sandbox.set_file_external("/dist/bundle.js", "built");
    sandbox.emit_watch_event(WatchEventKind::Change, "dist/bundle.js");
    sleep(Duration::from_millis(150)).await;

    assert!(!runner.editor().has_entry("/dist/bundle.js"));
}

#[tokio::test(start_paused = true)]
async fn created_file_is_added_and_loaded() {
    let (runner, sandbox) = watching_runner().await;

    sandbox.set_file_external("/src/lib/new.js", "export {}");
    sandbox.emit_watch_event(WatchEventKind::Rename, "src/lib/new.js");
    settle().await;

    assert!(runner.editor().document("/src/lib/new.js").unwrap().loading);
    assert!(matches!(
        runner.editor().entries().get().get("/src/lib"),
        Some(EditorEntry::Folder)
    ));

    sleep(Duration::from_millis(150)).await;
    let doc = runner.editor().document("/src/lib/new.js").unwrap();
    assert!(!doc.loading);
    assert_eq!(doc.content, FileContent::from("export {}"));
}

#[tokio::test(start_paused = true)]
async fn created_folder_is_added() {
    let (runner, sandbox) = watching_runner().await;

    sandbox.mkdir_external("/assets");
    sandbox.emit_watch_event(WatchEventKind::Rename, "assets");

    assert!(
        wait_until(|| matches!(
            runner.editor().entries().get().get("/assets"),
            Some(EditorEntry::Folder)
        ))
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn removed_file_leaves_editor() {
    let (runner, sandbox) = watching_runner().await;
    runner.editor().select(Some(INDEX));

    sandbox.emit_watch_event(WatchEventKind::Rename, "src/index.js");

    assert!(wait_until(|| !runner.editor().has_entry(INDEX)).await);
    assert_eq!(runner.editor().selected().get(), None);
}

#[tokio::test(start_paused = true)]
async fn escaping_paths_are_ignored() {
    let (runner, sandbox) = watching_runner().await;
    let before = runner.editor().entries().get();

    sandbox.emit_watch_event(WatchEventKind::Rename, "../outside.txt");
    sleep(Duration::from_millis(150)).await;

    assert_eq!(runner.editor().entries().get(), before);
}

#[tokio::test(start_paused = true)]
async fn disabling_watch_closes_watcher() {
    let (runner, sandbox) = watching_runner().await;

    runner.set_watch_from_sandbox(false);

    assert!(!runner.is_watching());
    assert!(wait_until(|| sandbox.watcher_count() == 0).await);
}
