//! Test fixtures for tutorial-runner.
//!
//! - [`FakeSandbox`]: in-memory sandbox with recorded calls and scripted
//!   process exits.
//! - [`RecordingSurface`]: terminal surface that keeps a vt100 screen.
//! - Builders for lessons, command schemas and file sets, plus a
//!   [`StaticLoader`] serving fixed lesson content.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod builders;
pub mod sandbox;
pub mod surface;

pub use builders::{commands, files, LessonBuilder, StaticLoader};
pub use sandbox::{ExitBehavior, FakeBooter, FakeProcess, FakeSandbox, SpawnRecord, KILLED_EXIT_CODE};
pub use surface::RecordingSurface;

use std::sync::Arc;
use tutorial_runner::editor::EditorStore;
use tutorial_runner::model::RunnerConfig;
use tutorial_runner::TutorialRunner;

/// Runner wired to a fresh [`FakeSandbox`] with default configuration.
#[must_use]
pub fn runner() -> (TutorialRunner, Arc<FakeSandbox>) {
    runner_with(RunnerConfig::default())
}

#[must_use]
pub fn runner_with(config: RunnerConfig) -> (TutorialRunner, Arc<FakeSandbox>) {
    let sandbox = FakeSandbox::new();
    let runner = TutorialRunner::new(sandbox.booter(), Arc::new(EditorStore::new()), config);
    (runner, sandbox)
}

/// Let spawned tasks make progress.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `condition` holds; `false` if it never did.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1_000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
