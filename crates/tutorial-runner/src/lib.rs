//! Tutorial Runner: workspace orchestration for interactive coding tutorials.
//!
//! Lesson content drives a sandboxed development environment: file sets are
//! mounted and incrementally diffed across lesson transitions, setup and dev
//! commands run as a cancellable pipeline with per-step status, terminal
//! panels are multiplexed onto sandbox processes, and out-of-band sandbox
//! edits are mirrored back into the editor.
//!
//! The sandbox itself is an external collaborator reached through the
//! [`sandbox::Sandbox`] trait.

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing,
        clippy::unreachable
    )
)]

pub mod editor;
pub mod files;
pub mod model;
pub mod observable;
pub mod preview;
pub mod runner;
pub mod sandbox;
pub mod steps;
pub mod store;
pub mod tasks;
pub mod terminal;

pub use crate::model::*;
pub use crate::runner::{
    ErrorCode, FilesSource, PrepareFilesOptions, RunnerError, RunnerResult, TutorialRunner,
};
pub use crate::store::{LessonLoader, TutorialStore};
pub use crate::tasks::{Task, TaskError, TaskResult};
