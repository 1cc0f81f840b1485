//! Lesson-level coordination on top of the runner.
//!
//! The store is the single owner of a [`TutorialRunner`] for an application:
//! it switches lessons, keeps the editor in sync with the sandbox and applies
//! or reverts lesson solutions.

use crate::editor::EditorStore;
use crate::model::{FileContent, Files, Lesson};
use crate::runner::{FilesSource, PrepareFilesOptions, RunnerResult, TutorialRunner};
use crate::tasks::{cancellable, CancellationToken, Task, TaskOptions, TaskResult};
use async_trait::async_trait;
use futures::future::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Content resolution for lessons.
#[async_trait]
pub trait LessonLoader: Send + Sync {
    async fn template(&self, name: &str) -> RunnerResult<Files>;

    async fn files(&self, lesson: &Lesson) -> RunnerResult<Files>;

    /// Solution files; an empty set means the lesson has none.
    async fn solution(&self, lesson: &Lesson) -> RunnerResult<Files>;
}

#[derive(Default)]
struct StoreState {
    lesson: Option<Arc<Lesson>>,
    lesson_task: Option<Task<()>>,
    lesson_signal: Option<CancellationToken>,
    lesson_files: Option<Files>,
    solution: Option<Files>,
}

pub struct TutorialStore {
    runner: TutorialRunner,
    loader: Arc<dyn LessonLoader>,
    state: Arc<Mutex<StoreState>>,
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TutorialStore {
    pub fn new(runner: TutorialRunner, loader: Arc<dyn LessonLoader>) -> Self {
        Self {
            runner,
            loader,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    #[must_use]
    pub fn runner(&self) -> &TutorialRunner {
        &self.runner
    }

    #[must_use]
    pub fn editor(&self) -> &Arc<EditorStore> {
        self.runner.editor()
    }

    #[must_use]
    pub fn current_lesson(&self) -> Option<Arc<Lesson>> {
        lock(&self.state).lesson.clone()
    }

    /// Switch to `lesson`.
    ///
    /// Commands, previews and terminals are configured immediately. Files are
    /// fetched and mounted while the command pipeline queues up behind them;
    /// the returned task settles once the files are mounted and the editor is
    /// filled. Schema violations are rejected before anything changes.
    pub fn set_lesson(&self, lesson: Lesson) -> RunnerResult<Task<()>> {
        lesson.data.validate()?;
        let lesson = Arc::new(lesson);
        let runner = self.runner.clone();
        let loader = Arc::clone(&self.loader);
        let state = Arc::clone(&self.state);
        let signal = CancellationToken::new();

        let mut guard = lock(&self.state);
        if let Some(previous) = guard.lesson_signal.replace(signal.clone()) {
            previous.cancel();
        }
        guard.lesson = Some(Arc::clone(&lesson));
        guard.lesson_files = None;
        guard.solution = None;

        let data = &lesson.data;
        runner.set_commands(&data.commands);
        runner.set_previews(data.previews.as_ref());
        runner.set_terminal_configuration(data.terminal.as_ref());
        runner.set_watch_from_sandbox(data.watches_sandbox());

        debug!(lesson = %lesson.id, "switching lesson");
        let files = {
            let loader = Arc::clone(&loader);
            let lesson = Arc::clone(&lesson);
            async move { loader.files(&lesson).await }.boxed().shared()
        };
        let mut options = PrepareFilesOptions::new(FilesSource::Pending(files.clone().boxed()))
            .with_signal(signal.clone());
        if let Some(name) = data.template.clone() {
            let loader = Arc::clone(&loader);
            options = options.with_template(FilesSource::Pending(
                async move { loader.template(&name).await }.boxed(),
            ));
        }
        let load = runner.prepare_files(options);
        runner.run_commands();

        let task = Task::new(
            move |token| async move {
                let files = cancellable(&token, files).await??;
                runner.editor().set_documents(&files);
                runner.editor().select(lesson.data.focus.as_deref());

                let solution = match loader.solution(&lesson).await {
                    Ok(solution) => Some(solution),
                    Err(err) => {
                        warn!(lesson = %lesson.id, error = %err, "failed to load solution");
                        None
                    }
                };
                {
                    let mut guard = lock(&state);
                    let current = guard.lesson.as_ref().is_some_and(|l| Arc::ptr_eq(l, &lesson));
                    if current {
                        guard.lesson_files = Some(files);
                        guard.solution = solution;
                    }
                }
                load.await
            },
            TaskOptions::ignore_cancel().with_signal(Some(signal)),
        );
        guard.lesson_task = Some(task.clone());
        Ok(task)
    }

    /// Wait until the current lesson's files are in place.
    pub async fn wait_ready(&self) -> TaskResult<()> {
        let task = lock(&self.state).lesson_task.clone();
        match task {
            Some(task) => task.await,
            None => Ok(()),
        }
    }

    /// Apply an editor edit to both the editor and the sandbox.
    pub fn update_file(&self, path: &str, content: impl Into<FileContent>) -> Task<()> {
        let content = content.into();
        self.editor().update_document(path, content.clone());
        self.runner.update_file(path, content)
    }

    #[must_use]
    pub fn has_solution(&self) -> bool {
        lock(&self.state)
            .solution
            .as_ref()
            .is_some_and(|solution| !solution.is_empty())
    }

    /// Replace the lesson files with the solution.
    pub fn solve(&self) -> Option<Task<()>> {
        let solution = lock(&self.state).solution.clone()?;
        if solution.is_empty() {
            return None;
        }
        Some(self.apply(solution))
    }

    /// Restore the lesson's starting files.
    pub fn reset(&self) -> Option<Task<()>> {
        let files = lock(&self.state).lesson_files.clone()?;
        Some(self.apply(files))
    }

    fn apply(&self, files: Files) -> Task<()> {
        let editor = self.editor();
        editor.set_documents(&files);
        if let Some(focus) = self.current_lesson().and_then(|l| l.data.focus.clone()) {
            editor.select(Some(&focus));
        }
        self.runner.update_files(files)
    }
}
