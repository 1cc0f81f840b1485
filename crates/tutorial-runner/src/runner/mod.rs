//! The tutorial runner: owns the sandbox lifecycle across lesson transitions.
//!
//! Three independently ordered queues drive the sandbox:
//!
//! - the load queue (`prepare_files`, `update_file`, `update_files`), where
//!   each operation waits for the previous one to settle before touching the
//!   filesystem;
//! - the run queue (`run_commands`, `restart_last_run_commands`), which also
//!   waits for the load queue's tail so a pipeline never starts against a
//!   half-mounted tree;
//! - terminal panel shells, spawned in the background by
//!   `set_terminal_configuration`.
//!
//! Every queued operation returns a [`Task`] immediately. Awaiting it yields
//! `Err(TaskError::Cancelled)` when the operation was cancelled, which is the
//! normal outcome of navigating away from a lesson.

mod error;
mod panels;
mod pipeline;
mod snapshot;
mod watcher;

pub use error::{ErrorCode, RunnerError, RunnerResult};
pub use watcher::{FileWatcher, ReadCoalescer, WriteSuppressor};

use crate::editor::EditorStore;
use crate::files::{diff_files, merge_files, to_file_tree};
use crate::model::{
    Commands, CommandsSchema, FileContent, Files, PanelId, PreviewSchema, RunnerConfig,
    TerminalSchema, TerminalSize,
};
use crate::observable::Observable;
use crate::preview::{PreviewInfo, PreviewsController};
use crate::sandbox::{RmOptions, Sandbox, SandboxBooter, SandboxHandle};
use crate::steps::{Step, StepsController};
use crate::tasks::{
    cancellable, throw_if_cancelled, CancellationToken, Task, TaskOptions, TaskResult,
};
use crate::terminal::{TerminalConfig, TerminalPanel, TerminalSurface};
use futures::future::BoxFuture;
use snapshot::PackageJsonTracker;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// A file set that may still be loading.
pub enum FilesSource {
    Ready(Files),
    Pending(BoxFuture<'static, RunnerResult<Files>>),
}

impl FilesSource {
    async fn resolve(self) -> RunnerResult<Files> {
        match self {
            Self::Ready(files) => Ok(files),
            Self::Pending(future) => future.await,
        }
    }
}

impl From<Files> for FilesSource {
    fn from(files: Files) -> Self {
        Self::Ready(files)
    }
}

pub struct PrepareFilesOptions {
    pub files: FilesSource,
    pub template: Option<FilesSource>,
    pub signal: Option<CancellationToken>,
    /// Cancel the in-flight load before queueing this one. Defaults to `true`.
    pub abort_previous_load: bool,
}

impl PrepareFilesOptions {
    pub fn new(files: impl Into<FilesSource>) -> Self {
        Self {
            files: files.into(),
            template: None,
            signal: None,
            abort_previous_load: true,
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<FilesSource>) -> Self {
        self.template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn keep_previous_load(mut self) -> Self {
        self.abort_previous_load = false;
        self
    }
}

/// Queued pipeline plus the moment it made its change-detection decision.
#[derive(Clone)]
struct RunEntry {
    task: Task<()>,
    decided: watch::Receiver<bool>,
}

impl RunEntry {
    async fn decided(&self) {
        let mut decided = self.decided.clone();
        let _ = decided.wait_for(|decided| *decided).await;
    }
}

#[derive(Default)]
struct RunnerState {
    load_task: Option<Task<()>>,
    run: Option<RunEntry>,
    pending_commands: Option<Commands>,
    last_run_commands: Option<Commands>,
    current_files: Option<Files>,
    current_template: Option<Files>,
    package_json: PackageJsonTracker,
    watch_enabled: bool,
    ready_to_watch: bool,
    watcher: Option<FileWatcher>,
    listening_ports: bool,
}

struct Inner {
    sandbox: SandboxHandle,
    editor: Arc<EditorStore>,
    config: RunnerConfig,
    steps: StepsController,
    previews: PreviewsController,
    terminal_config: Observable<TerminalConfig>,
    suppressor: Arc<WriteSuppressor>,
    state: Mutex<RunnerState>,
}

/// Orchestrates files, commands, terminals and previews against one sandbox.
#[derive(Clone)]
pub struct TutorialRunner {
    inner: Arc<Inner>,
}

impl TutorialRunner {
    pub fn new(
        booter: Arc<dyn SandboxBooter>,
        editor: Arc<EditorStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sandbox: SandboxHandle::new(booter),
                editor,
                config,
                steps: StepsController::new(),
                previews: PreviewsController::new(),
                terminal_config: Observable::new(TerminalConfig::default()),
                suppressor: Arc::new(WriteSuppressor::new()),
                state: Mutex::new(RunnerState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn steps(&self) -> &Observable<Vec<Step>> {
        self.inner.steps.steps()
    }

    #[must_use]
    pub fn previews(&self) -> &Observable<Vec<PreviewInfo>> {
        self.inner.previews.previews()
    }

    #[must_use]
    pub fn terminal_config(&self) -> &Observable<TerminalConfig> {
        &self.inner.terminal_config
    }

    #[must_use]
    pub fn editor(&self) -> &Arc<EditorStore> {
        &self.inner.editor
    }

    /// Boot the sandbox if needed.
    pub async fn sandbox(&self) -> RunnerResult<Arc<dyn Sandbox>> {
        self.inner.sandbox().await
    }

    #[must_use]
    pub fn current_files(&self) -> Option<Files> {
        self.inner.state().current_files.clone()
    }

    #[must_use]
    pub fn current_template(&self) -> Option<Files> {
        self.inner.state().current_template.clone()
    }

    #[must_use]
    pub fn is_package_json_dirty(&self) -> bool {
        self.inner.state().package_json.is_dirty()
    }

    /// Tail of the load queue, if anything was ever queued.
    #[must_use]
    pub fn load_task(&self) -> Option<Task<()>> {
        self.inner.state().load_task.clone()
    }

    /// Tail of the run queue, if anything was ever queued.
    #[must_use]
    pub fn run_task(&self) -> Option<Task<()>> {
        self.inner.state().run.as_ref().map(|entry| entry.task.clone())
    }

    /// Mount a lesson's files, diffing against what is already mounted.
    pub fn prepare_files(&self, options: PrepareFilesOptions) -> Task<()> {
        let PrepareFilesOptions {
            files,
            template,
            signal,
            abort_previous_load,
        } = options;
        let inner = Arc::clone(&self.inner);
        let mut state = self.inner.state();
        let previous = state.load_task.clone();
        if abort_previous_load {
            if let Some(previous) = &previous {
                previous.cancel();
            }
        }
        let task = Task::new(
            move |token| async move {
                if let Some(previous) = previous {
                    previous.settled().await;
                }
                inner.load_files(&token, files, template).await
            },
            TaskOptions::ignore_cancel().with_signal(signal),
        );
        state.load_task = Some(task.clone());
        task
    }

    /// Write one file, in load-queue order.
    pub fn update_file(&self, path: impl Into<String>, content: impl Into<FileContent>) -> Task<()> {
        let path = path.into();
        let content = content.into();
        self.enqueue_load(move |inner, _token| async move {
            let sandbox = inner.sandbox().await?;
            inner.expect_write(&path);
            sandbox.write_file(&path, &content).await?;
            let mut changed = Files::new();
            changed.insert(path, content);
            inner.record_files(&changed);
            Ok(())
        })
    }

    /// Mount several files at once, in load-queue order.
    pub fn update_files(&self, files: Files) -> Task<()> {
        self.enqueue_load(move |inner, _token| async move {
            if files.is_empty() {
                return Ok(());
            }
            let sandbox = inner.sandbox().await?;
            for path in files.keys() {
                inner.expect_write(path);
            }
            sandbox.mount(to_file_tree(&files)).await?;
            inner.record_files(&files);
            Ok(())
        })
    }

    fn enqueue_load<F, Fut>(&self, work: F) -> Task<()>
    where
        F: FnOnce(Arc<Inner>, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = TaskResult<()>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let mut state = self.inner.state();
        let previous = state.load_task.clone();
        let task = Task::new(
            move |token| async move {
                if let Some(previous) = previous {
                    previous.settled().await;
                }
                throw_if_cancelled(&token)?;
                work(inner, token).await
            },
            TaskOptions::ignore_cancel(),
        );
        state.load_task = Some(task.clone());
        task
    }

    /// Store the commands for the next run; updates the step list right away
    /// when they would trigger one.
    pub fn set_commands(&self, schema: &CommandsSchema) {
        let commands = Commands::from_schema(schema);
        let changed = {
            let mut state = self.inner.state();
            let changed = state.package_json.is_dirty()
                || commands.differs_from(state.last_run_commands.as_ref());
            state.pending_commands = Some(commands.clone());
            changed
        };
        if changed {
            self.inner.steps.set_from_commands(&commands.to_vec());
        }
    }

    /// Run the pending commands if they differ from the last run.
    ///
    /// When nothing changed the returned task settles with the previous run.
    pub fn run_commands(&self) -> Task<()> {
        self.run_commands_with(true)
    }

    pub fn run_commands_with(&self, abort_previous_run: bool) -> Task<()> {
        let inner = Arc::clone(&self.inner);
        let (decided_tx, decided_rx) = watch::channel(false);
        let mut state = self.inner.state();
        let load = state.load_task.clone();
        let previous = state.run.clone();
        let pending = state.pending_commands.clone();
        let task = Task::new(
            move |token| async move {
                let decision = pipeline::Decision::new(decided_tx);
                if let Some(load) = load {
                    load.settled().await;
                }
                if let Some(previous) = &previous {
                    previous.decided().await;
                }
                throw_if_cancelled(&token)?;

                let Some(commands) = inner.detect_change(pending) else {
                    decision.signal();
                    debug!("commands unchanged, joining previous run");
                    return match previous {
                        Some(previous) => pipeline::join_previous(&token, &previous.task).await,
                        None => Ok(()),
                    };
                };

                if let Some(previous) = &previous {
                    if abort_previous_run {
                        previous.task.cancel();
                    }
                }
                decision.signal();
                if let Some(previous) = previous {
                    previous.task.settled().await;
                }
                inner.execute(&token, &commands).await
            },
            TaskOptions::ignore_cancel(),
        );
        state.run = Some(RunEntry {
            task: task.clone(),
            decided: decided_rx,
        });
        task
    }

    /// Rerun the last executed commands unconditionally.
    pub fn restart_last_run_commands(&self) -> Task<()> {
        let inner = Arc::clone(&self.inner);
        let mut state = self.inner.state();
        let Some(commands) = state.last_run_commands.clone() else {
            return Task::done(());
        };
        let load = state.load_task.clone();
        let previous = state.run.clone();
        if let Some(previous) = &previous {
            previous.task.cancel();
        }
        let (_, decided) = watch::channel(true);
        let task = Task::new(
            move |token| async move {
                if let Some(previous) = previous {
                    previous.task.settled().await;
                }
                if let Some(load) = load {
                    load.settled().await;
                }
                throw_if_cancelled(&token)?;
                inner.execute(&token, &commands).await
            },
            TaskOptions::ignore_cancel(),
        );
        state.run = Some(RunEntry {
            task: task.clone(),
            decided,
        });
        task
    }

    pub fn set_previews(&self, schema: Option<&PreviewSchema>) {
        self.inner.previews.set_previews(schema);
    }

    /// Replace the panel set, reusing panels whose id survives.
    pub fn set_terminal_configuration(&self, schema: Option<&TerminalSchema>) {
        let next = TerminalConfig::normalize(schema);
        let previous = self.inner.terminal_config.get();
        let reconciliation = next.adopt(&previous);
        if !reconciliation.dropped.is_empty() {
            debug!(count = reconciliation.dropped.len(), "dropped terminal panels");
        }
        self.inner.terminal_config.set(next);
        for panel in reconciliation.needs_shell {
            self.inner.spawn_shell(panel);
        }
    }

    /// Bind a display surface to the panel with `id`. Returns `false` for an
    /// unknown id.
    pub fn attach_terminal(&self, id: &PanelId, surface: Arc<dyn TerminalSurface>) -> bool {
        let config = self.inner.terminal_config.get();
        match config.panel(id) {
            Some(panel) => {
                panel.attach_surface(surface);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn output_panel(&self) -> Option<Arc<TerminalPanel>> {
        self.inner.output_panel()
    }

    /// Resize every panel's process. Panels without a process are skipped.
    pub fn on_terminal_resize(&self, cols: u16, rows: u16) {
        let size = TerminalSize { rows, cols };
        let config = self.inner.terminal_config.get();
        for panel in &config.panels {
            if let Some(process) = panel.process() {
                process.resize(size);
            }
        }
    }

    /// Export the current project as relative paths, with a start command
    /// injected into `package.json` when it has none.
    #[must_use]
    pub fn take_snapshot(&self) -> Files {
        let state = self.inner.state();
        let merged = merge_files(state.current_template.as_ref(), state.current_files.as_ref());
        let start_command = state
            .pending_commands
            .as_ref()
            .or(state.last_run_commands.as_ref())
            .map(Commands::start_command)
            .unwrap_or_default();
        snapshot::build_snapshot(merged, state.package_json.path(), &start_command)
    }

    /// Mirror sandbox-side edits into the editor once setup has reached the
    /// main command.
    pub fn set_watch_from_sandbox(&self, enabled: bool) {
        let arm = {
            let mut state = self.inner.state();
            state.watch_enabled = enabled;
            if !enabled {
                state.watcher = None;
            }
            enabled && state.ready_to_watch && state.watcher.is_none()
        };
        if arm {
            if let Some(sandbox) = self.inner.sandbox.get_if_booted() {
                self.inner.arm_watcher(&sandbox);
            }
        }
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.inner.state().watcher.is_some()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sandbox(self: &Arc<Self>) -> RunnerResult<Arc<dyn Sandbox>> {
        let sandbox = self.sandbox.get().await?;
        let listen = {
            let mut state = self.state();
            !std::mem::replace(&mut state.listening_ports, true)
        };
        if listen {
            self.listen_for_ports(sandbox.port_events());
        }
        Ok(sandbox)
    }

    fn listen_for_ports(self: &Arc<Self>, mut events: broadcast::Receiver<crate::sandbox::PortEvent>) {
        let inner: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match inner.upgrade() {
                        Some(inner) => inner.previews.on_port_event(&event),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "port events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn output_panel(&self) -> Option<Arc<TerminalPanel>> {
        self.terminal_config.with(|config| config.output_panel().cloned())
    }

    /// Count a runner-issued write so its watcher echo is ignored. Nothing is
    /// counted while no watcher is armed, since those echoes are never seen.
    fn expect_write(&self, path: &str) {
        if self.state().watcher.is_some() {
            self.suppressor.increment(path);
        }
    }

    /// Merge `files` into the current lesson files and track the manifest.
    fn record_files(&self, files: &Files) {
        let mut state = self.state();
        state
            .current_files
            .get_or_insert_with(Files::new)
            .extend(files.iter().map(|(path, content)| (path.clone(), content.clone())));
        state.package_json.observe(files);
    }

    async fn load_files(
        self: &Arc<Self>,
        token: &CancellationToken,
        files: FilesSource,
        template: Option<FilesSource>,
    ) -> TaskResult<()> {
        throw_if_cancelled(token)?;
        let files = cancellable(token, files.resolve()).await??;
        let template = match template {
            Some(template) => Some(cancellable(token, template.resolve()).await??),
            None => None,
        };
        let sandbox = cancellable(token, self.sandbox()).await??;
        throw_if_cancelled(token)?;

        let previous = {
            let state = self.state();
            (state.current_files.is_some() || state.current_template.is_some()).then(|| {
                merge_files(state.current_template.as_ref(), state.current_files.as_ref())
            })
        };
        let next = merge_files(template.as_ref(), Some(&files));

        // Once the first removal runs the sandbox no longer matches the recorded
        // files, so the diff is applied without further cancellation checks.
        if let Err(err) = self.apply_files(&sandbox, previous, &next).await {
            let mut state = self.state();
            state.current_template = None;
            state.current_files = None;
            return Err(err.into());
        }

        {
            let mut state = self.state();
            state.current_template = template;
            state.current_files = Some(files);
            state.package_json.observe(&next);
        }
        // The mount already happened; report the cancellation anyway.
        throw_if_cancelled(token)
    }

    /// Bring the sandbox from `previous` to `next`, or mount `next` whole.
    async fn apply_files(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        previous: Option<Files>,
        next: &Files,
    ) -> RunnerResult<()> {
        let Some(previous) = previous else {
            for path in next.keys() {
                self.expect_write(path);
            }
            return sandbox.mount(to_file_tree(next)).await;
        };
        let diff = diff_files(&previous, next);
        debug!(
            removed = diff.removed.len(),
            changed = diff.added_or_modified.len(),
            "applying file diff"
        );
        for path in &diff.removed {
            self.expect_write(path);
            sandbox.rm(path, RmOptions::forced()).await?;
        }
        if diff.added_or_modified.is_empty() {
            return Ok(());
        }
        for path in diff.added_or_modified.keys() {
            self.expect_write(path);
        }
        sandbox.mount(to_file_tree(&diff.added_or_modified)).await
    }

    /// Commands to run if they differ from the last run; records them as run.
    fn detect_change(&self, pending: Option<Commands>) -> Option<Commands> {
        let commands = pending?;
        let mut state = self.state();
        let changed = state.package_json.is_dirty()
            || commands.differs_from(state.last_run_commands.as_ref());
        if !changed {
            return None;
        }
        state.last_run_commands = Some(commands.clone());
        Some(commands)
    }

    /// Setup reached its end state: clear the manifest flag and arm the watcher.
    fn setup_done(&self, sandbox: &Arc<dyn Sandbox>) {
        let arm = {
            let mut state = self.state();
            state.package_json.clear();
            state.ready_to_watch = true;
            state.watch_enabled && state.watcher.is_none()
        };
        if arm {
            self.arm_watcher(sandbox);
        }
    }

    fn arm_watcher(&self, sandbox: &Arc<dyn Sandbox>) {
        match FileWatcher::start(
            Arc::clone(sandbox),
            Arc::clone(&self.editor),
            Arc::clone(&self.suppressor),
            self.config.watch_debounce(),
        ) {
            Ok(watcher) => {
                let mut state = self.state();
                if state.watch_enabled && state.watcher.is_none() {
                    self.suppressor.clear();
                    state.watcher = Some(watcher);
                }
            }
            Err(err) => warn!(error = %err, "failed to watch sandbox filesystem"),
        }
    }
}
