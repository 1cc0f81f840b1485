//! Scriptable in-memory sandbox.
//!
//! Files live in a flat map keyed by absolute-style paths. Every mutation and
//! spawn is recorded so tests can assert on exactly what the runner asked the
//! sandbox to do.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tutorial_runner::files::{flatten_file_tree, relative_path};
use tutorial_runner::model::{FileContent, FileSystemTree, Files, TerminalSize};
use tutorial_runner::sandbox::{
    DirEntry, PortEvent, PortEventKind, Process, ProcessControl, ProcessIo, ReadEncoding,
    RmOptions, Sandbox, SandboxBooter, SpawnOptions, WatchEvent, WatchEventKind,
};
use tutorial_runner::{RunnerError, RunnerResult};

/// Exit code a fake process reports when killed.
pub const KILLED_EXIT_CODE: i32 = 130;

/// How a spawned fake process behaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Exit immediately with this code.
    Code(i32),
    /// Run until killed.
    Never,
}

#[derive(Clone, Debug)]
struct Script {
    behavior: ExitBehavior,
    output: Option<String>,
}

/// One call to `spawn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRecord {
    pub program: String,
    pub args: Vec<String>,
    pub terminal: Option<TerminalSize>,
}

impl SpawnRecord {
    /// Command text for `sh -c`-style spawns; `None` for interactive shells.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        let position = self.args.iter().position(|arg| arg == "-c")?;
        self.args.get(position + 1).map(String::as_str)
    }
}

/// Live handle to a process spawned by the fake sandbox.
pub struct FakeProcess {
    pub record: SpawnRecord,
    exit: OnceLock<watch::Sender<Option<i32>>>,
    output: OnceLock<mpsc::UnboundedSender<String>>,
    input: Mutex<Vec<String>>,
    resizes: Mutex<Vec<TerminalSize>>,
    killed: AtomicBool,
}

impl FakeProcess {
    fn new(record: SpawnRecord) -> Self {
        Self {
            record,
            exit: OnceLock::new(),
            output: OnceLock::new(),
            input: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
        }
    }

    pub fn emit_output(&self, data: &str) {
        if let Some(output) = self.output.get() {
            let _ = output.send(data.to_string());
        }
    }

    /// Report an exit code unless one was already reported.
    pub fn finish(&self, code: i32) {
        if let Some(exit) = self.exit.get() {
            exit.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(code);
                    true
                } else {
                    false
                }
            });
        }
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.get().and_then(|exit| *exit.borrow())
    }

    #[must_use]
    pub fn input(&self) -> Vec<String> {
        lock(&self.input).clone()
    }

    #[must_use]
    pub fn resizes(&self) -> Vec<TerminalSize> {
        lock(&self.resizes).clone()
    }
}

struct FakeControl(Arc<FakeProcess>);

impl ProcessControl for FakeControl {
    fn kill(&self) {
        self.0.killed.store(true, Ordering::SeqCst);
        self.0.finish(KILLED_EXIT_CODE);
    }

    fn resize(&self, size: TerminalSize) {
        lock(&self.0.resizes).push(size);
    }
}

#[derive(Default)]
struct FakeState {
    files: Files,
    folders: BTreeSet<String>,
    mounts: Vec<Files>,
    writes: Vec<(String, FileContent)>,
    removed: Vec<String>,
    processes: Vec<Arc<FakeProcess>>,
    scripts: HashMap<String, Script>,
    watchers: Vec<mpsc::UnboundedSender<WatchEvent>>,
    failing_spawns: BTreeSet<String>,
}

/// In-memory [`Sandbox`] with recorded calls and scripted processes.
pub struct FakeSandbox {
    state: Mutex<FakeState>,
    ports: broadcast::Sender<PortEvent>,
    mount_gate: watch::Sender<bool>,
    removal_gate: watch::Sender<bool>,
    fail_mounts: AtomicBool,
    echo_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for FakeSandbox {
    fn default() -> Self {
        let (ports, _) = broadcast::channel(64);
        let (mount_gate, _) = watch::channel(true);
        let (removal_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(FakeState::default()),
            ports,
            mount_gate,
            removal_gate,
            fail_mounts: AtomicBool::new(false),
            echo_writes: AtomicBool::new(false),
        }
    }
}

impl FakeSandbox {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Booter that hands out this sandbox.
    #[must_use]
    pub fn booter(self: &Arc<Self>) -> Arc<FakeBooter> {
        Arc::new(FakeBooter {
            sandbox: Some(Arc::clone(self)),
            boots: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    /// Script the process spawned for `command` (matched on the `-c` text).
    pub fn on_command(&self, command: &str, behavior: ExitBehavior) {
        self.state().scripts.insert(
            command.to_string(),
            Script {
                behavior,
                output: None,
            },
        );
    }

    /// Script a command that prints `output` and then exits with `code`.
    pub fn on_command_output(&self, command: &str, output: &str, code: i32) {
        self.state().scripts.insert(
            command.to_string(),
            Script {
                behavior: ExitBehavior::Code(code),
                output: Some(output.to_string()),
            },
        );
    }

    /// Make `spawn` fail for `program`.
    pub fn fail_spawns_of(&self, program: &str) {
        self.state().failing_spawns.insert(program.to_string());
    }

    /// Report every write back through the watchers, like a real filesystem.
    pub fn echo_writes(&self, enabled: bool) {
        self.echo_writes.store(enabled, Ordering::SeqCst);
    }

    /// Hold every `mount` call until [`resume_mounts`](Self::resume_mounts).
    pub fn pause_mounts(&self) {
        self.mount_gate.send_replace(false);
    }

    pub fn resume_mounts(&self) {
        self.mount_gate.send_replace(true);
    }

    /// Hold every `rm` call until [`resume_removals`](Self::resume_removals).
    pub fn pause_removals(&self) {
        self.removal_gate.send_replace(false);
    }

    pub fn resume_removals(&self) {
        self.removal_gate.send_replace(true);
    }

    /// Make every `mount` fail with a sandbox error.
    pub fn fail_mounts(&self, enabled: bool) {
        self.fail_mounts.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn files(&self) -> Files {
        self.state().files.clone()
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<FileContent> {
        self.state().files.get(path).cloned()
    }

    /// Change a file without the runner knowing, as a process would.
    pub fn set_file_external(&self, path: &str, content: impl Into<FileContent>) {
        self.state().files.insert(path.to_string(), content.into());
    }

    pub fn mkdir_external(&self, path: &str) {
        self.state().folders.insert(path.to_string());
    }

    #[must_use]
    pub fn mounts(&self) -> Vec<Files> {
        self.state().mounts.clone()
    }

    #[must_use]
    pub fn writes(&self) -> Vec<(String, FileContent)> {
        self.state().writes.clone()
    }

    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    #[must_use]
    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.state()
            .processes
            .iter()
            .map(|process| process.record.clone())
            .collect()
    }

    /// Spawned processes whose command text is `command`.
    #[must_use]
    pub fn spawn_count(&self, command: &str) -> usize {
        self.spawns()
            .iter()
            .filter(|record| record.command() == Some(command))
            .count()
    }

    #[must_use]
    pub fn processes(&self) -> Vec<Arc<FakeProcess>> {
        self.state().processes.clone()
    }

    /// Most recent process for `command`.
    #[must_use]
    pub fn process_for(&self, command: &str) -> Option<Arc<FakeProcess>> {
        self.state()
            .processes
            .iter()
            .rev()
            .find(|process| process.record.command() == Some(command))
            .cloned()
    }

    /// Interactive shells (spawns without a `-c` command).
    #[must_use]
    pub fn shells(&self) -> Vec<Arc<FakeProcess>> {
        self.state()
            .processes
            .iter()
            .filter(|process| process.record.command().is_none())
            .cloned()
            .collect()
    }

    /// Deliver a watch event to every open watcher. `filename` is relative.
    pub fn emit_watch_event(&self, kind: WatchEventKind, filename: &str) {
        let mut state = self.state();
        state.watchers.retain(|watcher| {
            watcher
                .send(WatchEvent {
                    kind,
                    filename: filename.to_string(),
                })
                .is_ok()
        });
    }

    #[must_use]
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state();
        state.watchers.retain(|watcher| !watcher.is_closed());
        state.watchers.len()
    }

    pub fn emit_port(&self, port: u16, kind: PortEventKind) {
        let _ = self.ports.send(PortEvent {
            port,
            kind,
            url: format!("http://localhost:{port}"),
        });
    }

    fn echo(&self, path: &str, kind: WatchEventKind) {
        if self.echo_writes.load(Ordering::SeqCst) {
            self.emit_watch_event(kind, relative_path(path));
        }
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn mount(&self, tree: FileSystemTree) -> RunnerResult<()> {
        let mut gate = self.mount_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        if self.fail_mounts.load(Ordering::SeqCst) {
            return Err(RunnerError::sandbox("mount failed", "EIO"));
        }
        let files = flatten_file_tree(&tree);
        let paths: Vec<String> = files.keys().cloned().collect();
        {
            let mut state = self.state();
            state.mounts.push(files.clone());
            state.files.extend(files);
        }
        for path in paths {
            self.echo(&path, WatchEventKind::Change);
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &FileContent) -> RunnerResult<()> {
        {
            let mut state = self.state();
            state.writes.push((path.to_string(), content.clone()));
            state.files.insert(path.to_string(), content.clone());
        }
        self.echo(path, WatchEventKind::Change);
        Ok(())
    }

    async fn read_file(&self, path: &str, encoding: ReadEncoding) -> RunnerResult<FileContent> {
        let content = self.state().files.get(path).cloned().ok_or_else(|| {
            RunnerError::sandbox("no such file", format!("ENOENT: {path}"))
        })?;
        Ok(match (encoding, content) {
            (ReadEncoding::Binary, FileContent::Text(text)) => FileContent::Binary(text.into_bytes()),
            (_, content) => content,
        })
    }

    async fn read_dir(&self, path: &str) -> RunnerResult<Vec<DirEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let state = self.state();
        let mut entries: Vec<DirEntry> = Vec::new();
        let folders = state
            .folders
            .iter()
            .map(|folder| (folder.as_str(), true));
        let files = state.files.keys().map(|file| (file.as_str(), false));
        for (candidate, is_folder) in folders.chain(files) {
            let Some(rest) = candidate.strip_prefix(&prefix) else {
                continue;
            };
            let (name, is_directory) = match rest.split_once('/') {
                Some((name, _)) => (name, true),
                None => (rest, is_folder),
            };
            if !entries.iter().any(|entry| entry.name == name) {
                entries.push(DirEntry {
                    name: name.to_string(),
                    is_directory,
                });
            }
        }
        Ok(entries)
    }

    async fn rm(&self, path: &str, options: RmOptions) -> RunnerResult<()> {
        let mut gate = self.removal_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut state = self.state();
        let existed = state.files.contains_key(path) || state.folders.contains(path);
        if !existed && !options.force {
            return Err(RunnerError::sandbox("no such file", format!("ENOENT: {path}")));
        }
        state.removed.push(path.to_string());
        state
            .files
            .retain(|key, _| key != path && !(options.recursive && key.starts_with(&prefix)));
        state.folders.retain(|key| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    fn watch(
        &self,
        _path: &str,
        _recursive: bool,
    ) -> RunnerResult<mpsc::UnboundedReceiver<WatchEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().watchers.push(sender);
        Ok(receiver)
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> RunnerResult<Arc<Process>> {
        let record = SpawnRecord {
            program: command.to_string(),
            args: args.to_vec(),
            terminal: options.terminal,
        };
        let mut state = self.state();
        if state.failing_spawns.contains(command) {
            return Err(RunnerError::sandbox("spawn failed", format!("{command}: not found")));
        }
        let script = match record.command() {
            Some(text) => state.scripts.get(text).cloned().unwrap_or(Script {
                behavior: ExitBehavior::Code(0),
                output: None,
            }),
            None => Script {
                behavior: ExitBehavior::Never,
                output: None,
            },
        };

        let fake = Arc::new(FakeProcess::new(record));
        let (process, io) = Process::channel(Box::new(FakeControl(Arc::clone(&fake))));
        let ProcessIo {
            output,
            mut input,
            exit,
        } = io;
        let _ = fake.exit.set(exit);
        let _ = fake.output.set(output);
        let sink = Arc::clone(&fake);
        tokio::spawn(async move {
            while let Some(data) = input.recv().await {
                lock(&sink.input).push(data);
            }
        });
        state.processes.push(Arc::clone(&fake));
        drop(state);

        if let Some(output) = &script.output {
            fake.emit_output(output);
        }
        if let ExitBehavior::Code(code) = script.behavior {
            fake.finish(code);
        }
        Ok(process)
    }

    fn port_events(&self) -> broadcast::Receiver<PortEvent> {
        self.ports.subscribe()
    }
}

/// [`SandboxBooter`] for a [`FakeSandbox`], or one that always fails.
pub struct FakeBooter {
    sandbox: Option<Arc<FakeSandbox>>,
    boots: AtomicUsize,
}

impl FakeBooter {
    /// Booter whose boot always fails, like an unsupported environment.
    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sandbox: None,
            boots: AtomicUsize::new(0),
        })
    }

    /// Number of boot attempts.
    #[must_use]
    pub fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxBooter for FakeBooter {
    async fn boot(&self) -> RunnerResult<Arc<dyn Sandbox>> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        match &self.sandbox {
            Some(sandbox) => Ok(Arc::clone(sandbox) as Arc<dyn Sandbox>),
            None => Err(RunnerError::boot(
                "sandbox is not supported here",
                "cross-origin isolation unavailable",
            )),
        }
    }
}
