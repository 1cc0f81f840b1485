//! Boundary to the sandboxed execution environment.
//!
//! The runner never touches a real filesystem or process table directly; it
//! drives a [`Sandbox`] obtained from a [`SandboxBooter`]. Backends include the
//! in-memory fixture used by tests and the local-directory backend in the CLI.
//!
//! Paths handed to a sandbox are absolute-style [`Files`](crate::model::Files)
//! keys (`/src/index.js`), interpreted relative to the sandbox work directory.
//! Watch events report names relative to the watched root.

use crate::model::{FileContent, FileSystemTree, TerminalSize};
use crate::runner::{ErrorCode, RunnerError, RunnerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch, OnceCell};

/// Exit code reported when a process goes away without reporting one.
pub const LOST_EXIT_CODE: i32 = -1;

#[async_trait]
pub trait SandboxBooter: Send + Sync {
    async fn boot(&self) -> RunnerResult<Arc<dyn Sandbox>>;
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Bulk-install a file tree at the work directory root.
    async fn mount(&self, tree: FileSystemTree) -> RunnerResult<()>;

    async fn write_file(&self, path: &str, content: &FileContent) -> RunnerResult<()>;

    async fn read_file(&self, path: &str, encoding: ReadEncoding) -> RunnerResult<FileContent>;

    async fn read_dir(&self, path: &str) -> RunnerResult<Vec<DirEntry>>;

    async fn rm(&self, path: &str, options: RmOptions) -> RunnerResult<()>;

    /// Start watching `path`. Dropping the receiver closes the watch.
    fn watch(&self, path: &str, recursive: bool)
        -> RunnerResult<mpsc::UnboundedReceiver<WatchEvent>>;

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> RunnerResult<Arc<Process>>;

    fn port_events(&self) -> broadcast::Receiver<PortEvent>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEncoding {
    Utf8,
    Binary,
}

impl ReadEncoding {
    #[must_use]
    pub fn for_content(content: &FileContent) -> Self {
        if content.is_binary() {
            Self::Binary
        } else {
            Self::Utf8
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RmOptions {
    pub force: bool,
    pub recursive: bool,
}

impl RmOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            recursive: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Allocate a terminal of this size; `None` spawns without one.
    pub terminal: Option<TerminalSize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// Content of an existing entry changed.
    Change,
    /// Entry created, removed or renamed.
    Rename,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub filename: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortEventKind {
    Open,
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEvent {
    pub port: u16,
    pub kind: PortEventKind,
    pub url: String,
}

/// Backend-specific process controls.
pub trait ProcessControl: Send + Sync {
    fn kill(&self);
    fn resize(&self, size: TerminalSize);
}

/// Backend side of a [`Process`]: what the sandbox implementation drives.
pub struct ProcessIo {
    pub output: mpsc::UnboundedSender<String>,
    pub input: mpsc::UnboundedReceiver<String>,
    pub exit: watch::Sender<Option<i32>>,
}

/// A process running inside the sandbox.
pub struct Process {
    output: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    input: mpsc::UnboundedSender<String>,
    exit: watch::Receiver<Option<i32>>,
    control: Box<dyn ProcessControl>,
}

impl Process {
    /// Create a process handle and the channel ends its backend drives.
    pub fn channel(control: Box<dyn ProcessControl>) -> (Arc<Self>, ProcessIo) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let process = Arc::new(Self {
            output: Mutex::new(Some(output_rx)),
            input: input_tx,
            exit: exit_rx,
            control,
        });
        let io = ProcessIo {
            output: output_tx,
            input: input_rx,
            exit: exit_tx,
        };
        (process, io)
    }

    /// Output stream; can be taken exactly once.
    pub fn take_output(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn write(&self, data: impl Into<String>) -> RunnerResult<()> {
        self.input
            .send(data.into())
            .map_err(|err| RunnerError::process("process input is closed", err))
    }

    /// Wait for the exit code. Any number of callers may wait.
    pub async fn exit(&self) -> i32 {
        let mut exit = self.exit.clone();
        let waited = exit.wait_for(Option::is_some).await.map(|code| *code).ok();
        let code = waited.flatten().or_else(|| *exit.borrow());
        code.unwrap_or(LOST_EXIT_CODE)
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    pub fn kill(&self) {
        self.control.kill();
    }

    pub fn resize(&self, size: TerminalSize) {
        self.control.resize(size);
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("exit_code", &self.exit_code())
            .finish_non_exhaustive()
    }
}

/// Lazily booted sandbox shared by every runner component.
pub struct SandboxHandle {
    booter: Arc<dyn SandboxBooter>,
    instance: OnceCell<RunnerResult<Arc<dyn Sandbox>>>,
}

impl SandboxHandle {
    pub fn new(booter: Arc<dyn SandboxBooter>) -> Self {
        Self {
            booter,
            instance: OnceCell::new(),
        }
    }

    /// Boot on first use. The outcome is cached: a boot failure is returned as
    /// `E_SANDBOX_BOOT` to every caller and never retried.
    pub async fn get(&self) -> RunnerResult<Arc<dyn Sandbox>> {
        self.instance
            .get_or_init(|| async {
                self.booter.boot().await.map_err(|err| {
                    if err.code == ErrorCode::SandboxBoot {
                        err
                    } else {
                        RunnerError::boot("failed to boot sandbox", err)
                    }
                })
            })
            .await
            .clone()
    }

    #[must_use]
    pub fn get_if_booted(&self) -> Option<Arc<dyn Sandbox>> {
        self.instance.get().and_then(|booted| booted.as_ref().ok()).cloned()
    }
}
