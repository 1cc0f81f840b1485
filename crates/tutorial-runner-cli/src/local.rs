//! Local-directory sandbox: files under a work directory, processes in a PTY.

use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use tutorial_runner::files::flatten_file_tree;
use tutorial_runner::model::{FileContent, FileSystemTree, TerminalSize};
use tutorial_runner::sandbox::{
    DirEntry, PortEvent, PortEventKind, Process, ProcessControl, ProcessIo, ReadEncoding,
    RmOptions, Sandbox, SandboxBooter, SpawnOptions, WatchEvent, WatchEventKind, LOST_EXIT_CODE,
};
use tutorial_runner::{RunnerError, RunnerResult};

const PORT_PATTERN: &str = r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::\]):(\d{2,5})";
const READ_CHUNK: usize = 4096;
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates the work directory on boot.
pub struct LocalBooter {
    root: PathBuf,
}

impl LocalBooter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl SandboxBooter for LocalBooter {
    async fn boot(&self) -> RunnerResult<Arc<dyn Sandbox>> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| RunnerError::boot("failed to create work directory", err))?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|err| RunnerError::boot("failed to resolve work directory", err))?;
        debug!(root = %root.display(), "local sandbox ready");
        Ok(Arc::new(LocalSandbox::new(root)?))
    }
}

pub struct LocalSandbox {
    root: PathBuf,
    ports: broadcast::Sender<PortEvent>,
    port_pattern: Regex,
}

impl LocalSandbox {
    pub fn new(root: PathBuf) -> RunnerResult<Self> {
        let port_pattern = Regex::new(PORT_PATTERN)
            .map_err(|err| RunnerError::internal(format!("invalid port pattern: {err}")))?;
        let (ports, _) = broadcast::channel(64);
        Ok(Self {
            root,
            ports,
            port_pattern,
        })
    }

    /// Map a sandbox path onto the work directory, refusing to leave it.
    fn resolve(&self, path: &str) -> RunnerResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(RunnerError::sandbox(
                "path escapes the work directory",
                path,
            ));
        }
        Ok(self.root.join(relative))
    }

    async fn write_path(&self, path: &str, content: &FileContent) -> RunnerResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RunnerError::sandbox(format!("failed to create folder for {path}"), err))?;
        }
        tokio::fs::write(&target, content.as_bytes())
            .await
            .map_err(|err| RunnerError::sandbox(format!("failed to write {path}"), err))
    }

}

/// Watch event name relative to the work directory, `/`-separated.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn watch_kind(kind: EventKind) -> Option<WatchEventKind> {
    use notify::event::ModifyKind;
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(WatchEventKind::Rename)
        }
        EventKind::Modify(_) => Some(WatchEventKind::Change),
        _ => None,
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn mount(&self, tree: FileSystemTree) -> RunnerResult<()> {
        for (path, content) in flatten_file_tree(&tree) {
            self.write_path(&path, &content).await?;
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &FileContent) -> RunnerResult<()> {
        self.write_path(path, content).await
    }

    async fn read_file(&self, path: &str, encoding: ReadEncoding) -> RunnerResult<FileContent> {
        let bytes = tokio::fs::read(self.resolve(path)?)
            .await
            .map_err(|err| RunnerError::sandbox(format!("failed to read {path}"), err))?;
        match encoding {
            ReadEncoding::Binary => Ok(FileContent::Binary(bytes)),
            ReadEncoding::Utf8 => String::from_utf8(bytes)
                .map(FileContent::Text)
                .map_err(|err| RunnerError::sandbox(format!("{path} is not UTF-8"), err)),
        }
    }

    async fn read_dir(&self, path: &str) -> RunnerResult<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(self.resolve(path)?)
            .await
            .map_err(|err| RunnerError::sandbox(format!("failed to list {path}"), err))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| RunnerError::sandbox(format!("failed to list {path}"), err))?
        {
            let is_directory = entry
                .file_type()
                .await
                .is_ok_and(|file_type| file_type.is_dir());
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory,
            });
        }
        Ok(entries)
    }

    async fn rm(&self, path: &str, options: RmOptions) -> RunnerResult<()> {
        let target = self.resolve(path)?;
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if options.force && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(err) => return Err(RunnerError::sandbox(format!("failed to remove {path}"), err)),
        };
        let removed = if metadata.is_dir() && options.recursive {
            tokio::fs::remove_dir_all(&target).await
        } else if metadata.is_dir() {
            tokio::fs::remove_dir(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        removed.map_err(|err| RunnerError::sandbox(format!("failed to remove {path}"), err))
    }

    fn watch(
        &self,
        path: &str,
        recursive: bool,
    ) -> RunnerResult<mpsc::UnboundedReceiver<WatchEvent>> {
        let target = self.resolve(path)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let events = sender.clone();
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "filesystem watch error");
                    return;
                }
            };
            let Some(kind) = watch_kind(event.kind) else {
                return;
            };
            for path in &event.paths {
                if let Some(filename) = relative_name(&root, path) {
                    let _ = events.send(WatchEvent { kind, filename });
                }
            }
        })
        .map_err(|err| RunnerError::sandbox("failed to start filesystem watch", err))?;
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&target, mode)
            .map_err(|err| RunnerError::sandbox("failed to start filesystem watch", err))?;

        // The watcher lives until the runner drops its receiver.
        tokio::spawn(async move {
            sender.closed().await;
            drop(watcher);
        });
        Ok(receiver)
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> RunnerResult<Arc<Process>> {
        let size = options.terminal.unwrap_or_default();
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|err| RunnerError::sandbox("failed to open pty", err))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(&self.root);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| RunnerError::sandbox(format!("failed to spawn {command}"), err))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| RunnerError::sandbox("failed to clone pty reader", err))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| RunnerError::sandbox("failed to take pty writer", err))?;

        let control = PtyControl {
            master: Mutex::new(pair.master),
            killer: Mutex::new(child.clone_killer()),
        };
        let (process, io) = Process::channel(Box::new(control));
        let ProcessIo {
            output,
            input,
            exit,
        } = io;
        let announced = Arc::new(Mutex::new(BTreeSet::new()));

        let scanner = PortScanner {
            pattern: self.port_pattern.clone(),
            ports: self.ports.clone(),
            announced: Arc::clone(&announced),
        };
        let (drained, output_done) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            pump_output(reader, &output, &scanner);
            let _ = drained.send(());
        });
        std::thread::spawn(move || pump_input(writer, input));

        let ports = self.ports.clone();
        let program = command.to_string();
        std::thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).unwrap_or(LOST_EXIT_CODE),
                Err(err) => {
                    warn!(program = %program, error = %err, "failed to wait for process");
                    LOST_EXIT_CODE
                }
            };
            // Report the exit after the output it produced.
            let _ = output_done.recv_timeout(OUTPUT_DRAIN);
            debug!(program = %program, code, "process exited");
            for port in std::mem::take(&mut *lock(&announced)) {
                let _ = ports.send(port_event(port, PortEventKind::Close));
            }
            exit.send_replace(Some(code));
        });
        Ok(process)
    }

    fn port_events(&self) -> broadcast::Receiver<PortEvent> {
        self.ports.subscribe()
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn port_event(port: u16, kind: PortEventKind) -> PortEvent {
    PortEvent {
        port,
        kind,
        url: format!("http://localhost:{port}"),
    }
}

/// Announces ports a process prints as local URLs.
struct PortScanner {
    pattern: Regex,
    ports: broadcast::Sender<PortEvent>,
    announced: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortScanner {
    fn scan(&self, text: &str) {
        for captures in self.pattern.captures_iter(text) {
            let Some(port) = captures.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
                continue;
            };
            if lock(&self.announced).insert(port) {
                debug!(port, "port opened");
                let _ = self.ports.send(port_event(port, PortEventKind::Open));
            }
        }
    }
}

fn pump_output(
    mut reader: Box<dyn Read + Send>,
    output: &mpsc::UnboundedSender<String>,
    scanner: &PortScanner,
) {
    let mut buffer = [0_u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        pending.extend(buffer.iter().take(read));
        // Hold back an incomplete UTF-8 sequence until the next read.
        let valid = match std::str::from_utf8(&pending) {
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            _ => pending.len(),
        };
        let chunk: Vec<u8> = pending.drain(..valid).collect();
        let text = String::from_utf8_lossy(&chunk).into_owned();
        scanner.scan(&text);
        if output.send(text).is_err() {
            break;
        }
    }
    if !pending.is_empty() {
        let _ = output.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

fn pump_input(mut writer: Box<dyn Write + Send>, mut input: mpsc::UnboundedReceiver<String>) {
    while let Some(data) = input.blocking_recv() {
        if writer
            .write_all(data.as_bytes())
            .and_then(|()| writer.flush())
            .is_err()
        {
            break;
        }
    }
}

struct PtyControl {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl ProcessControl for PtyControl {
    fn kill(&self) {
        if let Err(err) = lock(&self.killer).kill() {
            debug!(error = %err, "kill failed; process likely exited");
        }
    }

    fn resize(&self, size: TerminalSize) {
        if let Err(err) = lock(&self.master).resize(pty_size(size)) {
            warn!(error = %err, "failed to resize pty");
        }
    }
}
