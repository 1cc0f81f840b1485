//! Mirroring sandbox-side filesystem changes into the editor.

use crate::editor::EditorStore;
use crate::files::{absolute_path, parent_path};
use crate::runner::RunnerResult;
use crate::sandbox::{ReadEncoding, Sandbox, WatchEvent, WatchEventKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Counts writes the runner issued itself so their watcher echoes are ignored.
///
/// Increment before every runner-issued mutation of a path; the watcher
/// consumes exactly one count per echoed event for that path.
#[derive(Debug, Default)]
pub struct WriteSuppressor {
    pending: Mutex<HashMap<String, usize>>,
}

impl WriteSuppressor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, path: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending.entry(path.to_string()).or_insert(0) += 1;
    }

    /// Returns `true` if an event for `path` was expected and is now accounted for.
    pub fn consume(&self, path: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(path) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                pending.remove(path);
                true
            }
            None => false,
        }
    }

    /// Forget every expected event.
    pub fn clear(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn pending(&self, path: &str) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct PendingReads {
    reads: BTreeMap<String, ReadEncoding>,
    timer: Option<JoinHandle<()>>,
}

/// Trailing-edge debounced reader.
///
/// Every scheduled read restarts the window; when it elapses, each pending
/// path is read once and the result pushed into the editor if the path is
/// still tracked there.
pub struct ReadCoalescer {
    sandbox: Arc<dyn Sandbox>,
    editor: Arc<EditorStore>,
    debounce: Duration,
    pending: Mutex<PendingReads>,
}

impl ReadCoalescer {
    pub fn new(sandbox: Arc<dyn Sandbox>, editor: Arc<EditorStore>, debounce: Duration) -> Self {
        Self {
            sandbox,
            editor,
            debounce,
            pending: Mutex::new(PendingReads::default()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingReads> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schedule_read(self: &Arc<Self>, path: &str, encoding: ReadEncoding) {
        let coalescer = Arc::clone(self);
        let mut pending = self.pending();
        pending.reads.insert(path.to_string(), encoding);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(coalescer.debounce).await;
            coalescer.flush().await;
        }));
    }

    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.pending().reads.len()
    }

    /// Read every pending path now.
    pub async fn flush(&self) {
        let reads = {
            let mut pending = self.pending();
            pending.timer = None;
            std::mem::take(&mut pending.reads)
        };
        for (path, encoding) in reads {
            match self.sandbox.read_file(&path, encoding).await {
                Ok(content) => {
                    if self.editor.tracks_file(&path) {
                        self.editor.update_document(&path, content);
                    }
                }
                Err(err) => warn!(path = %path, error = %err, "failed to read changed file"),
            }
        }
    }

    /// Drop pending reads and stop the timer.
    pub fn cancel(&self) {
        let mut pending = self.pending();
        pending.reads.clear();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
    }
}

/// Recursive watch on the sandbox root feeding the editor store.
pub struct FileWatcher {
    handle: JoinHandle<()>,
    coalescer: Arc<ReadCoalescer>,
}

impl FileWatcher {
    pub fn start(
        sandbox: Arc<dyn Sandbox>,
        editor: Arc<EditorStore>,
        suppressor: Arc<WriteSuppressor>,
        debounce: Duration,
    ) -> RunnerResult<Self> {
        let mut events = sandbox.watch("/", true)?;
        let coalescer = Arc::new(ReadCoalescer::new(
            Arc::clone(&sandbox),
            Arc::clone(&editor),
            debounce,
        ));
        let handler = WatchHandler {
            sandbox,
            editor,
            suppressor,
            coalescer: Arc::clone(&coalescer),
        };
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler.handle(event).await;
            }
            debug!("sandbox watch closed");
        });
        Ok(Self { handle, coalescer })
    }

    #[must_use]
    pub fn coalescer(&self) -> &Arc<ReadCoalescer> {
        &self.coalescer
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.handle.abort();
        self.coalescer.cancel();
    }
}

struct WatchHandler {
    sandbox: Arc<dyn Sandbox>,
    editor: Arc<EditorStore>,
    suppressor: Arc<WriteSuppressor>,
    coalescer: Arc<ReadCoalescer>,
}

impl WatchHandler {
    async fn handle(&self, event: WatchEvent) {
        if event.filename.split('/').any(|segment| segment == "..") {
            warn!(filename = %event.filename, "ignoring watch event outside the work directory");
            return;
        }
        let path = absolute_path(&event.filename);
        if self.suppressor.consume(&path) {
            debug!(path = %path, "ignoring echo of own write");
            return;
        }
        match event.kind {
            WatchEventKind::Change => {
                if let Some(doc) = self.editor.document(&path) {
                    self.coalescer
                        .schedule_read(&path, ReadEncoding::for_content(&doc.content));
                }
            }
            WatchEventKind::Rename => self.on_rename(&path).await,
        }
    }

    async fn on_rename(&self, path: &str) {
        if self.editor.has_entry(path) {
            self.editor.delete_entry(path);
            return;
        }
        let parent = parent_path(path).unwrap_or("/");
        let name = path.rsplit('/').next().unwrap_or(path);
        let entries = match self.sandbox.read_dir(parent).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %path, error = %err, "failed to list folder of renamed entry");
                return;
            }
        };
        match entries.iter().find(|entry| entry.name == name) {
            // Renamed away before we could look: nothing to add.
            None => {}
            Some(entry) if entry.is_directory => self.editor.add_folder(path),
            Some(_) => {
                self.editor.add_file(path, None);
                self.coalescer.schedule_read(path, ReadEncoding::Utf8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_counts_overlapping_writes() {
        let suppressor = WriteSuppressor::new();
        suppressor.increment("/a.txt");
        suppressor.increment("/a.txt");
        assert!(suppressor.consume("/a.txt"));
        assert_eq!(suppressor.pending("/a.txt"), 1);
        assert!(suppressor.consume("/a.txt"));
        assert!(!suppressor.consume("/a.txt"));
    }
}
