//! Terminal surface that records what the runner shows on it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tutorial_runner::terminal::{DataListener, TerminalSurface};

struct Recording {
    parser: vt100::Parser,
    transcript: String,
    resets: usize,
    listeners: Vec<DataListener>,
}

/// [`TerminalSurface`] backed by a vt100 screen plus a raw transcript.
pub struct RecordingSurface {
    rows: u16,
    cols: u16,
    inner: Mutex<Recording>,
}

impl RecordingSurface {
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Arc<Self> {
        Arc::new(Self {
            rows,
            cols,
            inner: Mutex::new(Recording {
                parser: vt100::Parser::new(rows, cols, 0),
                transcript: String::new(),
                resets: 0,
                listeners: Vec::new(),
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Visible screen text.
    #[must_use]
    pub fn screen_text(&self) -> String {
        self.inner().parser.screen().contents()
    }

    /// Everything written since the last reset.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.inner().transcript.clone()
    }

    #[must_use]
    pub fn resets(&self) -> usize {
        self.inner().resets
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner().listeners.len()
    }

    /// Simulate the user typing into the surface.
    pub fn type_input(&self, data: &str) {
        let listeners = self.inner().listeners.clone();
        for listener in listeners {
            listener(data);
        }
    }
}

impl TerminalSurface for RecordingSurface {
    fn write(&self, data: &str) {
        let mut inner = self.inner();
        inner.parser.process(data.as_bytes());
        inner.transcript.push_str(data);
    }

    fn reset(&self) {
        let mut inner = self.inner();
        inner.parser = vt100::Parser::new(self.rows, self.cols, 0);
        inner.transcript.clear();
        inner.resets += 1;
    }

    fn on_data(&self, listener: DataListener) {
        self.inner().listeners.push(listener);
    }

    fn cols(&self) -> Option<u16> {
        Some(self.cols)
    }

    fn rows(&self) -> Option<u16> {
        Some(self.rows)
    }
}
