//! Output panel rendered straight to stdout.

use crate::progress::StepProgress;
use std::io::Write;
use std::sync::Arc;
use tutorial_runner::terminal::{DataListener, TerminalSurface};

/// Forwards pipeline output to stdout, pausing the step spinner around writes.
pub struct StdoutSurface {
    progress: Arc<StepProgress>,
}

impl StdoutSurface {
    pub fn new(progress: Arc<StepProgress>) -> Arc<Self> {
        Arc::new(Self { progress })
    }
}

impl TerminalSurface for StdoutSurface {
    fn write(&self, data: &str) {
        self.progress.suspend(|| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(data.as_bytes());
            let _ = stdout.flush();
        });
    }

    // A shared stdout is never cleared.
    fn reset(&self) {}

    // The output panel is read-only.
    fn on_data(&self, _listener: DataListener) {}

    fn cols(&self) -> Option<u16> {
        None
    }

    fn rows(&self) -> Option<u16> {
        None
    }
}
