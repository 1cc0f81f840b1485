//! Terminal and output panels.
//!
//! A [`TerminalPanel`] binds an optional live [`Process`] to an optional
//! display [`TerminalSurface`]. Writes issued before a surface is attached are
//! buffered and flushed on attach, so a shell can be spawned before the UI
//! widget exists without losing early output.
//!
//! When a lesson change replaces the panel set, a panel is *retired*: if the
//! new configuration contains a successor with the same id, the retired panel
//! forwards everything to it; otherwise late writes are dropped and a late
//! process is killed.

mod config;

pub use config::{PanelReconciliation, TerminalConfig};

use crate::model::{PanelId, PanelType, TerminalSize};
use crate::sandbox::Process;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type DataListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Display surface capability set (terminal widget, log view, stdout, ...).
pub trait TerminalSurface: Send + Sync {
    fn write(&self, data: &str);
    fn reset(&self);
    /// Register a listener for user input typed into the surface.
    fn on_data(&self, listener: DataListener);
    fn cols(&self) -> Option<u16>;
    fn rows(&self) -> Option<u16>;
}

/// Shell restrictions for an interactive panel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    pub allow_redirects: bool,
    pub allow_commands: Option<Vec<String>>,
}

impl ProcessOptions {
    /// Extra shell arguments encoding these restrictions.
    #[must_use]
    pub fn shell_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.allow_redirects {
            args.push("--allow-redirects".to_string());
        }
        if let Some(commands) = &self.allow_commands {
            args.push(format!("--allow-commands={}", commands.join(",")));
        }
        args
    }
}

#[derive(Default)]
struct PanelState {
    surface: Option<Arc<dyn TerminalSurface>>,
    process: Option<Arc<Process>>,
    pending_writes: Vec<String>,
    pending_listeners: Vec<DataListener>,
    spawning: bool,
    retired: bool,
    successor: Option<Arc<TerminalPanel>>,
}

pub struct TerminalPanel {
    id: PanelId,
    panel_type: PanelType,
    title: String,
    process_options: Option<ProcessOptions>,
    state: Mutex<PanelState>,
}

enum Route {
    Surface(Arc<dyn TerminalSurface>),
    Successor(Arc<TerminalPanel>),
    Done,
}

impl TerminalPanel {
    pub fn new(
        id: PanelId,
        panel_type: PanelType,
        title: impl Into<String>,
        process_options: Option<ProcessOptions>,
    ) -> Self {
        Self {
            id,
            panel_type,
            title: title.into(),
            process_options,
            state: Mutex::new(PanelState::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &PanelId {
        &self.id
    }

    #[must_use]
    pub fn panel_type(&self) -> PanelType {
        self.panel_type
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn process_options(&self) -> Option<&ProcessOptions> {
        self.process_options.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn surface(&self) -> Option<Arc<dyn TerminalSurface>> {
        self.state().surface.clone()
    }

    #[must_use]
    pub fn process(&self) -> Option<Arc<Process>> {
        self.state().process.clone()
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.state().retired
    }

    /// Size of the attached surface, if it reports one.
    #[must_use]
    pub fn size(&self) -> Option<TerminalSize> {
        let surface = self.surface()?;
        Some(TerminalSize {
            rows: surface.rows()?,
            cols: surface.cols()?,
        })
    }

    /// Attach a display surface, flushing buffered output and listeners into it.
    pub fn attach_surface(&self, surface: Arc<dyn TerminalSurface>) {
        let (writes, listeners) = {
            let mut state = self.state();
            state.surface = Some(Arc::clone(&surface));
            (
                std::mem::take(&mut state.pending_writes),
                std::mem::take(&mut state.pending_listeners),
            )
        };
        for data in writes {
            surface.write(&data);
        }
        for listener in listeners {
            surface.on_data(listener);
        }
    }

    fn route(&self, buffer: impl FnOnce(&mut PanelState)) -> Route {
        let mut state = self.state();
        if state.retired {
            return match &state.successor {
                Some(successor) => Route::Successor(Arc::clone(successor)),
                None => Route::Done,
            };
        }
        match &state.surface {
            Some(surface) => Route::Surface(Arc::clone(surface)),
            None => {
                buffer(&mut state);
                Route::Done
            }
        }
    }

    pub fn write(&self, data: &str) {
        match self.route(|state| state.pending_writes.push(data.to_string())) {
            Route::Surface(surface) => surface.write(data),
            Route::Successor(successor) => successor.write(data),
            Route::Done => {}
        }
    }

    pub fn reset(&self) {
        match self.route(|state| state.pending_writes.clear()) {
            Route::Surface(surface) => surface.reset(),
            Route::Successor(successor) => successor.reset(),
            Route::Done => {}
        }
    }

    pub fn on_data(&self, listener: DataListener) {
        let pending = Arc::clone(&listener);
        match self.route(move |state| state.pending_listeners.push(pending)) {
            Route::Surface(surface) => surface.on_data(listener),
            Route::Successor(successor) => successor.on_data(listener),
            Route::Done => {}
        }
    }

    /// Mark that a shell spawn for this panel is in flight.
    pub fn begin_spawn(&self) {
        self.state().spawning = true;
    }

    /// Hand a process to this panel.
    ///
    /// Returns the panel that now owns the process. A retired panel forwards it
    /// to its successor; with no successor the process is killed and `None`
    /// is returned. Output panels never own a shell.
    pub fn attach_process(self: &Arc<Self>, process: Arc<Process>) -> Option<Arc<TerminalPanel>> {
        let successor = {
            let mut state = self.state();
            state.spawning = false;
            if self.panel_type == PanelType::Output {
                None
            } else if state.retired {
                state.successor.clone()
            } else {
                state.process = Some(process);
                return Some(Arc::clone(self));
            }
        };
        match successor {
            Some(successor) => successor.attach_process(process),
            None => {
                process.kill();
                None
            }
        }
    }

    /// Clear the in-flight spawn marker after a failed spawn.
    pub fn spawn_failed(&self) {
        self.state().spawning = false;
    }

    /// Retire this panel. Buffered output and listeners move to the successor.
    /// Returns the process it held, if any.
    pub fn retire(&self, successor: Option<Arc<TerminalPanel>>) -> Option<Arc<Process>> {
        let (process, writes, listeners) = {
            let mut state = self.state();
            state.retired = true;
            state.successor = successor.clone();
            (
                state.process.take(),
                std::mem::take(&mut state.pending_writes),
                std::mem::take(&mut state.pending_listeners),
            )
        };
        if let Some(successor) = successor {
            for data in writes {
                successor.write(&data);
            }
            for listener in listeners {
                successor.on_data(listener);
            }
        }
        process
    }

    fn take_surface(&self) -> Option<Arc<dyn TerminalSurface>> {
        self.state().surface.take()
    }

    fn is_spawning(&self) -> bool {
        self.state().spawning
    }

    fn inherit_spawning(&self) {
        self.state().spawning = true;
    }

    pub fn kill_process(&self) {
        let process = self.state().process.take();
        if let Some(process) = process {
            process.kill();
        }
    }
}

impl std::fmt::Debug for TerminalPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalPanel")
            .field("id", &self.id)
            .field("panel_type", &self.panel_type)
            .field("title", &self.title)
            .field("process_options", &self.process_options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        written: Mutex<Vec<String>>,
        listeners: Mutex<Vec<DataListener>>,
    }

    impl TerminalSurface for Capture {
        fn write(&self, data: &str) {
            self.written.lock().unwrap().push(data.to_string());
        }
        fn reset(&self) {
            self.written.lock().unwrap().clear();
        }
        fn on_data(&self, listener: DataListener) {
            self.listeners.lock().unwrap().push(listener);
        }
        fn cols(&self) -> Option<u16> {
            Some(100)
        }
        fn rows(&self) -> Option<u16> {
            Some(30)
        }
    }

    fn panel() -> Arc<TerminalPanel> {
        Arc::new(TerminalPanel::new(
            PanelId::new("t"),
            PanelType::Terminal,
            "Terminal",
            Some(ProcessOptions::default()),
        ))
    }

    #[test]
    fn buffered_writes_flush_on_attach() {
        let panel = panel();
        panel.write("early ");
        panel.write("output");
        let surface = Arc::new(Capture::default());
        panel.attach_surface(surface.clone());
        panel.write("!");
        assert_eq!(*surface.written.lock().unwrap(), ["early ", "output", "!"]);
    }

    #[test]
    fn reset_before_attach_discards_buffer() {
        let panel = panel();
        panel.write("Booting...");
        panel.reset();
        let surface = Arc::new(Capture::default());
        panel.attach_surface(surface.clone());
        assert!(surface.written.lock().unwrap().is_empty());
    }

    #[test]
    fn listeners_registered_early_reach_the_surface() {
        let panel = panel();
        panel.on_data(Arc::new(|_| {}));
        let surface = Arc::new(Capture::default());
        panel.attach_surface(surface.clone());
        assert_eq!(surface.listeners.lock().unwrap().len(), 1);
        assert_eq!(panel.size(), Some(TerminalSize { rows: 30, cols: 100 }));
    }

    #[test]
    fn retired_panel_forwards_to_successor() {
        let old = panel();
        let new = panel();
        let surface = Arc::new(Capture::default());
        new.attach_surface(surface.clone());
        old.retire(Some(Arc::clone(&new)));
        old.write("late");
        assert_eq!(*surface.written.lock().unwrap(), ["late"]);
    }

    #[test]
    fn shell_args_encode_restrictions() {
        let options = ProcessOptions {
            allow_redirects: true,
            allow_commands: Some(vec!["ls".into(), "npm".into()]),
        };
        assert_eq!(options.shell_args(), ["--allow-redirects", "--allow-commands=ls,npm"]);
    }
}
