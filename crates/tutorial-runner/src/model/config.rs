use crate::model::TerminalSize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runner tuning knobs. Every field has a default suitable for a browser sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub shell: ShellConfig,
    /// Coalescing window for watcher-triggered reads.
    pub watch_debounce_ms: u64,
    pub default_terminal_size: TerminalSize,
    /// Shown on a terminal surface while the sandbox boots.
    pub booting_message: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            watch_debounce_ms: 100,
            default_terminal_size: TerminalSize::default(),
            booting_message: "Booting sandbox...".to_string(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

/// Shell used for pipeline commands and interactive terminals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    /// Arguments placed before the command text, e.g. `["-c"]`.
    pub command_args: Vec<String>,
    /// Arguments for an interactive shell, before per-panel restrictions.
    pub interactive_args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "jsh".to_string(),
            command_args: vec!["--osc".to_string(), "-c".to_string()],
            interactive_args: vec!["--osc".to_string()],
        }
    }
}

impl ShellConfig {
    /// Program and arguments that run `command` non-interactively.
    #[must_use]
    pub fn command_line(&self, command: &str) -> (String, Vec<String>) {
        let mut args = self.command_args.clone();
        args.push(command.to_string());
        (self.program.clone(), args)
    }
}
