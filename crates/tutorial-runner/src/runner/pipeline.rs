use super::Inner;
use crate::model::{Commands, RunId, RunnerConfig, TerminalSize};
use crate::sandbox::{Process, SpawnOptions};
use crate::steps::StepStatus;
use crate::tasks::{CancellationToken, Task, TaskError, TaskResult};
use crate::terminal::TerminalPanel;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Marks a run's change-detection decision point. Dropping it without
/// signalling still releases the runs queued behind it.
pub(super) struct Decision(watch::Sender<bool>);

impl Decision {
    pub(super) fn new(sender: watch::Sender<bool>) -> Self {
        Self(sender)
    }

    pub(super) fn signal(&self) {
        self.0.send_replace(true);
    }
}

impl Drop for Decision {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Settle with `previous`; cancelling the joining run cancels it too.
pub(super) async fn join_previous(token: &CancellationToken, previous: &Task<()>) -> TaskResult<()> {
    tokio::select! {
        biased;
        () = token.cancelled() => {
            previous.cancel();
            previous.settled().await;
            Err(TaskError::Cancelled)
        }
        outcome = previous.outcome() => outcome,
    }
}

fn terminal_size(panel: Option<&Arc<TerminalPanel>>, config: &RunnerConfig) -> TerminalSize {
    panel
        .and_then(|panel| panel.size())
        .unwrap_or(config.default_terminal_size)
}

fn pipe_output(process: &Process, panel: Option<Arc<TerminalPanel>>) {
    let Some(mut output) = process.take_output() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(chunk) = output.recv().await {
            if let Some(panel) = &panel {
                panel.write(&chunk);
            }
        }
    });
}

impl Inner {
    /// Run every command in order, reporting progress through the steps.
    ///
    /// Command failures halt the pipeline and are reported via step status,
    /// not as an error.
    pub(super) async fn execute(
        self: &Arc<Self>,
        token: &CancellationToken,
        commands: &Commands,
    ) -> TaskResult<()> {
        let run_id = RunId::new();
        let list = commands.to_vec();
        self.steps.set_from_commands(&list);

        let output = self.output_panel();
        if let Some(panel) = &output {
            panel.reset();
        }

        let sandbox = match self.sandbox().await {
            Ok(sandbox) => sandbox,
            Err(err) => {
                if let Some(panel) = &output {
                    panel.write(&format!("{err}\r\n"));
                }
                self.steps.skip_remaining(0);
                return Err(err.into());
            }
        };

        info!(%run_id, commands = list.len(), "running commands");
        let main_index = commands.main_index();
        let mut succeeded = true;

        for (index, command) in list.iter().enumerate() {
            if token.is_cancelled() {
                self.steps.skip_remaining(index);
                return Err(TaskError::Cancelled);
            }
            if !command.is_runnable() {
                self.steps.update_status(index, StepStatus::Skipped);
                continue;
            }

            self.steps.update_status(index, StepStatus::Running);
            let (program, args) = self.config.shell.command_line(command.shell_command());
            let options = SpawnOptions {
                terminal: Some(terminal_size(output.as_ref(), &self.config)),
            };
            let process = match sandbox.spawn(&program, &args, options).await {
                Ok(process) => process,
                Err(err) => {
                    warn!(%run_id, command = command.shell_command(), error = %err, "failed to spawn command");
                    if let Some(panel) = &output {
                        panel.write(&format!("{err}\r\n"));
                    }
                    self.steps.update_status(index, StepStatus::Failed);
                    self.steps.skip_remaining(index + 1);
                    return Ok(());
                }
            };
            pipe_output(&process, output.clone());

            // A dev server is not expected to exit, so setup counts as done
            // once it has started.
            if main_index == Some(index) {
                self.setup_done(&sandbox);
            }

            let exit = tokio::select! {
                biased;
                () = token.cancelled() => None,
                code = process.exit() => Some(code),
            };
            match exit {
                None => {
                    debug!(%run_id, index, "run cancelled, killing active command");
                    process.kill();
                    self.steps.skip_remaining(index);
                    return Err(TaskError::Cancelled);
                }
                Some(0) => self.steps.update_status(index, StepStatus::Completed),
                Some(code) => {
                    debug!(%run_id, index, code, "command failed");
                    self.steps.update_status(index, StepStatus::Failed);
                    self.steps.skip_remaining(index + 1);
                    succeeded = false;
                    break;
                }
            }
        }

        if main_index.is_none() && succeeded {
            self.setup_done(&sandbox);
        }
        info!(%run_id, succeeded, "commands finished");
        Ok(())
    }
}
