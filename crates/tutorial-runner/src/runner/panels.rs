use super::Inner;
use crate::sandbox::SpawnOptions;
use crate::terminal::TerminalPanel;
use std::sync::Arc;
use tracing::{debug, warn};

impl Inner {
    /// Spawn an interactive shell for `panel` in the background.
    ///
    /// Failures leave the panel without a process; a failed boot is written
    /// to the panel so the user sees why.
    pub(super) fn spawn_shell(self: &Arc<Self>, panel: Arc<TerminalPanel>) {
        panel.begin_spawn();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let booting = inner.sandbox.get_if_booted().is_none();
            if booting {
                panel.write(&inner.config.booting_message);
            }
            let sandbox = match inner.sandbox().await {
                Ok(sandbox) => sandbox,
                Err(err) => {
                    panel.spawn_failed();
                    panel.reset();
                    panel.write(&format!("{err}\r\n"));
                    warn!(panel = %panel.id(), error = %err, "sandbox unavailable for terminal");
                    return;
                }
            };
            if booting {
                panel.reset();
            }

            let shell = &inner.config.shell;
            let mut args = shell.interactive_args.clone();
            if let Some(options) = panel.process_options() {
                args.extend(options.shell_args());
            }
            let options = SpawnOptions {
                terminal: Some(panel.size().unwrap_or(inner.config.default_terminal_size)),
            };
            let process = match sandbox.spawn(&shell.program, &args, options).await {
                Ok(process) => process,
                Err(err) => {
                    panel.spawn_failed();
                    warn!(panel = %panel.id(), error = %err, "failed to spawn terminal shell");
                    return;
                }
            };

            let output = process.take_output();
            let Some(owner) = panel.attach_process(Arc::clone(&process)) else {
                debug!(panel = %panel.id(), "panel retired before its shell started");
                return;
            };

            let input = Arc::downgrade(&process);
            owner.on_data(Arc::new(move |data: &str| {
                if let Some(process) = input.upgrade() {
                    if process.exit_code().is_none() {
                        let _ = process.write(data);
                    }
                }
            }));

            if let Some(mut output) = output {
                while let Some(chunk) = output.recv().await {
                    owner.write(&chunk);
                }
            }
        });
    }
}
