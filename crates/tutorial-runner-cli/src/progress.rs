//! Step progress on stderr using indicatif.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tutorial_runner::steps::{Step, StepStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepEvent {
    Started { index: usize, title: String },
    Finished { title: String, status: StepStatus },
}

/// Transitions between two published step lists. A list with different titles
/// is a new pipeline and is compared against idle steps.
pub fn step_events(previous: &[Step], next: &[Step]) -> Vec<StepEvent> {
    let same_pipeline = previous.len() == next.len()
        && previous
            .iter()
            .zip(next)
            .all(|(before, after)| before.title == after.title);
    let mut events = Vec::new();
    for (index, step) in next.iter().enumerate() {
        let before = if same_pipeline {
            previous.get(index).map_or(StepStatus::Idle, |step| step.status)
        } else {
            StepStatus::Idle
        };
        if before == step.status {
            continue;
        }
        match step.status {
            StepStatus::Running => events.push(StepEvent::Started {
                index,
                title: step.title.clone(),
            }),
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped => {
                events.push(StepEvent::Finished {
                    title: step.title.clone(),
                    status: step.status,
                });
            }
            StepStatus::Idle => {}
        }
    }
    events
}

/// Spinner for the running step plus one line per finished step.
#[derive(Default)]
pub struct StepProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl StepProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn spinner(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.spinner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `write` with the spinner hidden so output does not tear it.
    pub fn suspend(&self, write: impl FnOnce()) {
        let spinner = self.spinner().clone();
        match spinner {
            Some(pb) => pb.suspend(write),
            None => write(),
        }
    }

    pub fn handle(&self, event: &StepEvent, total: usize) {
        match event {
            StepEvent::Started { index, title } => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.set_message(format!("[{}/{total}] {title}", index + 1));
                pb.enable_steady_tick(Duration::from_millis(100));
                if let Some(previous) = self.spinner().replace(pb) {
                    previous.finish_and_clear();
                }
            }
            StepEvent::Finished { title, status } => {
                if let Some(pb) = self.spinner().take() {
                    pb.finish_and_clear();
                }
                let icon = match status {
                    StepStatus::Completed => "\x1b[32m✓\x1b[0m",
                    StepStatus::Failed => "\x1b[31m✗\x1b[0m",
                    _ => "\x1b[33m-\x1b[0m",
                };
                let _ = writeln!(std::io::stderr(), "  {icon} {title}");
            }
        }
    }

    /// Report step changes until the runner goes away.
    pub async fn follow(&self, mut steps: watch::Receiver<Vec<Step>>) {
        let mut previous: Vec<Step> = Vec::new();
        loop {
            let next = steps.borrow_and_update().clone();
            for event in step_events(&previous, &next) {
                self.handle(&event, next.len());
            }
            previous = next;
            if steps.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn clear(&self) {
        if let Some(pb) = self.spinner().take() {
            pb.finish_and_clear();
        }
    }
}
