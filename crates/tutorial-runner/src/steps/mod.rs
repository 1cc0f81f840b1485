use crate::model::Command;
use crate::observable::Observable;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub title: String,
    pub status: StepStatus,
}

/// User-facing progress list for the declared command pipeline.
#[derive(Debug, Default)]
pub struct StepsController {
    steps: Observable<Vec<Step>>,
}

impl StepsController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn steps(&self) -> &Observable<Vec<Step>> {
        &self.steps
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Step> {
        self.steps.get()
    }

    /// Replace the list with one idle step per command, runnable or not.
    pub fn set_from_commands(&self, commands: &[Command]) {
        self.steps.set(
            commands
                .iter()
                .map(|command| Step {
                    title: command.title().to_string(),
                    status: StepStatus::Idle,
                })
                .collect(),
        );
    }

    /// Out-of-range indices are ignored; a superseded run may still report in.
    pub fn update_step(&self, index: usize, step: Step) {
        self.steps.update_if(|steps| match steps.get_mut(index) {
            Some(slot) => {
                *slot = step;
                true
            }
            None => false,
        });
    }

    pub fn update_status(&self, index: usize, status: StepStatus) {
        self.steps.update_if(|steps| match steps.get_mut(index) {
            Some(slot) if slot.status != status => {
                slot.status = status;
                true
            }
            _ => false,
        });
    }

    pub fn skip_remaining(&self, from_index: usize) {
        self.steps.update_if(|steps| {
            let mut changed = false;
            for step in steps.iter_mut().skip(from_index) {
                if step.status != StepStatus::Skipped {
                    step.status = StepStatus::Skipped;
                    changed = true;
                }
            }
            changed
        });
    }
}
