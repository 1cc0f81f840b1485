use super::{ProcessOptions, TerminalPanel};
use crate::model::{PanelDescriptor, PanelId, PanelSchema, PanelType, PanelsSchema, TerminalSchema};
use std::collections::HashMap;
use std::sync::Arc;

/// Normalized panel set plus the index of the focused panel.
#[derive(Clone, Debug, Default)]
pub struct TerminalConfig {
    pub panels: Vec<Arc<TerminalPanel>>,
    pub active_panel: usize,
}

/// Outcome of adopting a previous configuration's panels.
#[derive(Debug, Default)]
pub struct PanelReconciliation {
    /// Terminal panels that need a fresh interactive shell.
    pub needs_shell: Vec<Arc<TerminalPanel>>,
    /// Previous panels with no successor; their processes were killed.
    pub dropped: Vec<Arc<TerminalPanel>>,
}

struct Titles {
    unnamed: HashMap<PanelType, usize>,
}

impl Titles {
    fn new() -> Self {
        Self {
            unnamed: HashMap::new(),
        }
    }

    fn resolve(&mut self, panel_type: PanelType, explicit: Option<&str>) -> String {
        if let Some(title) = explicit {
            return title.to_string();
        }
        let count = self.unnamed.entry(panel_type).or_insert(0);
        let title = if *count == 0 {
            panel_type.default_title().to_string()
        } else {
            format!("{} {count}", panel_type.default_title())
        };
        *count += 1;
        title
    }
}

#[derive(Default)]
struct Inherited {
    allow_redirects: Option<bool>,
    allow_commands: Option<Vec<String>>,
}

impl TerminalConfig {
    /// Build the panel set for a terminal schema.
    ///
    /// `false` yields no panels; `true` or an absent schema yields a single
    /// output panel. Unnamed panels are titled after their type, with a
    /// numeric suffix from the second one of a type onwards.
    #[must_use]
    pub fn normalize(schema: Option<&TerminalSchema>) -> Self {
        let layout = match schema {
            Some(TerminalSchema::Enabled(false)) => return Self::default(),
            None | Some(TerminalSchema::Enabled(true)) => None,
            Some(TerminalSchema::Layout(layout)) => Some(layout),
        };

        let inherited = layout.map_or_else(Inherited::default, |layout| Inherited {
            allow_redirects: layout.allow_redirects,
            allow_commands: layout.allow_commands.clone(),
        });

        let descriptors: Vec<PanelDescriptor> = match layout.map(|layout| &layout.panels) {
            None => vec![descriptor(PanelType::Output, None)],
            Some(PanelsSchema::Single(panel_type)) => vec![descriptor(*panel_type, None)],
            Some(PanelsSchema::List(panels)) => panels.iter().map(into_descriptor).collect(),
        };

        let mut titles = Titles::new();
        let panels: Vec<Arc<TerminalPanel>> = descriptors
            .into_iter()
            .map(|desc| {
                let title = titles.resolve(desc.panel_type, desc.title.as_deref());
                let id = desc.id.map_or_else(PanelId::fresh, PanelId::new);
                let options = match desc.panel_type {
                    PanelType::Output => None,
                    PanelType::Terminal => Some(ProcessOptions {
                        allow_redirects: desc
                            .allow_redirects
                            .or(inherited.allow_redirects)
                            .unwrap_or(false),
                        allow_commands: desc
                            .allow_commands
                            .or_else(|| inherited.allow_commands.clone()),
                    }),
                };
                Arc::new(TerminalPanel::new(id, desc.panel_type, title, options))
            })
            .collect();

        let requested = layout.and_then(|layout| layout.active_panel).unwrap_or(0);
        let active_panel = requested.min(panels.len().saturating_sub(1));
        Self {
            panels,
            active_panel,
        }
    }

    #[must_use]
    pub fn panel(&self, id: &PanelId) -> Option<&Arc<TerminalPanel>> {
        self.panels.iter().find(|panel| panel.id() == id)
    }

    #[must_use]
    pub fn output_panel(&self) -> Option<&Arc<TerminalPanel>> {
        self.panels
            .iter()
            .find(|panel| panel.panel_type() == PanelType::Output)
    }

    /// Take over what is reusable from `previous`.
    ///
    /// A previous panel with the same id hands its surface over and is retired
    /// in favour of the new panel. When both are terminals the live (or still
    /// spawning) shell moves too. Previous panels without a successor are
    /// retired and their processes killed.
    pub fn adopt(&self, previous: &TerminalConfig) -> PanelReconciliation {
        let mut old_by_id: HashMap<&PanelId, &Arc<TerminalPanel>> = previous
            .panels
            .iter()
            .map(|panel| (panel.id(), panel))
            .collect();
        let mut reconciliation = PanelReconciliation::default();

        for panel in &self.panels {
            let matched = old_by_id.remove(panel.id());
            let mut has_shell = false;

            if let Some(old) = matched {
                if let Some(surface) = old.take_surface() {
                    panel.attach_surface(surface);
                }
                let both_terminals = old.panel_type() == PanelType::Terminal
                    && panel.panel_type() == PanelType::Terminal;
                let spawning = old.is_spawning();
                let process = old.retire(Some(Arc::clone(panel)));
                match process {
                    Some(process) if both_terminals => {
                        has_shell = panel.attach_process(process).is_some();
                    }
                    Some(process) => process.kill(),
                    None if both_terminals && spawning => {
                        panel.inherit_spawning();
                        has_shell = true;
                    }
                    None => {}
                }
            }

            if panel.panel_type() == PanelType::Terminal && !has_shell {
                reconciliation.needs_shell.push(Arc::clone(panel));
            }
        }

        for old in previous.panels.iter().filter(|old| old_by_id.contains_key(old.id())) {
            if let Some(process) = old.retire(None) {
                process.kill();
            }
            reconciliation.dropped.push(Arc::clone(old));
        }

        reconciliation
    }
}

fn descriptor(panel_type: PanelType, title: Option<String>) -> PanelDescriptor {
    PanelDescriptor {
        panel_type,
        title,
        id: None,
        allow_redirects: None,
        allow_commands: None,
    }
}

fn into_descriptor(schema: &PanelSchema) -> PanelDescriptor {
    match schema {
        PanelSchema::Type(panel_type) => descriptor(*panel_type, None),
        PanelSchema::Titled(panel_type, title) => descriptor(*panel_type, Some(title.clone())),
        PanelSchema::Descriptor(desc) => desc.clone(),
    }
}
