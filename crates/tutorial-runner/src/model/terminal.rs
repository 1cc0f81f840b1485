use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelType {
    /// Read-only pipe of the command pipeline's output.
    Output,
    /// Interactive shell.
    Terminal,
}

impl PanelType {
    #[must_use]
    pub fn default_title(self) -> &'static str {
        match self {
            Self::Output => "Output",
            Self::Terminal => "Terminal",
        }
    }
}

/// Terminal section of lesson data: `false`, `true`, or a panel layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TerminalSchema {
    Enabled(bool),
    Layout(TerminalLayout),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalLayout {
    pub panels: PanelsSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_panel: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_redirects: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_commands: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelsSchema {
    Single(PanelType),
    List(Vec<PanelSchema>),
}

impl Default for PanelsSchema {
    fn default() -> Self {
        Self::Single(PanelType::Output)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelSchema {
    Type(PanelType),
    Titled(PanelType, String),
    Descriptor(PanelDescriptor),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelDescriptor {
    #[serde(rename = "type")]
    pub panel_type: PanelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_redirects: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_commands: Option<Vec<String>>,
}

impl PanelSchema {
    #[must_use]
    pub fn panel_type(&self) -> PanelType {
        match self {
            Self::Type(panel_type) | Self::Titled(panel_type, _) => *panel_type,
            Self::Descriptor(descriptor) => descriptor.panel_type,
        }
    }
}

impl TerminalSchema {
    /// Boundary validation applied when lesson data is loaded.
    pub fn validate(&self) -> RunnerResult<()> {
        let Self::Layout(layout) = self else {
            return Ok(());
        };
        let types: Vec<PanelType> = match &layout.panels {
            PanelsSchema::Single(panel_type) => vec![*panel_type],
            PanelsSchema::List(panels) => panels.iter().map(PanelSchema::panel_type).collect(),
        };
        let outputs = types.iter().filter(|t| **t == PanelType::Output).count();
        if outputs > 1 {
            return Err(RunnerError::invalid_schema(
                "terminal configuration declares more than one output panel",
                serde_json::json!({ "output_panels": outputs }),
            ));
        }
        if let Some(active) = layout.active_panel {
            if active >= types.len() {
                return Err(RunnerError::invalid_schema(
                    "activePanel is out of range",
                    serde_json::json!({ "active_panel": active, "panels": types.len() }),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> Option<TerminalSchema> {
        serde_json::from_value(value).ok()
    }

    #[test]
    fn accepts_every_panel_shape() {
        let schema = parse(serde_json::json!({
            "panels": ["output", ["terminal", "Shell"], { "type": "terminal", "id": "t1" }]
        }));
        let Some(TerminalSchema::Layout(layout)) = schema else {
            unreachable!("layout expected");
        };
        let PanelsSchema::List(panels) = layout.panels else {
            unreachable!("list expected");
        };
        assert_eq!(panels.len(), 3);
        assert_eq!(panels[1], PanelSchema::Titled(PanelType::Terminal, "Shell".into()));
    }

    #[test]
    fn booleans_are_accepted() {
        assert_eq!(parse(serde_json::json!(false)), Some(TerminalSchema::Enabled(false)));
    }

    #[test]
    fn two_output_panels_are_rejected() {
        let schema = parse(serde_json::json!({ "panels": ["output", "output"] }));
        let result = schema.map(|s| s.validate());
        assert!(matches!(result, Some(Err(_))));
    }

    #[test]
    fn active_panel_must_exist() {
        let schema = parse(serde_json::json!({ "panels": "terminal", "activePanel": 1 }));
        assert!(matches!(schema.map(|s| s.validate()), Some(Err(_))));
    }
}
