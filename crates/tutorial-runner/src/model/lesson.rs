use crate::model::{CommandsSchema, PreviewSchema, TerminalSchema};
use crate::runner::RunnerResult;
use serde::{Deserialize, Serialize};

/// A parsed lesson as handed over by the content layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub data: LessonData,
}

/// Runner-relevant lesson frontmatter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonData {
    #[serde(flatten)]
    pub commands: CommandsSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previews: Option<PreviewSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalSchema>,
    /// File selected in the editor once the lesson is loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<EditorSchema>,
    /// Name of the template file set merged underneath the lesson files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemSchema>,
}

impl LessonData {
    /// Validate the parts of the schema the runner relies on.
    pub fn validate(&self) -> RunnerResult<()> {
        if let Some(terminal) = &self.terminal {
            terminal.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn editor_visible(&self) -> bool {
        !matches!(self.editor, Some(EditorSchema::Enabled(false)))
    }

    #[must_use]
    pub fn watches_sandbox(&self) -> bool {
        self.filesystem.as_ref().is_some_and(|fs| fs.watch)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditorSchema {
    Enabled(bool),
    Options {
        #[serde(default, rename = "fileTree")]
        file_tree: Option<bool>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemSchema {
    /// Mirror sandbox-side edits back into the editor.
    #[serde(default)]
    pub watch: bool,
}
