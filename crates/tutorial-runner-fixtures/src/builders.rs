//! Fluent builders for lessons, command schemas and file sets.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tutorial_runner::model::{
    CommandInput, CommandsSchema, FileContent, Files, FilesystemSchema, Lesson, LessonData,
    PreviewSchema, TerminalSchema,
};
use tutorial_runner::{LessonLoader, RunnerError, RunnerResult};

/// Build a [`Files`] map from `(path, text)` pairs.
#[must_use]
pub fn files(entries: &[(&str, &str)]) -> Files {
    entries
        .iter()
        .map(|(path, content)| ((*path).to_string(), FileContent::from(*content)))
        .collect()
}

/// Build a commands schema from shell strings.
#[must_use]
pub fn commands(prepare: &[&str], main: Option<&str>) -> CommandsSchema {
    CommandsSchema {
        prepare_commands: Some(prepare.iter().map(|cmd| CommandInput::from(*cmd)).collect()),
        main_command: main.map(CommandInput::from),
    }
}

#[derive(Debug, Default)]
pub struct LessonBuilder {
    id: String,
    title: Option<String>,
    data: LessonData,
}

impl LessonBuilder {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    #[must_use]
    pub fn prepare_command(mut self, command: impl Into<CommandInput>) -> Self {
        self.data
            .commands
            .prepare_commands
            .get_or_insert_with(Vec::new)
            .push(command.into());
        self
    }

    #[must_use]
    pub fn main_command(mut self, command: impl Into<CommandInput>) -> Self {
        self.data.commands.main_command = Some(command.into());
        self
    }

    #[must_use]
    pub fn commands(mut self, commands: CommandsSchema) -> Self {
        self.data.commands = commands;
        self
    }

    #[must_use]
    pub fn terminal(mut self, terminal: TerminalSchema) -> Self {
        self.data.terminal = Some(terminal);
        self
    }

    /// Terminal section from JSON, as authored in frontmatter.
    #[must_use]
    pub fn terminal_json(self, value: serde_json::Value) -> Self {
        match serde_json::from_value(value) {
            Ok(terminal) => self.terminal(terminal),
            Err(_) => self,
        }
    }

    #[must_use]
    pub fn previews(mut self, previews: PreviewSchema) -> Self {
        self.data.previews = Some(previews);
        self
    }

    #[must_use]
    pub fn focus(mut self, path: &str) -> Self {
        self.data.focus = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn template(mut self, name: &str) -> Self {
        self.data.template = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.data.filesystem = Some(FilesystemSchema { watch });
        self
    }

    #[must_use]
    pub fn build(self) -> Lesson {
        Lesson {
            id: self.id,
            title: self.title,
            data: self.data,
        }
    }
}

#[derive(Default)]
struct Content {
    templates: HashMap<String, Files>,
    files: HashMap<String, Files>,
    solutions: HashMap<String, Files>,
}

/// [`LessonLoader`] serving fixed content keyed by lesson id.
#[derive(Default)]
pub struct StaticLoader {
    content: Mutex<Content>,
}

impl StaticLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template(self, name: &str, files: Files) -> Self {
        self.lock().templates.insert(name.to_string(), files);
        self
    }

    #[must_use]
    pub fn with_lesson(self, id: &str, files: Files, solution: Files) -> Self {
        {
            let mut content = self.lock();
            content.files.insert(id.to_string(), files);
            content.solutions.insert(id.to_string(), solution);
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Content> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing(kind: &str, name: &str) -> RunnerError {
    RunnerError::io(format!("unknown {kind}"), name)
}

#[async_trait]
impl LessonLoader for StaticLoader {
    async fn template(&self, name: &str) -> RunnerResult<Files> {
        self.lock()
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| missing("template", name))
    }

    async fn files(&self, lesson: &Lesson) -> RunnerResult<Files> {
        self.lock()
            .files
            .get(&lesson.id)
            .cloned()
            .ok_or_else(|| missing("lesson", &lesson.id))
    }

    async fn solution(&self, lesson: &Lesson) -> RunnerResult<Files> {
        Ok(self.lock().solutions.get(&lesson.id).cloned().unwrap_or_default())
    }
}
