use serde::{Deserialize, Serialize};

/// A command as authored in lesson data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandInput {
    /// `"npm install"`
    Shell(String),
    /// `["npm install", "Installing dependencies"]`
    Titled(String, String),
    /// `{ command: "npm install", title: "Installing dependencies" }`
    Descriptor { command: String, title: String },
}

impl From<&str> for CommandInput {
    fn from(value: &str) -> Self {
        Self::Shell(value.to_string())
    }
}

/// Command section of lesson data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare_commands: Option<Vec<CommandInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_command: Option<CommandInput>,
}

/// Normalized command. Equality is structural over command text and title.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    shell_command: String,
    title: String,
}

impl Command {
    pub fn new(shell_command: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            shell_command: shell_command.into(),
            title: title.into(),
        }
    }

    #[must_use]
    pub fn from_input(input: &CommandInput) -> Self {
        match input {
            CommandInput::Shell(command) => Self::new(command.clone(), command.clone()),
            CommandInput::Titled(command, title)
            | CommandInput::Descriptor { command, title } => {
                Self::new(command.clone(), title.clone())
            }
        }
    }

    #[must_use]
    pub fn shell_command(&self) -> &str {
        &self.shell_command
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Blank commands hold a step slot without executing anything.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        !self.shell_command.trim().is_empty()
    }
}

/// Ordered pipeline: prepare commands, then the optional long-running main command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Commands {
    prepare: Vec<Command>,
    main: Option<Command>,
}

impl Commands {
    #[must_use]
    pub fn new(prepare: Vec<Command>, main: Option<Command>) -> Self {
        Self { prepare, main }
    }

    #[must_use]
    pub fn from_schema(schema: &CommandsSchema) -> Self {
        let prepare = schema
            .prepare_commands
            .iter()
            .flatten()
            .map(Command::from_input)
            .collect();
        let main = schema.main_command.as_ref().map(Command::from_input);
        Self { prepare, main }
    }

    #[must_use]
    pub fn prepare_commands(&self) -> &[Command] {
        &self.prepare
    }

    #[must_use]
    pub fn main_command(&self) -> Option<&Command> {
        self.main.as_ref()
    }

    /// Position of the main command when iterating, if there is one.
    #[must_use]
    pub fn main_index(&self) -> Option<usize> {
        self.main.as_ref().map(|_| self.prepare.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.prepare.iter().chain(self.main.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prepare.len() + usize::from(self.main.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Command> {
        self.iter().cloned().collect()
    }

    /// Structural change detection over runnable commands only.
    ///
    /// Toggling a blank placeholder slot never counts as a change.
    #[must_use]
    pub fn differs_from(&self, previous: Option<&Commands>) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        let current: Vec<&Command> = self.iter().filter(|c| c.is_runnable()).collect();
        let before: Vec<&Command> = previous.iter().filter(|c| c.is_runnable()).collect();
        current != before
    }

    /// Single shell line equivalent to running the whole pipeline.
    #[must_use]
    pub fn start_command(&self) -> String {
        self.iter()
            .filter(|c| c.is_runnable())
            .map(Command::shell_command)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl<'a> IntoIterator for &'a Commands {
    type Item = &'a Command;
    type IntoIter = std::iter::Chain<std::slice::Iter<'a, Command>, std::option::Iter<'a, Command>>;

    fn into_iter(self) -> Self::IntoIter {
        self.prepare.iter().chain(self.main.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(prepare: &[&str], main: Option<&str>) -> CommandsSchema {
        CommandsSchema {
            prepare_commands: Some(prepare.iter().map(|c| CommandInput::from(*c)).collect()),
            main_command: main.map(CommandInput::from),
        }
    }

    #[test]
    fn inputs_normalize_to_command_and_title() {
        let plain = Command::from_input(&CommandInput::from("npm install"));
        assert_eq!(plain.title(), "npm install");

        let titled = Command::from_input(&CommandInput::Titled(
            "npm install".into(),
            "Installing".into(),
        ));
        assert_eq!(titled.shell_command(), "npm install");
        assert_eq!(titled.title(), "Installing");
    }

    #[test]
    fn schema_accepts_all_input_shapes() {
        let parsed: CommandsSchema = serde_json::from_value(serde_json::json!({
            "prepareCommands": ["a", ["b", "Bee"], { "command": "c", "title": "See" }],
            "mainCommand": "serve"
        }))
        .unwrap_or_default();
        let commands = Commands::from_schema(&parsed);
        let titles: Vec<&str> = commands.iter().map(Command::title).collect();
        assert_eq!(titles, ["a", "Bee", "See", "serve"]);
        assert_eq!(commands.main_index(), Some(3));
    }

    #[test]
    fn main_command_is_always_last() {
        let commands = Commands::from_schema(&schema(&["one", "two"], Some("serve")));
        assert_eq!(commands.iter().last().map(Command::shell_command), Some("serve"));
        assert_eq!(commands.len(), 3);
    }

    #[test]
    fn blank_command_is_not_runnable() {
        assert!(!Command::new("  ", "install").is_runnable());
        assert!(Command::new("npm i", "install").is_runnable());
    }

    #[test]
    fn change_detection_is_reflexive() {
        let commands = Commands::from_schema(&schema(&["npm i"], Some("npm run dev")));
        assert!(!commands.differs_from(Some(&commands.clone())));
        assert!(commands.differs_from(None));
    }

    #[test]
    fn placeholder_slots_do_not_trigger_changes() {
        let with_placeholder = Commands::from_schema(&schema(&["", "npm i"], Some("dev")));
        let without = Commands::from_schema(&schema(&["npm i"], Some("dev")));
        assert!(!with_placeholder.differs_from(Some(&without)));
    }

    #[test]
    fn title_change_is_a_change() {
        let a = Commands::new(vec![Command::new("npm i", "Install")], None);
        let b = Commands::new(vec![Command::new("npm i", "Installing")], None);
        assert!(a.differs_from(Some(&b)));
    }

    #[test]
    fn start_command_joins_runnable_commands() {
        let commands = Commands::from_schema(&schema(&["npm i", ""], Some("npm start")));
        assert_eq!(commands.start_command(), "npm i && npm start");
    }
}
