//! Chat command parsing.

/// A parsed chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`: greeting plus the project list.
    Start,
    /// `/projects`
    Projects,
    /// `/cd [name]`; no name switches to the root.
    Cd(Option<String>),
    /// `/create <name>`
    Create(Option<String>),
    /// `/status`
    Status,
    /// `/stop [id|project]`; no argument stops the current directory.
    Stop(Option<String>),
    /// `/help`
    Help,
    /// Anything that is not a command runs as a task.
    Task(String),
    /// A slash command we do not know.
    Unknown(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Self::Task(text.to_string());
        };

        let (head, arg) = match rest.split_once(char::is_whitespace) {
            Some((head, arg)) => (head, arg.split_whitespace().next().map(str::to_string)),
            None => (rest, None),
        };
        // Group chats address commands as /cmd@BotName.
        let name = head.split('@').next().unwrap_or(head);

        match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "projects" => Self::Projects,
            "cd" => Self::Cd(arg),
            "create" => Self::Create(arg),
            "status" => Self::Status,
            "stop" => Self::Stop(arg),
            "help" => Self::Help,
            _ => Self::Unknown(name.to_string()),
        }
    }
}

pub const HELP: &str = "\
Send any text to queue it as a task in the current directory.

/projects - list project directories
/cd <name> - switch to a project (/cd alone returns to the root)
/create <name> - create a project directory
/status - show running and queued tasks
/stop [id|project] - stop a task by id, or everything in a project
/help - show this message";
