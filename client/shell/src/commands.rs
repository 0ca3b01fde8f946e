//! Input Line Parsing
//!
//! A line starting with `/` is a command; anything else is a question.

use std::path::PathBuf;

use kb_client_core::ScopeMode;
use thiserror::Error;

/// What the user asked the shell to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Submit a question
    Ask(String),
    /// Stop the streaming answer
    Cancel,
    /// Refresh and list documents
    Docs,
    /// Upload a file
    Upload(PathBuf),
    /// Delete a document by ID
    Delete(String),
    /// Toggle selection of a document
    Select(String),
    /// Choose which documents answers come from
    Scope(ScopeMode),
    /// Query backend health
    Health,
    /// Forget the conversation
    Clear,
    /// Show command help
    Help,
    /// Exit
    Quit,
}

/// Rejected input line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No such command
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
    /// The command needs an argument
    #[error("/{command} needs {argument}")]
    MissingArgument {
        /// Command name
        command: &'static str,
        /// What was expected
        argument: &'static str,
    },
    /// `/scope` with something other than `all` or `selected`
    #[error("scope must be 'all' or 'selected', got '{0}'")]
    InvalidScope(String),
}

/// Help text listing every command
pub const HELP: &str = "\
Type a question to ask it. Commands:
  /cancel            stop the current answer
  /docs              list documents ([x] = selected)
  /upload <path>     upload a file for indexing
  /delete <id>       delete a document
  /select <id>       toggle a document's selection
  /scope all|selected  answer from all or only selected documents
  /health            backend status
  /clear             start a new conversation
  /quit              exit";

/// Parse one input line
///
/// Blank lines parse to `None`.
///
/// # Errors
///
/// Returns [`CommandError`] for an unknown command or a bad argument.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Ask(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "cancel" => Command::Cancel,
        "docs" => Command::Docs,
        "upload" => Command::Upload(PathBuf::from(required(arg, "upload", "a file path")?)),
        "delete" => Command::Delete(required(arg, "delete", "a document ID")?.to_string()),
        "select" => Command::Select(required(arg, "select", "a document ID")?.to_string()),
        "scope" => match required(arg, "scope", "'all' or 'selected'")? {
            "all" => Command::Scope(ScopeMode::All),
            "selected" => Command::Scope(ScopeMode::Selected),
            other => return Err(CommandError::InvalidScope(other.to_string())),
        },
        "health" => Command::Health,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required<'a>(
    arg: &'a str,
    command: &'static str,
    argument: &'static str,
) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument { command, argument })
    } else {
        Ok(arg)
    }
}
