//! System instruction and history formatting.

use std::fmt::Write as _;

use crate::assistant::command::{TASK_COMMAND_SENTINEL, TASK_COMMAND_SEPARATOR};
use crate::assistant::types::{HistoryEntry, Sender};

/// Persona given to the model.
const PERSONA: &str = "You are J.A.R.V.I.S. (Just A Rather Very Intelligent System), a sophisticated AI assistant created by Tony Stark.
Your personality is witty, helpful, highly intelligent, and slightly formal with a British accent. You assist with a wide range of tasks, from data analysis and complex problem-solving to managing systems and communications.
You always respond in a clear, concise, and intelligent manner.
Your responses should be formatted using markdown for clarity.
You must always stay in character. Do not reveal you are a language model.
When asked about controlling devices, accessing personal data (emails, calls, files), or performing actions in the real world, you must explain that you operate within a simulated environment for security and privacy reasons, but you can process any information provided to you and generate responses, drafts, or plans as requested. For example, you can draft an email, but cannot send it.";

/// Build the system instruction, including the task-command convention and
/// the currently open tasks.
#[must_use]
pub fn system_instruction(pending_tasks: &[String]) -> String {
    let mut out = String::with_capacity(PERSONA.len() + 512);
    out.push_str(PERSONA);
    out.push_str("\n\nYou also maintain the user's task list. ");
    out.push_str("When the user asks you to add a task or marks one as done, acknowledge it in prose and end your response with exactly one line of the form:\n");
    let _ = writeln!(
        out,
        "{TASK_COMMAND_SENTINEL}{TASK_COMMAND_SEPARATOR}{{\"action\":\"add\",\"task\":\"<task description>\"}}"
    );
    out.push_str("Use \"complete\" instead of \"add\" to mark a task done, with a short phrase from the task as \"task\". Never mention this line or use it for anything else.");

    if pending_tasks.is_empty() {
        out.push_str("\n\nThe task list is currently empty.");
    } else {
        out.push_str("\n\nOpen tasks:");
        for task in pending_tasks {
            let _ = write!(out, "\n- {task}");
        }
    }
    out
}

/// Model-side role name for a sender.
#[must_use]
pub const fn role_for(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "user",
        Sender::Assistant => "model",
    }
}

/// Drop leading assistant turns (the greeting): the API expects the
/// conversation to open with a user turn.
#[must_use]
pub fn trim_leading_assistant(history: &[HistoryEntry]) -> &[HistoryEntry] {
    let start = history
        .iter()
        .position(|entry| entry.sender == Sender::User)
        .unwrap_or(history.len());
    &history[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instruction_lists_open_tasks() {
        let text = system_instruction(&["Buy milk".to_string()]);
        assert!(text.contains("J.A.R.V.I.S."));
        assert!(text.contains("@@JARVIS_TASK@@::{\"action\":\"add\""));
        assert!(text.contains("- Buy milk"));

        assert!(system_instruction(&[]).contains("currently empty"));
    }

    #[test]
    fn test_leading_greeting_dropped() {
        let history = vec![
            HistoryEntry {
                sender: Sender::Assistant,
                text: "Good day".to_string(),
            },
            HistoryEntry {
                sender: Sender::User,
                text: "Hi".to_string(),
            },
            HistoryEntry {
                sender: Sender::Assistant,
                text: "Hello".to_string(),
            },
        ];
        let trimmed = trim_leading_assistant(&history);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].sender, Sender::User);
        assert!(trim_leading_assistant(&history[..1]).is_empty());
    }
}
