//! Embedded task commands in model output.
//!
//! The model signals task-list mutations inline, as a sentinel immediately
//! followed by a single JSON object:
//!
//! ```text
//! @@JARVIS_TASK@@::{"action":"add","task":"Buy milk"}
//! ```
//!
//! The payload is located with a bracket-balanced scanner that understands
//! JSON string literals, so a `}` inside a task description does not end the
//! object early. Commands that parse are removed from the displayed text;
//! commands that do not parse are left where they are.

use serde_json::Value;
use thiserror::Error;

use crate::tasks::TaskStore;

/// Sentinel opening an embedded command.
pub const TASK_COMMAND_SENTINEL: &str = "@@JARVIS_TASK@@";

/// Separator between the sentinel and the JSON payload.
pub const TASK_COMMAND_SEPARATOR: &str = "::";

/// Kind of task mutation requested by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Append a new task.
    AddTask,
    /// Complete the first matching open task.
    CompleteTask,
}

/// A validated task command, applied once and then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Requested mutation.
    pub kind: ActionKind,
    /// Task text (for `AddTask`) or search phrase (for `CompleteTask`).
    pub task_description: String,
}

/// Result of applying a [`PendingAction`] to a task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    /// The action that was applied.
    pub action: PendingAction,
    /// Whether the task store changed.
    pub changed: bool,
}

/// Why an embedded command was not turned into an action.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The sentinel was not followed by a complete JSON object.
    #[error("command at byte {offset} has no complete JSON object")]
    Unterminated {
        /// Byte offset of the sentinel.
        offset: usize,
    },
    /// The captured span is not valid JSON.
    #[error("command at byte {offset} is not valid JSON: {source}")]
    InvalidJson {
        /// Byte offset of the sentinel.
        offset: usize,
        /// Parser error.
        source: serde_json::Error,
    },
    /// Valid JSON without the expected `action`/`task` shape.
    #[error("command at byte {offset} has an invalid shape: {reason}")]
    InvalidShape {
        /// Byte offset of the sentinel.
        offset: usize,
        /// What was wrong.
        reason: String,
    },
}

/// Outcome of scanning a final response text.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Text to display, with parsed commands removed.
    pub cleaned_text: String,
    /// Valid actions, in text order.
    pub actions: Vec<PendingAction>,
    /// Commands that were ignored.
    pub failures: Vec<CommandError>,
}

/// Scan `text` for embedded commands.
///
/// Every sentinel occurrence is examined in order. A command whose JSON parses
/// is removed from the cleaned text even if its shape is then rejected; a
/// command whose JSON does not parse stays in the text verbatim.
#[must_use]
pub fn extract_actions(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let mut cleaned = String::with_capacity(text.len());
    let mut copied_up_to = 0;
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find(TASK_COMMAND_SENTINEL) {
        let start = search_from + rel;
        let after_sentinel = start + TASK_COMMAND_SENTINEL.len();

        let Some(payload_range) = locate_payload(text, after_sentinel) else {
            extraction
                .failures
                .push(CommandError::Unterminated { offset: start });
            search_from = after_sentinel;
            continue;
        };

        let payload = &text[payload_range.0..payload_range.1];
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                match validate_shape(&value) {
                    Ok(action) => extraction.actions.push(action),
                    Err(reason) => extraction
                        .failures
                        .push(CommandError::InvalidShape { offset: start, reason }),
                }
                cleaned.push_str(&text[copied_up_to..start]);
                copied_up_to = payload_range.1;
            }
            Err(source) => extraction
                .failures
                .push(CommandError::InvalidJson { offset: start, source }),
        }
        search_from = payload_range.1;
    }

    if copied_up_to == 0 {
        extraction.cleaned_text = text.to_string();
        return extraction;
    }
    cleaned.push_str(&text[copied_up_to..]);
    extraction.cleaned_text = cleaned.trim_end().to_string();
    extraction
}

/// Apply one action to a task store.
pub fn apply_action<S>(store: &mut S, action: PendingAction) -> AppliedAction
where
    S: TaskStore + ?Sized,
{
    let changed = match action.kind {
        ActionKind::AddTask => store.add_task(&action.task_description).is_some(),
        ActionKind::CompleteTask => store.find_and_complete_task(&action.task_description),
    };
    AppliedAction { action, changed }
}

/// Text safe to show while a response is still streaming.
///
/// Cuts at the first sentinel, and also holds back a trailing fragment that
/// could be the start of a sentinel split across chunks.
#[must_use]
pub fn strip_partial_command(text: &str) -> &str {
    if let Some(pos) = text.find(TASK_COMMAND_SENTINEL) {
        return &text[..pos];
    }
    for len in (1..TASK_COMMAND_SENTINEL.len()).rev() {
        if text.ends_with(&TASK_COMMAND_SENTINEL[..len]) {
            return &text[..text.len() - len];
        }
    }
    text
}

/// Find the JSON object following `sentinel::` starting at `from`.
///
/// Returns the byte range of the object, braces included.
fn locate_payload(text: &str, from: usize) -> Option<(usize, usize)> {
    let rest = text[from..].strip_prefix(TASK_COMMAND_SEPARATOR)?;
    let separator_end = text.len() - rest.len();
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let open = separator_end + (rest.len() - trimmed.len());
    if !trimmed.starts_with('{') {
        return None;
    }
    let close = balanced_object_end(&text[open..])?;
    Some((open, open + close))
}

/// Length of the balanced JSON object at the start of `s`, if it closes.
fn balanced_object_end(s: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, byte) in s.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_shape(value: &Value) -> Result<PendingAction, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "payload is not an object".to_string())?;

    let kind = match object.get("action").and_then(Value::as_str) {
        Some("add") => ActionKind::AddTask,
        Some("complete") => ActionKind::CompleteTask,
        Some(other) => return Err(format!("unknown action {other:?}")),
        None => return Err("missing string field `action`".to_string()),
    };

    let task = object
        .get("task")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing non-empty string field `task`".to_string())?;

    Ok(PendingAction {
        kind,
        task_description: task.to_string(),
    })
}
