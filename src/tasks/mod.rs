//! Side task list maintained by the user and by embedded model commands.

pub mod list;

pub use list::{TaskItem, TaskList};

use crate::core::ids::TaskId;

/// Task mutations available to the response assembler.
pub trait TaskStore {
    /// Append an open task. Blank text is rejected with `None`.
    fn add_task(&mut self, text: &str) -> Option<TaskId>;

    /// Complete the first open task whose text contains `phrase`
    /// (case-insensitive). Returns whether a task was completed.
    fn find_and_complete_task(&mut self, phrase: &str) -> bool;
}
