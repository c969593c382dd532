//! In-memory task list.

use serde::{Deserialize, Serialize};

use crate::core::ids::TaskId;

use super::TaskStore;

/// One entry of the task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Unique identifier.
    pub id: TaskId,
    /// Task description.
    pub text: String,
    /// Whether the task is done.
    pub completed: bool,
}

/// Task list in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskList {
    items: Vec<TaskItem>,
}

impl TaskList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All tasks, insertion order.
    #[must_use]
    pub fn items(&self) -> &[TaskItem] {
        &self.items
    }

    /// Look up a task.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&TaskItem> {
        self.items.iter().find(|t| t.id == id)
    }

    /// Flip a task between open and done. Returns the new state, or `None` for
    /// an unknown id.
    pub fn toggle(&mut self, id: TaskId) -> Option<bool> {
        let task = self.items.iter_mut().find(|t| t.id == id)?;
        task.completed = !task.completed;
        Some(task.completed)
    }

    /// Drop every completed task. Returns how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|t| !t.completed);
        before - self.items.len()
    }

    /// Number of open tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|t| !t.completed).count()
    }

    /// Number of completed tasks.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.items.len() - self.pending_count()
    }

    /// Descriptions of open tasks, insertion order.
    #[must_use]
    pub fn pending_texts(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|t| !t.completed)
            .map(|t| t.text.clone())
            .collect()
    }

    /// Whether the list has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl TaskStore for TaskList {
    fn add_task(&mut self, text: &str) -> Option<TaskId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let id = TaskId::new();
        self.items.push(TaskItem {
            id,
            text: text.to_string(),
            completed: false,
        });
        tracing::debug!(%id, "task added");
        Some(id)
    }

    fn find_and_complete_task(&mut self, phrase: &str) -> bool {
        let needle = phrase.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        match self
            .items
            .iter_mut()
            .find(|t| !t.completed && t.text.to_lowercase().contains(&needle))
        {
            Some(task) => {
                task.completed = true;
                tracing::debug!(id = %task.id, "task completed");
                true
            }
            None => false,
        }
    }
}
