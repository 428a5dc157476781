//! Search and priority filtering for the board view.

use taskboard_proto::task::{Task, TaskPriority, TaskStatus};

/// The board's search box plus priority chip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Case-insensitive title substring. Blank matches everything.
    pub search: String,
    /// Only tasks with this priority, when set.
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    /// A filter on title text.
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: text.into(),
            priority: None,
        }
    }

    /// Restricts to one priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns `true` if `task` passes the filter.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        let needle = self.search.trim().to_lowercase();
        (needle.is_empty() || task.title.to_lowercase().contains(&needle))
            && self.priority.is_none_or(|p| task.priority == p)
    }

    /// Splits `tasks` into one column per status, in board order,
    /// keeping only tasks that pass. Input order is preserved per column.
    #[must_use]
    pub fn columns(&self, tasks: &[Task]) -> Vec<(TaskStatus, Vec<Task>)> {
        TaskStatus::ALL
            .iter()
            .map(|status| {
                let column = tasks
                    .iter()
                    .filter(|t| t.status == *status && self.matches(t))
                    .cloned()
                    .collect();
                (*status, column)
            })
            .collect()
    }
}
