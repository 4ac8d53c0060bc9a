//! Task model and run-condition evaluation.
//!
//! A [`Task`] is the schedulable unit handed to agents. The queue never
//! interprets `data` beyond handing it back unchanged; dependency gating
//! only looks at `dependencies`, `dep_status`, and `run_on`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terminal outcome of a task, recorded into its dependents' `dep_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failure,
    Skipped,
}

/// The schedulable unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Opaque serialized workflow definition.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Capability requirements used for agent matching.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// IDs of tasks this task depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Terminal outcome of each finished dependency. Populated
    /// incrementally by the queue as dependencies complete.
    #[serde(default)]
    pub dep_status: HashMap<String, TaskStatus>,
    /// Dependency outcomes under which this task may still execute.
    /// Empty means "success only".
    #[serde(default)]
    pub run_on: Vec<TaskStatus>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Whether this task lists `id` as a dependency.
    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d == id)
    }

    /// Decide whether the task should execute given its dependencies'
    /// terminal outcomes. Consulted once the task has been dispatched,
    /// before real execution begins.
    ///
    /// A task that runs on both success and failure always executes. A
    /// success-only task requires every dependency to have succeeded; a
    /// failure-only task requires at least one dependency that did not
    /// succeed. A `skipped` dependency counts as "not success" in both
    /// directions, so failure-triggered tasks still fire behind a skipped
    /// upstream while ordinary tasks do not.
    pub fn should_run(&self) -> bool {
        let on_failure = self.run_on.contains(&TaskStatus::Failure);
        let on_success = self.run_on.contains(&TaskStatus::Success) || self.run_on.is_empty();

        match (on_success, on_failure) {
            (true, true) => true,
            (true, false) => self
                .dependencies
                .iter()
                .all(|d| self.dep_status.get(d) == Some(&TaskStatus::Success)),
            (false, true) => self
                .dependencies
                .iter()
                .any(|d| self.dep_status.get(d) != Some(&TaskStatus::Success)),
            (false, false) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task_with_dep(status: TaskStatus, run_on: Vec<TaskStatus>) -> Task {
        let mut task = Task::new("2");
        task.dependencies = vec!["1".to_string()];
        task.dep_status.insert("1".to_string(), status);
        task.run_on = run_on;
        task
    }

    #[test]
    fn test_should_run_truth_table() {
        // dep success, run on failure only
        let t = task_with_dep(TaskStatus::Success, vec![TaskStatus::Failure]);
        assert_eq!(t.should_run(), false);

        // dep success, run on both
        let t = task_with_dep(
            TaskStatus::Success,
            vec![TaskStatus::Failure, TaskStatus::Success],
        );
        assert_eq!(t.should_run(), true);

        // dep failure, default run-on
        let t = task_with_dep(TaskStatus::Failure, vec![]);
        assert_eq!(t.should_run(), false);

        // dep success, run on success
        let t = task_with_dep(TaskStatus::Success, vec![TaskStatus::Success]);
        assert_eq!(t.should_run(), true);

        // dep failure, run on failure
        let t = task_with_dep(TaskStatus::Failure, vec![TaskStatus::Failure]);
        assert_eq!(t.should_run(), true);

        // dep skipped, default run-on
        let t = task_with_dep(TaskStatus::Skipped, vec![]);
        assert_eq!(t.should_run(), false);

        // dep skipped, run on failure
        let t = task_with_dep(TaskStatus::Skipped, vec![TaskStatus::Failure]);
        assert_eq!(t.should_run(), true);
    }

    #[test]
    fn test_no_dependencies() {
        // success-only with no dependencies runs unconditionally
        let t = Task::new("1");
        assert!(t.should_run());

        // failure-only with no dependencies never runs
        let mut t = Task::new("1");
        t.run_on = vec![TaskStatus::Failure];
        assert!(!t.should_run());
    }

    #[test]
    fn test_unreported_dependency_counts_as_not_success() {
        let mut t = Task::new("2");
        t.dependencies = vec!["1".to_string()];
        assert!(!t.should_run());

        t.run_on = vec![TaskStatus::Failure];
        assert!(t.should_run());
    }
}
