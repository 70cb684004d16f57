//! Composable workflow trees.

use crate::Task;

/// A workflow tree node: a single task, or an ordered/concurrent group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A single operation on an instance or relationship
    Task(Task),
    /// Children executed one after another; stops at the first failure
    Sequence(Vec<Action>),
    /// Children executed concurrently; all run to completion and the
    /// first failure is reported
    Parallel(Vec<Action>),
}

impl Action {
    /// An empty action that succeeds immediately
    pub fn noop() -> Self {
        Action::Sequence(Vec::new())
    }

    /// Number of tasks in the tree
    pub fn task_count(&self) -> usize {
        match self {
            Action::Task(_) => 1,
            Action::Sequence(children) | Action::Parallel(children) => {
                children.iter().map(Action::task_count).sum()
            }
        }
    }

    /// All tasks in the tree in depth-first order
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks = Vec::new();
        self.collect_tasks(&mut tasks);
        tasks
    }

    fn collect_tasks<'a>(&'a self, into: &mut Vec<&'a Task>) {
        match self {
            Action::Task(task) => into.push(task),
            Action::Sequence(children) | Action::Parallel(children) => {
                for child in children {
                    child.collect_tasks(into);
                }
            }
        }
    }
}
