//! Workflow run records and bounded run history.

use crate::workflow::WorkflowOperation;
use crate::Error;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

const MAX_RUN_HISTORY: usize = 50;

/// Outcome of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Still executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Interrupted by a cancel request
    Cancelled,
}

/// An error captured during a run
#[derive(Debug, Clone)]
pub struct RunError {
    /// When the error occurred
    pub at: DateTime<Utc>,
    /// Rendered error message
    pub message: String,
}

/// Record of one workflow run
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    /// Unique run id
    pub id: Uuid,
    /// What the run was doing
    pub operation: WorkflowOperation,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished, if it has
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: RunStatus,
    /// Errors captured during the run
    pub errors: Vec<RunError>,
}

/// Bounded history of workflow runs
#[derive(Default)]
pub struct RunTracker {
    runs: Mutex<VecDeque<WorkflowRun>>,
}

impl RunTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a run and return its id
    pub fn start(&self, operation: WorkflowOperation) -> Uuid {
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            operation,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::InProgress,
            errors: Vec::new(),
        };
        let id = run.id;
        let mut runs = self.runs.lock().unwrap();
        runs.push_back(run);
        while runs.len() > MAX_RUN_HISTORY {
            runs.pop_front();
        }
        id
    }

    /// Record the outcome of a run
    pub fn finish(&self, id: Uuid, result: &Result<(), Error>) {
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.iter_mut().find(|r| r.id == id) else {
            return;
        };
        run.completed_at = Some(Utc::now());
        match result {
            Ok(()) => run.status = RunStatus::Completed,
            Err(error) => {
                run.status = if error.is_interrupted() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                run.errors.push(RunError {
                    at: Utc::now(),
                    message: error.to_string(),
                });
            }
        }
    }

    /// Snapshot of a run by id
    pub fn run(&self, id: Uuid) -> Option<WorkflowRun> {
        self.runs.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of all recorded runs, oldest first
    pub fn runs(&self) -> Vec<WorkflowRun> {
        self.runs.lock().unwrap().iter().cloned().collect()
    }
}
