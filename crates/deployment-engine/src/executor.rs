//! Recursive execution of workflow trees.

use crate::action::Action;
use crate::context::DeploymentContext;
use crate::Error;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Executes [`Action`] trees against a shared deployment context.
///
/// Sequences run children in order and stop at the first failure (or at
/// cancellation, checked between children). Parallel groups spawn all
/// children, let every child run to completion, and report the first
/// failure observed.
#[derive(Clone)]
pub struct ActionExecutor {
    ctx: Arc<DeploymentContext>,
}

impl ActionExecutor {
    /// Create an executor over the deployment context
    pub(crate) fn new(ctx: Arc<DeploymentContext>) -> Self {
        Self { ctx }
    }

    /// Execute an action tree to completion
    pub fn execute(&self, action: Action) -> BoxFuture<'static, Result<(), Error>> {
        let executor = self.clone();
        Box::pin(async move {
            match action {
                Action::Task(task) => {
                    debug!(task = %task, "executing task");
                    task.run(&executor.ctx).await
                }
                Action::Sequence(children) => {
                    for child in children {
                        if executor.ctx.cancel.is_cancelled() {
                            return Err(Error::Interrupted);
                        }
                        executor.execute(child).await?;
                    }
                    Ok(())
                }
                Action::Parallel(children) => {
                    let handles: Vec<_> = children
                        .into_iter()
                        .map(|child| tokio::spawn(executor.execute(child)))
                        .collect();
                    let mut first_error = None;
                    for handle in handles {
                        let result = handle
                            .await
                            .map_err(|e| Error::Internal(format!("task panicked: {e}")))
                            .and_then(|r| r);
                        if first_error.is_none() {
                            first_error = result.err();
                        }
                    }
                    match first_error {
                        Some(error) => Err(error),
                        None => Ok(()),
                    }
                }
            }
        })
    }
}
