//! Workflow tree construction from the instance model.
//!
//! Instances are scheduled in dependency waves: a wave holds every
//! instance whose (in-scope) dependencies have all been scheduled in
//! earlier waves. Waves run sequentially, instances within a wave run in
//! parallel, and each instance contributes a small sequential chain of
//! lifecycle tasks. Uninstall reuses the same waves in reverse.

use crate::action::Action;
use crate::Error;
use crate::Task;
use std::collections::BTreeSet;
use std::fmt;
use topology_model::{InstanceModel, NodeOperation, RelationshipOperation};

/// The workflow kinds an orchestrator can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOperation {
    /// Deploy the full topology
    Install,
    /// Tear the full topology down
    Uninstall,
    /// Change the instance count of one node template
    Scale {
        /// Node template being scaled
        node: String,
        /// Requested instance count
        target_count: u32,
    },
}

impl fmt::Display for WorkflowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowOperation::Install => write!(f, "install"),
            WorkflowOperation::Uninstall => write!(f, "uninstall"),
            WorkflowOperation::Scale { node, target_count } => {
                write!(f, "scale {node} to {target_count}")
            }
        }
    }
}

/// Builds install and uninstall trees over an instance model snapshot
pub(crate) struct WorkflowBuilder<'a> {
    model: &'a InstanceModel,
}

impl<'a> WorkflowBuilder<'a> {
    pub(crate) fn new(model: &'a InstanceModel) -> Self {
        Self { model }
    }

    /// Install tree over every instance in the model
    pub(crate) fn install_tree(&self) -> Result<Action, Error> {
        self.scoped_install(&self.full_scope())
    }

    /// Uninstall tree over every instance in the model
    pub(crate) fn uninstall_tree(&self) -> Result<Action, Error> {
        self.scoped_uninstall(&self.full_scope())
    }

    /// Install tree limited to the given instances (scale-up)
    pub(crate) fn scoped_install(&self, scope: &BTreeSet<String>) -> Result<Action, Error> {
        let waves = self.waves(scope)?;
        let mut stages = Vec::with_capacity(waves.len());
        for wave in waves {
            let chains = wave
                .into_iter()
                .map(|id| self.install_chain(&id, scope))
                .collect::<Vec<_>>();
            stages.push(Action::Parallel(chains));
        }
        Ok(Action::Sequence(stages))
    }

    /// Uninstall tree limited to the given instances (scale-down)
    pub(crate) fn scoped_uninstall(&self, scope: &BTreeSet<String>) -> Result<Action, Error> {
        let mut waves = self.waves(scope)?;
        waves.reverse();
        let mut stages = Vec::with_capacity(waves.len());
        for wave in waves {
            let chains = wave
                .into_iter()
                .map(|id| self.uninstall_chain(&id, scope))
                .collect::<Vec<_>>();
            stages.push(Action::Parallel(chains));
        }
        Ok(Action::Sequence(stages))
    }

    fn full_scope(&self) -> BTreeSet<String> {
        self.model.instance_ids().into_iter().collect()
    }

    /// Group the scope into dependency waves; only dependencies inside the
    /// scope constrain the ordering.
    fn waves(&self, scope: &BTreeSet<String>) -> Result<Vec<Vec<String>>, Error> {
        let mut remaining = scope.clone();
        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let mut ready = Vec::new();
            for id in &remaining {
                let blocked = match self.model.instance(id) {
                    Ok(instance) => instance.dependencies.iter().any(|d| remaining.contains(d)),
                    Err(error) => return Err(error.into()),
                };
                if !blocked {
                    ready.push(id.clone());
                }
            }
            if ready.is_empty() {
                return Err(Error::CircularDependency {
                    remaining: remaining.iter().cloned().collect::<Vec<_>>().join(", "),
                });
            }
            for id in &ready {
                remaining.remove(id);
            }
            waves.push(ready);
        }
        Ok(waves)
    }

    /// Lifecycle chain deploying one instance.
    ///
    /// Relationships the instance sources are bracketed around its own
    /// lifecycle: pre-configure after create, post-configure and link after
    /// start. Relationships sourced from outside the scope (an existing
    /// instance gaining a new target) are appended after the target starts.
    fn install_chain(&self, id: &str, scope: &BTreeSet<String>) -> Action {
        let mut steps = vec![node_task(id, NodeOperation::Create)];
        let sourced: Vec<String> = self
            .model
            .relationships_from(id)
            .iter()
            .map(|r| r.id.clone())
            .collect();
        for relationship_id in &sourced {
            steps.push(relationship_task(
                relationship_id,
                RelationshipOperation::PreConfigure,
            ));
        }
        steps.push(node_task(id, NodeOperation::Configure));
        steps.push(node_task(id, NodeOperation::Start));
        for relationship_id in &sourced {
            steps.push(relationship_task(
                relationship_id,
                RelationshipOperation::PostConfigure,
            ));
            steps.push(relationship_task(relationship_id, RelationshipOperation::Link));
        }
        // inbound relationships whose source sits outside the scope, e.g.
        // an already-running source linking to this freshly scaled target
        for relationship in self.model.relationships_to(id) {
            if scope.contains(&relationship.source_id) {
                continue;
            }
            for operation in [
                RelationshipOperation::PreConfigure,
                RelationshipOperation::PostConfigure,
                RelationshipOperation::Link,
            ] {
                steps.push(relationship_task(&relationship.id, operation));
            }
        }
        Action::Sequence(steps)
    }

    /// Teardown chain for one instance: unlink its relationships, then
    /// stop and delete it.
    fn uninstall_chain(&self, id: &str, scope: &BTreeSet<String>) -> Action {
        let mut steps = Vec::new();
        for relationship in self.model.relationships_from(id) {
            steps.push(relationship_task(&relationship.id, RelationshipOperation::Unlink));
        }
        // inbound relationships from sources that are staying behind
        for relationship in self.model.relationships_to(id) {
            if !scope.contains(&relationship.source_id) {
                steps.push(relationship_task(&relationship.id, RelationshipOperation::Unlink));
            }
        }
        steps.push(node_task(id, NodeOperation::Stop));
        steps.push(node_task(id, NodeOperation::Delete));
        Action::Sequence(steps)
    }
}

fn node_task(instance_id: &str, operation: NodeOperation) -> Action {
    Action::Task(Task::Node {
        instance_id: instance_id.to_string(),
        operation,
    })
}

fn relationship_task(relationship_id: &str, operation: RelationshipOperation) -> Action {
    Action::Task(Task::Relationship {
        relationship_id: relationship_id.to_string(),
        operation,
    })
}
