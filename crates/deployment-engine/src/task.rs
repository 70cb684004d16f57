//! Workflow tasks: single operations on a node or relationship instance.
//!
//! A task brackets its provider call with lifecycle state transitions:
//! in-progress state before the call, settled state after it. Teardown
//! tasks are best-effort: they tolerate partially-deployed starting states
//! and settle even when the provider call fails, so an uninstall always
//! walks the whole model.

use crate::context::DeploymentContext;
use crate::hooks::{OperationEvent, OperationSubject};
use crate::operations::{CONFIGURE_INTERFACE, OperationContext, STANDARD_INTERFACE};
use crate::retry::{RetryEligibility, RetryPolicy, retry};
use crate::Error;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use topology_model::{NodeOperation, NodeState, RelationshipOperation, RelationshipState};
use tracing::{debug, info, warn};

/// A single unit of work in a workflow tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// A lifecycle operation on a node instance
    Node {
        /// Target node instance id
        instance_id: String,
        /// Lifecycle operation to run
        operation: NodeOperation,
    },
    /// A phased operation on a relationship instance
    Relationship {
        /// Target relationship instance id
        relationship_id: String,
        /// Relationship phase to run
        operation: RelationshipOperation,
    },
    /// A custom (non-lifecycle) operation on a node instance
    Custom {
        /// Target node instance id
        instance_id: String,
        /// Interface the operation belongs to
        interface: String,
        /// Operation name
        operation: String,
    },
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Node {
                instance_id,
                operation,
            } => write!(f, "{instance_id}.{operation}"),
            Task::Relationship {
                relationship_id,
                operation,
            } => write!(f, "{relationship_id}.{operation}"),
            Task::Custom {
                instance_id,
                interface,
                operation,
            } => write!(f, "{instance_id}.{interface}.{operation}"),
        }
    }
}

impl Task {
    /// Execute the task against the deployment context
    pub(crate) async fn run(&self, ctx: &DeploymentContext) -> Result<(), Error> {
        match self {
            Task::Node {
                instance_id,
                operation,
            } => run_node(ctx, instance_id, *operation).await,
            Task::Relationship {
                relationship_id,
                operation,
            } => run_relationship(ctx, relationship_id, *operation).await,
            Task::Custom {
                instance_id,
                interface,
                operation,
            } => run_custom(ctx, instance_id, interface, operation).await,
        }
    }
}

async fn run_node(
    ctx: &DeploymentContext,
    instance_id: &str,
    operation: NodeOperation,
) -> Result<(), Error> {
    let (type_key, properties) = {
        let mut model = ctx.model.write().unwrap();
        let state = model.instance(instance_id)?.state;
        if operation.is_teardown() {
            // Teardown walks partially-deployed models: stop only what is
            // (or was being) started, delete anything short of deleted.
            match operation {
                NodeOperation::Stop
                    if !matches!(state, NodeState::Started | NodeState::Starting) =>
                {
                    debug!(instance = instance_id, %state, "nothing to stop, skipping");
                    return Ok(());
                }
                NodeOperation::Delete if state == NodeState::Deleted => {
                    return Ok(());
                }
                _ => model.set_node_state(instance_id, operation.in_progress_state())?,
            }
        } else if node_already_settled(state, operation) {
            // resumed models skip work an earlier run completed
            debug!(instance = instance_id, %state, operation = operation.name(), "already settled, skipping");
            return Ok(());
        } else if state == operation.in_progress_state() {
            // an earlier run was interrupted mid-operation; run it again
            model.set_node_state(instance_id, state)?;
        } else {
            model.begin_node_operation(instance_id, operation)?;
        }
        let properties = model.instance(instance_id)?.properties.clone();
        (model.node_type_of(instance_id)?, properties)
    };
    ctx.persist_node_state(instance_id, operation.in_progress_state())
        .await;

    let event = OperationEvent {
        subject: OperationSubject::Node {
            instance_id: instance_id.to_string(),
        },
        interface: STANDARD_INTERFACE.to_string(),
        operation: operation.name().to_string(),
        succeeded: None,
    };
    ctx.fire_before(&event).await;

    let result = invoke_handler(
        ctx,
        &type_key,
        STANDARD_INTERFACE,
        operation.name(),
        event.subject.clone(),
        &properties,
    )
    .await;

    match result {
        Ok(()) => {
            {
                let mut model = ctx.model.write().unwrap();
                model.settle_node_operation(instance_id, operation)?;
            }
            ctx.persist_node_state(instance_id, operation.settled_state())
                .await;
            if !operation.is_teardown() {
                ctx.refresh_attributes(instance_id).await;
            }
            info!(instance = instance_id, operation = operation.name(), "operation completed");
            ctx.fire_after(&OperationEvent {
                succeeded: Some(true),
                ..event
            })
            .await;
            Ok(())
        }
        Err(error) if operation.is_teardown() && !error.is_interrupted() => {
            // Best-effort: record the failure but keep tearing down.
            warn!(
                instance = instance_id,
                operation = operation.name(),
                %error,
                "teardown operation failed, continuing"
            );
            {
                let mut model = ctx.model.write().unwrap();
                model.settle_node_operation(instance_id, operation)?;
            }
            ctx.persist_node_state(instance_id, operation.settled_state())
                .await;
            ctx.fire_after(&OperationEvent {
                succeeded: Some(false),
                ..event
            })
            .await;
            Ok(())
        }
        Err(error) => {
            // The instance stays in its in-progress state so a later
            // uninstall or resume can see how far deployment got.
            ctx.fire_after(&OperationEvent {
                succeeded: Some(false),
                ..event
            })
            .await;
            Err(error)
        }
    }
}

async fn run_relationship(
    ctx: &DeploymentContext,
    relationship_id: &str,
    operation: RelationshipOperation,
) -> Result<(), Error> {
    let (relationship_type, source_properties) = {
        let mut model = ctx.model.write().unwrap();
        let state = model.relationship(relationship_id)?.state;
        if operation == RelationshipOperation::Unlink
            && state != RelationshipState::Established
        {
            if state != RelationshipState::Initial {
                // Partially established: nothing was fully linked, so the
                // remove hooks have nothing to undo.
                debug!(
                    relationship = relationship_id,
                    %state,
                    "relationship never established, resetting without unlink hooks"
                );
                model.set_relationship_state(relationship_id, RelationshipState::Initial)?;
            }
            return Ok(());
        }
        if !operation.is_teardown() && relationship_already_settled(state, operation) {
            debug!(relationship = relationship_id, %state, operation = operation.name(), "already settled, skipping");
            return Ok(());
        }
        if operation.in_progress_states().contains(&state) {
            model.set_relationship_state(relationship_id, state)?;
        } else {
            model.begin_relationship_operation(relationship_id, operation)?;
        }
        let relationship = model.relationship(relationship_id)?;
        let relationship_type = relationship.relationship_type.clone();
        let source_id = relationship.source_id.clone();
        let source_properties = model.instance(&source_id)?.properties.clone();
        (relationship_type, source_properties)
    };
    if let Some(in_progress) = operation.in_progress_states().last() {
        ctx.persist_relationship_state(relationship_id, *in_progress)
            .await;
    }

    let event = OperationEvent {
        subject: OperationSubject::Relationship {
            relationship_id: relationship_id.to_string(),
        },
        interface: CONFIGURE_INTERFACE.to_string(),
        operation: operation.name().to_string(),
        succeeded: None,
    };
    ctx.fire_before(&event).await;

    let mut result = Ok(());
    for hook_operation in operation.hook_operations() {
        result = invoke_handler(
            ctx,
            &relationship_type,
            CONFIGURE_INTERFACE,
            hook_operation,
            event.subject.clone(),
            &source_properties,
        )
        .await;
        if result.is_err() {
            break;
        }
    }

    match result {
        Ok(()) => {
            {
                let mut model = ctx.model.write().unwrap();
                model.settle_relationship_operation(relationship_id, operation)?;
            }
            ctx.persist_relationship_state(relationship_id, operation.settled_state())
                .await;
            info!(
                relationship = relationship_id,
                operation = operation.name(),
                "relationship phase completed"
            );
            ctx.fire_after(&OperationEvent {
                succeeded: Some(true),
                ..event
            })
            .await;
            Ok(())
        }
        Err(error) if operation.is_teardown() && !error.is_interrupted() => {
            warn!(
                relationship = relationship_id,
                operation = operation.name(),
                %error,
                "unlink failed, continuing teardown"
            );
            {
                let mut model = ctx.model.write().unwrap();
                model.settle_relationship_operation(relationship_id, operation)?;
            }
            ctx.persist_relationship_state(relationship_id, operation.settled_state())
                .await;
            ctx.fire_after(&OperationEvent {
                succeeded: Some(false),
                ..event
            })
            .await;
            Ok(())
        }
        Err(error) => {
            ctx.fire_after(&OperationEvent {
                succeeded: Some(false),
                ..event
            })
            .await;
            Err(error)
        }
    }
}

async fn run_custom(
    ctx: &DeploymentContext,
    instance_id: &str,
    interface: &str,
    operation: &str,
) -> Result<(), Error> {
    let (type_key, properties) = {
        let model = ctx.model.read().unwrap();
        let properties = model.instance(instance_id)?.properties.clone();
        (model.node_type_of(instance_id)?, properties)
    };
    // Custom operations fail fast when unregistered, unlike lifecycle
    // operations which default to no-ops.
    ctx.operations.require(&type_key, interface, operation)?;

    let event = OperationEvent {
        subject: OperationSubject::Node {
            instance_id: instance_id.to_string(),
        },
        interface: interface.to_string(),
        operation: operation.to_string(),
        succeeded: None,
    };
    ctx.fire_before(&event).await;

    let result = invoke_handler(
        ctx,
        &type_key,
        interface,
        operation,
        event.subject.clone(),
        &properties,
    )
    .await;

    let succeeded = result.is_ok();
    if succeeded {
        ctx.refresh_attributes(instance_id).await;
    }
    ctx.fire_after(&OperationEvent {
        succeeded: Some(succeeded),
        ..event
    })
    .await;
    result
}

/// How far along the forward lifecycle a state is; teardown states have
/// no forward rank.
fn node_forward_rank(state: NodeState) -> Option<u8> {
    match state {
        NodeState::Initial => Some(0),
        NodeState::Creating => Some(1),
        NodeState::Created => Some(2),
        NodeState::Configuring => Some(3),
        NodeState::Configured => Some(4),
        NodeState::Starting => Some(5),
        NodeState::Started => Some(6),
        NodeState::Stopping | NodeState::Deleting | NodeState::Deleted => None,
    }
}

fn node_already_settled(state: NodeState, operation: NodeOperation) -> bool {
    match (
        node_forward_rank(state),
        node_forward_rank(operation.settled_state()),
    ) {
        (Some(current), Some(settled)) => current >= settled,
        _ => false,
    }
}

fn relationship_forward_rank(state: RelationshipState) -> Option<u8> {
    match state {
        RelationshipState::Initial => Some(0),
        RelationshipState::Establishing => Some(1),
        RelationshipState::PreConfiguring => Some(2),
        RelationshipState::PreConfigured => Some(3),
        RelationshipState::PostConfiguring => Some(4),
        RelationshipState::PostConfigured => Some(5),
        RelationshipState::Established => Some(6),
        RelationshipState::Unlinking => None,
    }
}

fn relationship_already_settled(state: RelationshipState, operation: RelationshipOperation) -> bool {
    match (
        relationship_forward_rank(state),
        relationship_forward_rank(operation.settled_state()),
    ) {
        (Some(current), Some(settled)) => current >= settled,
        _ => false,
    }
}

/// Look up and invoke a handler under the retry policy read from the
/// acting instance's properties. A missing lifecycle handler is a no-op.
async fn invoke_handler(
    ctx: &DeploymentContext,
    type_key: &str,
    interface: &str,
    operation: &str,
    subject: OperationSubject,
    properties: &Map<String, Value>,
) -> Result<(), Error> {
    let Some(handler) = ctx.operations.get(type_key, interface, operation) else {
        debug!(
            type_key,
            interface, operation, "no handler registered, treating as no-op"
        );
        return Ok(());
    };
    let policy = RetryPolicy::from_properties(properties, ctx.default_retry);
    let operation_ctx = OperationContext::new(
        subject,
        operation,
        Arc::clone(&ctx.model),
        Arc::clone(&ctx.connections),
        Arc::clone(&ctx.store),
    );
    let label = format!("{type_key}.{operation}");
    retry(
        &label,
        policy,
        RetryEligibility::TransientOnly,
        &ctx.cancel,
        || {
            let handler = Arc::clone(&handler);
            let operation_ctx = operation_ctx.clone();
            async move { handler.invoke(operation_ctx).await }
        },
    )
    .await
}
