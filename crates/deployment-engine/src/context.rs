//! Shared execution context threaded through workflow tasks.

use crate::hooks::{DeploymentHook, OperationEvent};
use crate::operations::OperationRegistry;
use crate::persistence::PersistenceStore;
use crate::retry::RetryPolicy;
use crate::{CancelToken, ConnectionRegistry, Error};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use topology_model::{InstanceModel, NodeState, RelationshipState};
use tracing::warn;

/// Refreshes instance attributes from the provider after an operation
/// settles, so computed values (addresses, generated ids) stay current.
#[async_trait]
pub trait AttributeRefresher: Send + Sync {
    /// Refresh the attributes of the given instance in the model
    async fn refresh(
        &self,
        instance_id: &str,
        model: &RwLock<InstanceModel>,
        connections: &ConnectionRegistry,
    ) -> Result<(), Error>;
}

/// Everything a running workflow task needs: the live model, the operation
/// registry, connections, hooks, persistence, and cancellation.
pub struct DeploymentContext {
    /// The live instance model
    pub model: Arc<RwLock<InstanceModel>>,
    /// Registered provider operations
    pub operations: Arc<OperationRegistry>,
    /// Per-target provider connections
    pub connections: Arc<ConnectionRegistry>,
    /// Lifecycle observers
    pub hooks: Vec<Arc<dyn DeploymentHook>>,
    /// State and output store
    pub store: Arc<dyn PersistenceStore>,
    /// Optional post-operation attribute refresh
    pub refresher: Option<Arc<dyn AttributeRefresher>>,
    /// Default retry policy for operations without per-instance overrides
    pub default_retry: RetryPolicy,
    /// Cooperative cancellation for the current run
    pub cancel: CancelToken,
}

impl DeploymentContext {
    /// Persist a node state change, logging store failures
    pub(crate) async fn persist_node_state(&self, instance_id: &str, state: NodeState) {
        if let Err(error) = self.store.save_instance_state(instance_id, state).await {
            warn!(instance = %instance_id, %error, "failed to persist instance state");
        }
    }

    /// Persist a relationship state change, logging store failures
    pub(crate) async fn persist_relationship_state(
        &self,
        relationship_id: &str,
        state: RelationshipState,
    ) {
        if let Err(error) = self
            .store
            .save_relationship_state(relationship_id, state)
            .await
        {
            warn!(relationship = %relationship_id, %error, "failed to persist relationship state");
        }
    }

    /// Fire all before-operation hooks; hook failures are logged, never
    /// propagated
    pub(crate) async fn fire_before(&self, event: &OperationEvent) {
        let snapshot = self.model.read().unwrap().clone();
        for hook in &self.hooks {
            if let Err(error) = hook.before_operation(event, &snapshot).await {
                warn!(operation = %event.operation, %error, "before-operation hook failed");
            }
        }
    }

    /// Fire all after-operation hooks
    pub(crate) async fn fire_after(&self, event: &OperationEvent) {
        let snapshot = self.model.read().unwrap().clone();
        for hook in &self.hooks {
            if let Err(error) = hook.after_operation(event, &snapshot).await {
                warn!(operation = %event.operation, %error, "after-operation hook failed");
            }
        }
    }

    /// Refresh attributes for an instance if a refresher is configured
    pub(crate) async fn refresh_attributes(&self, instance_id: &str) {
        if let Some(refresher) = &self.refresher {
            if let Err(error) = refresher
                .refresh(instance_id, &self.model, &self.connections)
                .await
            {
                warn!(instance = %instance_id, %error, "attribute refresh failed");
            }
        }
    }
}
