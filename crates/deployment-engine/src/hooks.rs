//! Deployment lifecycle hooks.
//!
//! Hooks observe the workflow without steering it: every registered hook
//! fires for every event, and hook failures are logged rather than
//! propagated so observers can never wedge a deployment.

use crate::ConnectionRegistry;
use async_trait::async_trait;
use topology_model::InstanceModel;

/// The instance or relationship an operation acts upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationSubject {
    /// A node instance lifecycle or custom operation
    Node {
        /// Id of the node instance
        instance_id: String,
    },
    /// A relationship configure/link operation
    Relationship {
        /// Id of the relationship instance
        relationship_id: String,
    },
}

/// Describes an operation about to run or just finished
#[derive(Debug, Clone)]
pub struct OperationEvent {
    /// What the operation acts upon
    pub subject: OperationSubject,
    /// Interface the operation belongs to
    pub interface: String,
    /// Operation name
    pub operation: String,
    /// Whether the operation succeeded (after-events only)
    pub succeeded: Option<bool>,
}

/// Observer of deployment lifecycle events.
///
/// All methods default to no-ops so implementations only override the
/// events they care about.
#[async_trait]
pub trait DeploymentHook: Send + Sync {
    /// Called once after the connection registry is assembled
    async fn post_construct(&self, _connections: &ConnectionRegistry) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the instance model is materialized
    async fn post_construct_instances(&self, _model: &InstanceModel) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before each operation runs
    async fn before_operation(
        &self,
        _event: &OperationEvent,
        _model: &InstanceModel,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after each operation finishes, success or failure
    async fn after_operation(
        &self,
        _event: &OperationEvent,
        _model: &InstanceModel,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
