//! # Deployment Engine
//!
//! Dependency-ordered deployment orchestration over a typed topology.
//!
//! Given an instance model from `topology-model`, this crate builds task
//! trees for install/uninstall/scale workflows, executes them with
//! parallel/sequential composition on the tokio worker pool, drives each
//! instance through its lifecycle state machine, wraps every provider call
//! with retry and cool-down semantics, and caches expensive provider
//! connections per target.
//!
//! ## Example
//!
//! ```rust,no_run
//! use deployment_engine::{DeploymentOrchestrator, OperationRegistry};
//! use topology_model::{Node, Topology};
//!
//! # async fn example() -> Result<(), deployment_engine::Error> {
//! let topology = Topology::new("demo").with_node(Node::new("server", "compute"));
//!
//! let mut operations = OperationRegistry::new();
//! operations.register_fn("compute", "Standard", "create", |ctx| async move {
//!     ctx.set_attribute("ip", "10.0.0.4".into()).await
//! });
//!
//! let orchestrator = DeploymentOrchestrator::builder(topology)
//!     .operations(operations)
//!     .build()
//!     .await?;
//! orchestrator.install().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod action;
mod cancel;
mod connection;
mod context;
mod executor;
mod hooks;
mod operations;
mod orchestrator;
mod persistence;
mod retry;
mod run;
mod task;
mod workflow;

pub use action::Action;
pub use cancel::CancelToken;
pub use connection::{Connection, ConnectionFactory, ConnectionRegistry, TargetConfig};
pub use context::AttributeRefresher;
pub use hooks::{DeploymentHook, OperationEvent, OperationSubject};
pub use operations::{
    CONFIGURE_INTERFACE, OperationContext, OperationHandler, OperationRegistry, STANDARD_INTERFACE,
};
pub use orchestrator::{DeploymentOrchestrator, DeploymentOrchestratorBuilder};
pub use persistence::{MemoryStore, PersistenceStore};
pub use retry::{RetryEligibility, RetryPolicy, retry};
pub use run::{RunError, RunStatus, RunTracker, WorkflowRun};
pub use task::Task;
pub use workflow::WorkflowOperation;

/// Error types for deployment engine operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Instance model errors; wrong-state transitions in particular indicate
    /// an orchestrator bug and are never retried
    #[error(transparent)]
    Model(#[from] topology_model::Error),

    /// Configuration error (bad usage, aborts before any task executes)
    #[error("configuration error: {0}")]
    Config(String),

    /// No handler registered for a custom operation
    #[error("operation not found: {type_key}/{interface}.{operation}")]
    OperationNotFound {
        /// Implementing type key
        type_key: String,
        /// Interface name
        interface: String,
        /// Operation name
        operation: String,
    },

    /// A scale request outside the node's declared instance bounds
    #[error(
        "invalid scale target for '{node}': requested {requested}, allowed {min}..={max}"
    )]
    InvalidScaleTarget {
        /// Node template name
        node: String,
        /// Requested instance count
        requested: u32,
        /// Declared minimum
        min: u32,
        /// Declared maximum
        max: u32,
    },

    /// A second workflow was started while one is already running
    #[error("concurrent workflow execution on deployment '{deployment}'")]
    ConcurrentWorkflow {
        /// Deployment name
        deployment: String,
    },

    /// The dependency graph contains a cycle (construction-time fatal)
    #[error("circular dependency detected among instances: {remaining}")]
    CircularDependency {
        /// Instances that could never become ready
        remaining: String,
    },

    /// No target configuration registered under the given name
    #[error("target configuration not found: {target}")]
    TargetNotFound {
        /// Target name
        target: String,
    },

    /// A provider operation failed
    #[error("operation '{operation}' failed on '{component}': {message}")]
    Provider {
        /// Failing instance or relationship id
        component: String,
        /// Failing operation name
        operation: String,
        /// Provider-supplied failure message
        message: String,
        /// Whether the failure is transient and eligible for retry
        transient: bool,
    },

    /// The workflow run was cancelled; never retried, always propagated
    #[error("workflow interrupted")]
    Interrupted,

    /// Invariant violation inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a transient (retryable) provider failure
    pub fn transient(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Provider {
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Build a permanent (non-retryable) provider failure
    pub fn provider_failure(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Provider {
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Retryability is a property of the error value, not of its type name
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider { transient: true, .. })
    }

    /// Whether this is the distinct interruption error
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
