//! Operation registry and handler invocation context.
//!
//! Generic operations are dispatched through an explicit registry mapping
//! `(type key, interface, operation)` to a callable, populated at deployment
//! construction time by generated code and providers. There is no runtime
//! reflection: a custom operation with no registered handler fails fast with
//! a clear "operation not found" error.

use crate::hooks::OperationSubject;
use crate::persistence::PersistenceStore;
use crate::{Connection, ConnectionRegistry, Error};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use topology_model::{InstanceModel, NodeInstance, RelationshipInstance};
use tracing::warn;

/// Interface name of the built-in node lifecycle operations
pub const STANDARD_INTERFACE: &str = "Standard";
/// Interface name of the relationship configure/link hooks
pub const CONFIGURE_INTERFACE: &str = "Configure";

/// A provider operation bound to an implementing type
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Invoke the operation.
    ///
    /// Transient failures should be reported with
    /// [`OperationContext::transient_error`] to be eligible for retry.
    async fn invoke(&self, ctx: OperationContext) -> Result<(), Error>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(OperationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn invoke(&self, ctx: OperationContext) -> Result<(), Error> {
        (self.0)(ctx).await
    }
}

type OperationKey = (String, String, String);

/// Registry mapping `(type key, interface, operation)` to handlers
#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<OperationKey, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn register(
        &mut self,
        type_key: impl Into<String>,
        interface: impl Into<String>,
        operation: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) {
        self.handlers
            .insert((type_key.into(), interface.into(), operation.into()), handler);
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(
        &mut self,
        type_key: impl Into<String>,
        interface: impl Into<String>,
        operation: impl Into<String>,
        handler: F,
    ) where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.register(type_key, interface, operation, Arc::new(FnHandler(handler)));
    }

    /// Look up a handler; `None` means the type does not implement the
    /// operation (a no-op for lifecycle operations of abstract types).
    pub fn get(
        &self,
        type_key: &str,
        interface: &str,
        operation: &str,
    ) -> Option<Arc<dyn OperationHandler>> {
        self.handlers
            .get(&(
                type_key.to_string(),
                interface.to_string(),
                operation.to_string(),
            ))
            .cloned()
    }

    /// Look up a handler for a custom operation, failing fast when missing
    pub fn require(
        &self,
        type_key: &str,
        interface: &str,
        operation: &str,
    ) -> Result<Arc<dyn OperationHandler>, Error> {
        self.get(type_key, interface, operation)
            .ok_or_else(|| Error::OperationNotFound {
                type_key: type_key.to_string(),
                interface: interface.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Context handed to an operation handler.
///
/// Handlers read their instance snapshot and properties, write attributes
/// (persisted through the store as a side effect), record deployment
/// outputs, and reach provider handles through the connection registry.
#[derive(Clone)]
pub struct OperationContext {
    subject: OperationSubject,
    operation: String,
    model: Arc<RwLock<InstanceModel>>,
    connections: Arc<ConnectionRegistry>,
    store: Arc<dyn PersistenceStore>,
}

impl OperationContext {
    pub(crate) fn new(
        subject: OperationSubject,
        operation: impl Into<String>,
        model: Arc<RwLock<InstanceModel>>,
        connections: Arc<ConnectionRegistry>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        Self {
            subject,
            operation: operation.into(),
            model,
            connections,
            store,
        }
    }

    /// The instance or relationship this operation acts upon
    pub fn subject(&self) -> &OperationSubject {
        &self.subject
    }

    /// Name of the operation being invoked
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Id of the acting node instance: the instance itself for node
    /// operations, the relationship source for relationship operations.
    pub fn instance_id(&self) -> String {
        match &self.subject {
            OperationSubject::Node { instance_id } => instance_id.clone(),
            OperationSubject::Relationship { relationship_id } => {
                let model = self.model.read().unwrap();
                model
                    .relationship(relationship_id)
                    .map(|r| r.source_id.clone())
                    .unwrap_or_else(|_| relationship_id.clone())
            }
        }
    }

    /// Snapshot of the acting node instance
    pub fn instance(&self) -> Result<NodeInstance, Error> {
        let id = self.instance_id();
        let model = self.model.read().unwrap();
        Ok(model.instance(&id)?.clone())
    }

    /// Snapshot of the relationship instance (relationship operations only)
    pub fn relationship(&self) -> Result<RelationshipInstance, Error> {
        match &self.subject {
            OperationSubject::Relationship { relationship_id } => {
                let model = self.model.read().unwrap();
                Ok(model.relationship(relationship_id)?.clone())
            }
            OperationSubject::Node { instance_id } => Err(Error::Internal(format!(
                "operation '{}' on '{instance_id}' has no relationship subject",
                self.operation
            ))),
        }
    }

    /// Snapshot of the relationship's target instance
    pub fn target_instance(&self) -> Result<NodeInstance, Error> {
        let relationship = self.relationship()?;
        let model = self.model.read().unwrap();
        Ok(model.instance(&relationship.target_id)?.clone())
    }

    /// Read a property of the acting instance
    pub fn property(&self, name: &str) -> Option<Value> {
        self.instance().ok().and_then(|i| i.property(name).cloned())
    }

    /// Read an attribute of the acting instance
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.instance().ok().and_then(|i| i.attribute(name).cloned())
    }

    /// Write an attribute of the acting instance.
    ///
    /// The write is persisted through the store; persistence failures are
    /// logged and never fail the operation.
    pub async fn set_attribute(&self, name: impl Into<String>, value: Value) -> Result<(), Error> {
        let id = self.instance_id();
        let attributes = {
            let mut model = self.model.write().unwrap();
            let instance = model.instance_mut(&id)?;
            instance.set_attribute(name, value);
            instance.attributes.clone()
        };
        if let Err(error) = self.store.save_instance_attributes(&id, &attributes).await {
            warn!(instance = %id, %error, "failed to persist attributes");
        }
        Ok(())
    }

    /// Write an attribute of the relationship instance
    pub async fn set_relationship_attribute(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), Error> {
        let OperationSubject::Relationship { relationship_id } = &self.subject else {
            return Err(Error::Internal(format!(
                "operation '{}' has no relationship subject",
                self.operation
            )));
        };
        let mut model = self.model.write().unwrap();
        model.relationship_mut(relationship_id)?.set_attribute(name, value);
        Ok(())
    }

    /// Record a deployment output
    pub async fn record_output(&self, name: &str, value: Value) {
        if let Err(error) = self.store.save_output(name, &value).await {
            warn!(output = name, %error, "failed to persist output");
        }
    }

    /// The per-target connection registry
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Get or create the connection for a provider target
    pub async fn connection(
        &self,
        target: &str,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<Arc<dyn Connection>, Error> {
        self.connections.get(target, overrides).await
    }

    /// Build a transient (retryable) failure for this operation
    pub fn transient_error(&self, message: impl Into<String>) -> Error {
        Error::transient(self.component(), &self.operation, message)
    }

    /// Build a permanent (non-retryable) failure for this operation
    pub fn permanent_error(&self, message: impl Into<String>) -> Error {
        Error::provider_failure(self.component(), &self.operation, message)
    }

    fn component(&self) -> String {
        match &self.subject {
            OperationSubject::Node { instance_id } => instance_id.clone(),
            OperationSubject::Relationship { relationship_id } => relationship_id.clone(),
        }
    }
}
