//! Persistence of deployment state.
//!
//! Persistence is fire-and-forget: the in-memory model is authoritative
//! during a run, and store failures are logged without failing operations.
//! A deployment resumed from a store picks up the last persisted model and
//! walks whatever partial states it finds.

use crate::Error;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use topology_model::{InstanceModel, NodeState, RelationshipState};

/// Store for deployment state, attributes, and outputs
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Persist a node instance state change
    async fn save_instance_state(&self, instance_id: &str, state: NodeState) -> Result<(), Error>;

    /// Persist the attributes of a node instance
    async fn save_instance_attributes(
        &self,
        instance_id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), Error>;

    /// Persist a relationship state change
    async fn save_relationship_state(
        &self,
        relationship_id: &str,
        state: RelationshipState,
    ) -> Result<(), Error>;

    /// Remove a deleted node instance
    async fn remove_instance(&self, instance_id: &str) -> Result<(), Error>;

    /// Remove an unlinked relationship instance
    async fn remove_relationship(&self, relationship_id: &str) -> Result<(), Error>;

    /// Persist a deployment output
    async fn save_output(&self, name: &str, value: &Value) -> Result<(), Error>;

    /// Persist a full model snapshot
    async fn save_model(&self, model: &InstanceModel) -> Result<(), Error>;

    /// Load the last persisted model snapshot, if any
    async fn load_model(&self) -> Result<Option<InstanceModel>, Error>;
}

/// In-memory store, the default when no external store is configured
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    instance_states: HashMap<String, NodeState>,
    instance_attributes: HashMap<String, Map<String, Value>>,
    relationship_states: HashMap<String, RelationshipState>,
    outputs: HashMap<String, Value>,
    model: Option<InstanceModel>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted state of an instance, if any
    pub fn instance_state(&self, instance_id: &str) -> Option<NodeState> {
        self.inner.lock().unwrap().instance_states.get(instance_id).copied()
    }

    /// The persisted state of a relationship, if any
    pub fn relationship_state(&self, relationship_id: &str) -> Option<RelationshipState> {
        self.inner
            .lock()
            .unwrap()
            .relationship_states
            .get(relationship_id)
            .copied()
    }

    /// A persisted deployment output, if any
    pub fn output(&self, name: &str) -> Option<Value> {
        self.inner.lock().unwrap().outputs.get(name).cloned()
    }

    /// Seed the store with a model snapshot, as if persisted by an
    /// earlier run
    pub fn seed_model(&self, model: InstanceModel) {
        self.inner.lock().unwrap().model = Some(model);
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_instance_state(&self, instance_id: &str, state: NodeState) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .instance_states
            .insert(instance_id.to_string(), state);
        Ok(())
    }

    async fn save_instance_attributes(
        &self,
        instance_id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .instance_attributes
            .insert(instance_id.to_string(), attributes.clone());
        Ok(())
    }

    async fn save_relationship_state(
        &self,
        relationship_id: &str,
        state: RelationshipState,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .relationship_states
            .insert(relationship_id.to_string(), state);
        Ok(())
    }

    async fn remove_instance(&self, instance_id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.instance_states.remove(instance_id);
        inner.instance_attributes.remove(instance_id);
        Ok(())
    }

    async fn remove_relationship(&self, relationship_id: &str) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .relationship_states
            .remove(relationship_id);
        Ok(())
    }

    async fn save_output(&self, name: &str, value: &Value) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .outputs
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn save_model(&self, model: &InstanceModel) -> Result<(), Error> {
        self.inner.lock().unwrap().model = Some(model.clone());
        Ok(())
    }

    async fn load_model(&self) -> Result<Option<InstanceModel>, Error> {
        Ok(self.inner.lock().unwrap().model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_state_and_outputs() {
        let store = MemoryStore::new();
        store
            .save_instance_state("server_1", NodeState::Started)
            .await
            .unwrap();
        store
            .save_relationship_state("network:server_1:vpc_1", RelationshipState::Established)
            .await
            .unwrap();
        store.save_output("endpoint", &json!("10.0.0.4:80")).await.unwrap();

        assert_eq!(store.instance_state("server_1"), Some(NodeState::Started));
        assert_eq!(
            store.relationship_state("network:server_1:vpc_1"),
            Some(RelationshipState::Established)
        );
        assert_eq!(store.output("endpoint"), Some(json!("10.0.0.4:80")));

        store.remove_instance("server_1").await.unwrap();
        store.remove_relationship("network:server_1:vpc_1").await.unwrap();
        assert_eq!(store.instance_state("server_1"), None);
        assert_eq!(store.relationship_state("network:server_1:vpc_1"), None);
    }
}
