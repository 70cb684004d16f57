//! Runtime relationship instances.

use crate::RelationshipState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Build the deterministic relationship instance id for a (type, source,
/// target) triple. Deterministic ids keep repeated scale operations
/// reproducible.
pub fn relationship_id(relationship_type: &str, source_id: &str, target_id: &str) -> String {
    format!("{relationship_type}:{source_id}:{target_id}")
}

/// A concrete binding between a source and a target instance.
///
/// Both endpoints must exist in the model for the whole lifetime of the
/// relationship instance: it is created after both endpoints exist and
/// removed before either endpoint is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipInstance {
    /// Deterministic id, see [`relationship_id`]
    pub id: String,
    /// Relationship type key
    pub relationship_type: String,
    /// Source instance id
    pub source_id: String,
    /// Target instance id
    pub target_id: String,
    /// Runtime-observed attribute values
    pub attributes: Map<String, Value>,
    /// Current lifecycle state, independent from the endpoints
    pub state: RelationshipState,
}

impl RelationshipInstance {
    /// Create a relationship instance in the `Initial` state
    pub fn new(
        relationship_type: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        let relationship_type = relationship_type.into();
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            id: relationship_id(&relationship_type, &source_id, &target_id),
            relationship_type,
            source_id,
            target_id,
            attributes: Map::new(),
            state: RelationshipState::Initial,
        }
    }

    /// Whether the given instance id is one of the endpoints
    pub fn touches(&self, instance_id: &str) -> bool {
        self.source_id == instance_id || self.target_id == instance_id
    }

    /// Set a runtime attribute value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_id() {
        let a = RelationshipInstance::new("net", "server_1", "network_1");
        let b = RelationshipInstance::new("net", "server_1", "network_1");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "net:server_1:network_1");
    }

    #[test]
    fn touches_endpoints() {
        let rel = RelationshipInstance::new("net", "server_1", "network_1");
        assert!(rel.touches("server_1"));
        assert!(rel.touches("network_1"));
        assert!(!rel.touches("server_2"));
    }
}
