//! Runtime node instances.

use crate::NodeState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Build the canonical instance id `<NodeName>_<index>`
pub(crate) fn instance_id(node_name: &str, index: u32) -> String {
    format!("{node_name}_{index}")
}

/// A concrete runtime instance of a node template.
///
/// Properties are resolved once at construction and immutable afterwards;
/// attributes carry runtime-observed values (addresses, provider resource
/// ids) and are mutated only by the task currently operating the instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInstance {
    /// Instance id `<NodeName>_<index>`
    pub id: String,
    /// Owning node template name
    pub node_name: String,
    /// Instance index within the node, starting at 1
    pub index: u32,
    /// Resolved property values
    pub properties: Map<String, Value>,
    /// Runtime-observed attribute values
    pub attributes: Map<String, Value>,
    /// Current lifecycle state
    pub state: NodeState,
    /// Id of the hosting instance, if any
    pub parent: Option<String>,
    /// Ids of instances hosted on this one, in creation order
    pub children: Vec<String>,
    /// Ids of instances this one must wait on
    pub dependencies: BTreeSet<String>,
}

impl NodeInstance {
    /// Create an instance in the `Initial` state
    pub fn new(node_name: impl Into<String>, index: u32, properties: Map<String, Value>) -> Self {
        let node_name = node_name.into();
        Self {
            id: instance_id(&node_name, index),
            node_name,
            index,
            properties,
            attributes: Map::new(),
            state: NodeState::Initial,
            parent: None,
            children: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Read a resolved property value
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Read a runtime attribute value
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set a runtime attribute value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }
}
