//! Type-level topology elements: node templates, relationship declarations
//! and the topology container parsed from YAML.

use crate::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

fn default_count() -> u32 {
    1
}

/// Schema entry for a declared node property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PropertyDefinition {
    /// Whether the property must have a value (or a default) at deploy time
    #[serde(default)]
    pub required: bool,
    /// Default value applied when the template declares none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A node template: the type-level description every instance is stamped from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Template name, unique within the topology
    #[serde(default)]
    pub name: String,
    /// Implementing type key, used to dispatch provider operations
    #[serde(rename = "type")]
    pub node_type: String,
    /// Declared property values
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Property schema (required flags and defaults)
    #[serde(default)]
    pub property_definitions: HashMap<String, PropertyDefinition>,
    /// Capability markers exposed by instances of this template
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Names of node templates this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Name of the node template hosting instances of this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Minimum allowed instance count
    #[serde(default = "default_count")]
    pub min_instances: u32,
    /// Maximum allowed instance count
    #[serde(default = "default_count")]
    pub max_instances: u32,
    /// Instance count materialized at install
    #[serde(default = "default_count")]
    pub default_instances: u32,
}

impl Node {
    /// Create a node template with instance bounds of exactly one
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            properties: Map::new(),
            property_definitions: HashMap::new(),
            capabilities: Vec::new(),
            depends_on: Vec::new(),
            host: None,
            min_instances: 1,
            max_instances: 1,
            default_instances: 1,
        }
    }

    /// Declare a property value
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Declare a property schema entry
    pub fn with_property_definition(
        mut self,
        name: impl Into<String>,
        definition: PropertyDefinition,
    ) -> Self {
        self.property_definitions.insert(name.into(), definition);
        self
    }

    /// Declare a capability marker
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Declare a static dependency on another node template
    pub fn with_dependency(mut self, node: impl Into<String>) -> Self {
        self.depends_on.push(node.into());
        self
    }

    /// Declare the hosting node template
    pub fn with_host(mut self, node: impl Into<String>) -> Self {
        self.host = Some(node.into());
        self
    }

    /// Declare min/max/default instance counts
    pub fn with_instance_bounds(mut self, min: u32, max: u32, default: u32) -> Self {
        self.min_instances = min;
        self.max_instances = max;
        self.default_instances = default;
        self
    }

    /// Declared property values with schema defaults filled in
    pub fn resolved_properties(&self) -> Map<String, Value> {
        let mut resolved = self.properties.clone();
        for (name, definition) in &self.property_definitions {
            if !resolved.contains_key(name) {
                if let Some(default) = &definition.default {
                    resolved.insert(name.clone(), default.clone());
                }
            }
        }
        resolved
    }
}

/// A declared relationship type between two node templates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipDef {
    /// Declaration name, unique within the topology
    #[serde(default)]
    pub name: String,
    /// Relationship type key, used to dispatch provider hooks
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Source node template name
    pub source: String,
    /// Target node template name
    pub target: String,
}

impl RelationshipDef {
    /// Create a relationship declaration
    pub fn new(
        name: impl Into<String>,
        relationship_type: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            relationship_type: relationship_type.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// The full type-level topology of a deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    /// Deployment name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Node templates by name
    #[serde(default)]
    pub nodes: IndexMap<String, Node>,
    /// Relationship declarations
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

impl Topology {
    /// Create an empty topology
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            nodes: IndexMap::new(),
            relationships: Vec::new(),
        }
    }

    /// Parse a topology from its YAML description.
    ///
    /// Map keys win over any `name` field inside the node entries, matching
    /// how the nodes are addressed everywhere else.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let mut topology: Topology = serde_yaml::from_str(yaml)?;
        for (name, node) in topology.nodes.iter_mut() {
            node.name = name.clone();
        }
        topology.validate()?;
        Ok(topology)
    }

    /// Add a node template
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    /// Add a relationship declaration
    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Look up a node template
    pub fn node(&self, name: &str) -> Result<&Node, Error> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    /// Relationship declarations whose source is the given node template
    pub fn relationships_from(&self, source: &str) -> Vec<&RelationshipDef> {
        self.relationships
            .iter()
            .filter(|r| r.source == source)
            .collect()
    }

    /// Relationship declarations whose target is the given node template
    pub fn relationships_to(&self, target: &str) -> Vec<&RelationshipDef> {
        self.relationships
            .iter()
            .filter(|r| r.target == target)
            .collect()
    }

    /// Validate references, property requirements and instance bounds.
    ///
    /// All violations reported here are bad-usage errors: they abort before
    /// any workflow task executes and are never retried.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, node) in &self.nodes {
            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(Error::UnknownReference {
                        node: name.clone(),
                        reference: dep.clone(),
                    });
                }
            }
            if let Some(host) = &node.host {
                if host == name || !self.nodes.contains_key(host) {
                    return Err(Error::UnknownReference {
                        node: name.clone(),
                        reference: host.clone(),
                    });
                }
            }
            if node.min_instances > node.default_instances
                || node.default_instances > node.max_instances
            {
                return Err(Error::InvalidInstanceBounds {
                    node: name.clone(),
                    min: node.min_instances,
                    default: node.default_instances,
                    max: node.max_instances,
                });
            }
            let resolved = node.resolved_properties();
            for (property, definition) in &node.property_definitions {
                if definition.required && !resolved.contains_key(property) {
                    return Err(Error::MissingProperty {
                        node: name.clone(),
                        property: property.clone(),
                    });
                }
            }
        }
        for relationship in &self.relationships {
            for endpoint in [&relationship.source, &relationship.target] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(Error::UnknownReference {
                        node: relationship.name.clone(),
                        reference: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolved_properties_apply_defaults() {
        let node = Node::new("server", "compute")
            .with_property("image", json!("ubuntu"))
            .with_property_definition(
                "flavor",
                PropertyDefinition {
                    required: true,
                    default: Some(json!("small")),
                },
            );

        let resolved = node.resolved_properties();
        assert_eq!(resolved.get("image"), Some(&json!("ubuntu")));
        assert_eq!(resolved.get("flavor"), Some(&json!("small")));
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let topology =
            Topology::new("t").with_node(Node::new("server", "compute").with_dependency("missing"));
        assert!(matches!(
            topology.validate(),
            Err(Error::UnknownReference { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_mandatory_property() {
        let topology = Topology::new("t").with_node(
            Node::new("server", "compute").with_property_definition(
                "image",
                PropertyDefinition {
                    required: true,
                    default: None,
                },
            ),
        );
        assert!(matches!(
            topology.validate(),
            Err(Error::MissingProperty { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_instance_bounds() {
        let topology = Topology::new("t")
            .with_node(Node::new("server", "compute").with_instance_bounds(2, 1, 2));
        assert!(matches!(
            topology.validate(),
            Err(Error::InvalidInstanceBounds { .. })
        ));
    }

    #[test]
    fn parse_from_yaml() {
        let yaml = r#"
name: web-stack
nodes:
  network:
    type: openstack.network
  server:
    type: openstack.compute
    depends_on: [network]
    min_instances: 1
    max_instances: 3
    default_instances: 1
    properties:
      image: ubuntu
relationships:
  - name: server-on-network
    type: tosca.relationships.network
    source: server
    target: network
"#;
        let topology = Topology::from_yaml(yaml).unwrap();
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.node("server").unwrap().max_instances, 3);
        assert_eq!(topology.node("server").unwrap().name, "server");
        assert_eq!(topology.relationships.len(), 1);
        assert_eq!(topology.relationships_from("server").len(), 1);
        assert_eq!(topology.relationships_to("network").len(), 1);
    }
}
