//! The instance model: the shared state every workflow task acts upon.
//!
//! Instances and relationship instances are stored by id in owning tables;
//! parent/child and dependency relations are id references resolved through
//! those tables. Mutation goes through `&mut` methods and is serialized by
//! the deployment orchestrator, which allows at most one active workflow run.

use crate::instance::instance_id;
use crate::{
    Error, Node, NodeInstance, NodeOperation, NodeState, RelationshipInstance,
    RelationshipOperation, RelationshipState, Topology,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Runtime instance model of a deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceModel {
    topology: Topology,
    node_instances: IndexMap<String, NodeInstance>,
    relationship_instances: IndexMap<String, RelationshipInstance>,
    /// Next index per node name; indices are never reused within a model
    next_indices: HashMap<String, u32>,
}

impl InstanceModel {
    /// Create an empty model over a validated topology
    pub fn new(topology: Topology) -> Result<Self, Error> {
        topology.validate()?;
        Ok(Self {
            topology,
            node_instances: IndexMap::new(),
            relationship_instances: IndexMap::new(),
            next_indices: HashMap::new(),
        })
    }

    /// The type-level topology this model was built from
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Deployment name, taken from the topology
    pub fn name(&self) -> &str {
        &self.topology.name
    }

    // ---- construction ------------------------------------------------

    /// Create the default instances of every node template plus the
    /// relationship instances between them.
    ///
    /// Returns the created instance ids. No-op when the model already holds
    /// instances (e.g. after a resume from persistence).
    pub fn materialize(&mut self) -> Result<Vec<String>, Error> {
        if !self.node_instances.is_empty() {
            return Ok(Vec::new());
        }
        let node_names: Vec<String> = self.topology.nodes.keys().cloned().collect();
        let mut created = Vec::new();
        for name in &node_names {
            let node = self.topology.node(name)?.clone();
            for _ in 0..node.default_instances {
                created.push(self.create_bare(&node));
            }
        }
        // Wiring is a second pass: templates may be declared in any order.
        for id in &created {
            self.wire_instance(id)?;
        }
        for id in &created {
            self.generate_relationships_for(id)?;
        }
        debug!(count = created.len(), "materialized instance model");
        Ok(created)
    }

    /// Add one instance of the given node template, continuing the index
    /// numbering, and wire its parent and dependency references.
    ///
    /// Relationship instances are not generated here; call
    /// [`InstanceModel::generate_relationships_for`] afterwards.
    pub fn add_instance(&mut self, node_name: &str) -> Result<String, Error> {
        let node = self.topology.node(node_name)?.clone();
        let id = self.create_bare(&node);
        self.wire_instance(&id)?;
        Ok(id)
    }

    fn create_bare(&mut self, node: &Node) -> String {
        let index = self.next_indices.entry(node.name.clone()).or_insert(1);
        let instance = NodeInstance::new(&node.name, *index, node.resolved_properties());
        *index += 1;
        let id = instance.id.clone();
        self.node_instances.insert(id.clone(), instance);
        id
    }

    /// Assign parent, children and dependency id references for an instance.
    fn wire_instance(&mut self, id: &str) -> Result<(), Error> {
        let node_name = self.instance(id)?.node_name.clone();
        let index = self.instance(id)?.index;
        let node = self.topology.node(&node_name)?.clone();

        // Parent from the host declaration: prefer the host instance with the
        // same index, fall back to the host's first instance.
        if let Some(host) = &node.host {
            let parent_id = if self.node_instances.contains_key(&instance_id(host, index)) {
                instance_id(host, index)
            } else {
                self.instances_of_node(host)
                    .first()
                    .map(|p| p.id.clone())
                    .ok_or_else(|| {
                        Error::InstanceNotFound(format!("no instance of host node '{host}'"))
                    })?
            };
            if let Some(parent) = self.node_instances.get_mut(&parent_id) {
                if !parent.children.contains(&id.to_string()) {
                    parent.children.push(id.to_string());
                }
            }
            let instance = self.instance_mut(id)?;
            instance.parent = Some(parent_id.clone());
            instance.dependencies.insert(parent_id);
        }

        // Dependencies on every instance of the declared dependency nodes and
        // of relationship targets.
        let mut dep_nodes: Vec<String> = node.depends_on.clone();
        for rel in self.topology.relationships_from(&node_name) {
            dep_nodes.push(rel.target.clone());
        }
        let mut dep_ids = Vec::new();
        for dep_node in &dep_nodes {
            for dep in self.instances_of_node(dep_node) {
                dep_ids.push(dep.id.clone());
            }
        }
        self.instance_mut(id)?.dependencies.extend(dep_ids);

        // Reverse direction: instances of nodes depending on this one wait on
        // the new instance too.
        let dependents: Vec<String> = self
            .topology
            .nodes
            .values()
            .filter(|other| {
                other.depends_on.contains(&node_name)
                    || self
                        .topology
                        .relationships_from(&other.name)
                        .iter()
                        .any(|r| r.target == node_name)
            })
            .map(|other| other.name.clone())
            .collect();
        for dependent in dependents {
            let ids: Vec<String> = self
                .instances_of_node(&dependent)
                .iter()
                .map(|i| i.id.clone())
                .collect();
            for other_id in ids {
                if other_id != id {
                    self.instance_mut(&other_id)?
                        .dependencies
                        .insert(id.to_string());
                }
            }
        }
        Ok(())
    }

    /// Generate the relationship instances the given instance participates
    /// in, one per existing counterpart instance matching the declared
    /// node-pair rules. Returns the ids of newly created instances.
    pub fn generate_relationships_for(&mut self, id: &str) -> Result<Vec<String>, Error> {
        let node_name = self.instance(id)?.node_name.clone();
        let mut pairs: Vec<(String, String, String)> = Vec::new();
        for rel in self.topology.relationships_from(&node_name) {
            for target in self.instances_of_node(&rel.target) {
                pairs.push((
                    rel.relationship_type.clone(),
                    id.to_string(),
                    target.id.clone(),
                ));
            }
        }
        for rel in self.topology.relationships_to(&node_name) {
            for source in self.instances_of_node(&rel.source) {
                pairs.push((
                    rel.relationship_type.clone(),
                    source.id.clone(),
                    id.to_string(),
                ));
            }
        }
        let mut created = Vec::new();
        for (relationship_type, source_id, target_id) in pairs {
            let instance = RelationshipInstance::new(relationship_type, source_id, target_id);
            if !self.relationship_instances.contains_key(&instance.id) {
                created.push(instance.id.clone());
                self.relationship_instances
                    .insert(instance.id.clone(), instance);
            }
        }
        Ok(created)
    }

    // ---- removal -----------------------------------------------------

    /// Remove an instance from the model.
    ///
    /// Every relationship instance touching it must have been removed first;
    /// scaling and uninstall remove relationships before their endpoints.
    pub fn remove_instance(&mut self, id: &str) -> Result<NodeInstance, Error> {
        if self.relationship_instances.values().any(|r| r.touches(id)) {
            return Err(Error::InstanceStillLinked(id.to_string()));
        }
        let instance = self
            .node_instances
            .shift_remove(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;
        if let Some(parent_id) = &instance.parent {
            if let Some(parent) = self.node_instances.get_mut(parent_id) {
                parent.children.retain(|c| c != id);
            }
        }
        for other in self.node_instances.values_mut() {
            other.dependencies.remove(id);
        }
        debug!(instance = id, "removed instance");
        Ok(instance)
    }

    /// Remove a relationship instance from the model
    pub fn remove_relationship(&mut self, id: &str) -> Result<RelationshipInstance, Error> {
        self.relationship_instances
            .shift_remove(id)
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    // ---- lookups -----------------------------------------------------

    /// Look up an instance by id
    pub fn instance(&self, id: &str) -> Result<&NodeInstance, Error> {
        self.node_instances
            .get(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Look up an instance by id, mutably
    pub fn instance_mut(&mut self, id: &str) -> Result<&mut NodeInstance, Error> {
        self.node_instances
            .get_mut(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// All instances, in creation order
    pub fn instances(&self) -> impl Iterator<Item = &NodeInstance> {
        self.node_instances.values()
    }

    /// All instance ids, in creation order
    pub fn instance_ids(&self) -> Vec<String> {
        self.node_instances.keys().cloned().collect()
    }

    /// Instances of a node template, sorted by index
    pub fn instances_of_node(&self, node_name: &str) -> Vec<&NodeInstance> {
        let mut instances: Vec<&NodeInstance> = self
            .node_instances
            .values()
            .filter(|i| i.node_name == node_name)
            .collect();
        instances.sort_by_key(|i| i.index);
        instances
    }

    /// Number of instances of a node template
    pub fn instance_count(&self, node_name: &str) -> usize {
        self.node_instances
            .values()
            .filter(|i| i.node_name == node_name)
            .count()
    }

    /// The runtime-type filter: instances whose node template declares the
    /// given capability marker.
    pub fn instances_with_capability(&self, capability: &str) -> Vec<&NodeInstance> {
        self.node_instances
            .values()
            .filter(|i| {
                self.topology
                    .nodes
                    .get(&i.node_name)
                    .is_some_and(|n| n.capabilities.iter().any(|c| c == capability))
            })
            .collect()
    }

    /// Implementing type key of an instance's node template
    pub fn node_type_of(&self, id: &str) -> Result<String, Error> {
        let node_name = &self.instance(id)?.node_name;
        Ok(self.topology.node(node_name)?.node_type.clone())
    }

    /// Look up a relationship instance by id
    pub fn relationship(&self, id: &str) -> Result<&RelationshipInstance, Error> {
        self.relationship_instances
            .get(id)
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    /// Look up a relationship instance by id, mutably
    pub fn relationship_mut(&mut self, id: &str) -> Result<&mut RelationshipInstance, Error> {
        self.relationship_instances
            .get_mut(id)
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    /// All relationship instances, in creation order
    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipInstance> {
        self.relationship_instances.values()
    }

    /// Relationship instances whose source is the given instance
    pub fn relationships_from(&self, source_id: &str) -> Vec<&RelationshipInstance> {
        self.relationship_instances
            .values()
            .filter(|r| r.source_id == source_id)
            .collect()
    }

    /// Relationship instances whose target is the given instance
    pub fn relationships_to(&self, target_id: &str) -> Vec<&RelationshipInstance> {
        self.relationship_instances
            .values()
            .filter(|r| r.target_id == target_id)
            .collect()
    }

    /// Relationship instances touching the given instance on either side
    pub fn relationships_touching(&self, instance_id: &str) -> Vec<&RelationshipInstance> {
        self.relationship_instances
            .values()
            .filter(|r| r.touches(instance_id))
            .collect()
    }

    /// Target instances reachable from a source over a relationship type
    pub fn targets_of(&self, source_id: &str, relationship_type: &str) -> Vec<&NodeInstance> {
        self.relationship_instances
            .values()
            .filter(|r| r.source_id == source_id && r.relationship_type == relationship_type)
            .filter_map(|r| self.node_instances.get(&r.target_id))
            .collect()
    }

    /// Ancestors of an instance, nearest first, following parent links
    pub fn ancestors(&self, id: &str) -> Vec<&NodeInstance> {
        let mut ancestors = Vec::new();
        let mut current = self.node_instances.get(id);
        while let Some(instance) = current {
            match instance.parent.as_deref().and_then(|p| self.node_instances.get(p)) {
                Some(parent) => {
                    ancestors.push(parent);
                    current = Some(parent);
                }
                None => current = None,
            }
        }
        ancestors
    }

    // ---- state transitions -------------------------------------------

    /// Validate and record the in-progress transition of a node operation.
    ///
    /// A state outside the operation's required set is an invariant
    /// violation: it indicates a workflow bug, not an environment problem.
    pub fn begin_node_operation(&mut self, id: &str, operation: NodeOperation) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        if !operation.required_states().contains(&instance.state) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                state: instance.state.to_string(),
                operation: operation.to_string(),
            });
        }
        instance.state = operation.in_progress_state();
        debug!(instance = id, state = %instance.state, "node operation started");
        Ok(())
    }

    /// Record the settled transition of a node operation
    pub fn settle_node_operation(
        &mut self,
        id: &str,
        operation: NodeOperation,
    ) -> Result<(), Error> {
        let instance = self.instance_mut(id)?;
        instance.state = operation.settled_state();
        debug!(instance = id, state = %instance.state, "node operation settled");
        Ok(())
    }

    /// Force a node instance state, bypassing transition checks.
    ///
    /// Used by best-effort teardown paths walking partially-deployed models.
    pub fn set_node_state(&mut self, id: &str, state: NodeState) -> Result<(), Error> {
        self.instance_mut(id)?.state = state;
        Ok(())
    }

    /// Validate and record the in-progress hops of a relationship operation
    pub fn begin_relationship_operation(
        &mut self,
        id: &str,
        operation: RelationshipOperation,
    ) -> Result<(), Error> {
        let relationship = self.relationship_mut(id)?;
        if !operation.required_states().contains(&relationship.state) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                state: relationship.state.to_string(),
                operation: operation.to_string(),
            });
        }
        for hop in operation.in_progress_states() {
            relationship.state = *hop;
            debug!(relationship = id, state = %relationship.state, "relationship hop");
        }
        Ok(())
    }

    /// Record the settled transition of a relationship operation
    pub fn settle_relationship_operation(
        &mut self,
        id: &str,
        operation: RelationshipOperation,
    ) -> Result<(), Error> {
        let relationship = self.relationship_mut(id)?;
        relationship.state = operation.settled_state();
        debug!(relationship = id, state = %relationship.state, "relationship operation settled");
        Ok(())
    }

    /// Force a relationship instance state, bypassing transition checks
    pub fn set_relationship_state(
        &mut self,
        id: &str,
        state: RelationshipState,
    ) -> Result<(), Error> {
        self.relationship_mut(id)?.state = state;
        Ok(())
    }
}
