//! # Topology Model
//!
//! Typed topology model for deployment orchestration.
//!
//! This crate defines the type-level topology (nodes, relationship
//! declarations, property schemas) and the runtime instance model (node
//! instances, relationship instances, lifecycle states) that the deployment
//! engine drives. All relations between instances are expressed as id
//! references resolved through the owning [`InstanceModel`], never as direct
//! ownership pointers.
//!
//! ## Example
//!
//! ```rust
//! use topology_model::{InstanceModel, Node, RelationshipDef, Topology};
//!
//! # fn example() -> Result<(), topology_model::Error> {
//! let topology = Topology::new("web-stack")
//!     .with_node(Node::new("network", "openstack.network"))
//!     .with_node(
//!         Node::new("server", "openstack.compute")
//!             .with_dependency("network")
//!             .with_instance_bounds(1, 3, 1),
//!     )
//!     .with_relationship(RelationshipDef::new(
//!         "server-on-network",
//!         "tosca.relationships.network",
//!         "server",
//!         "network",
//!     ));
//!
//! let mut model = InstanceModel::new(topology)?;
//! model.materialize()?;
//! assert!(model.instance("server_1").is_ok());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod instance;
mod model;
mod node;
mod relationship;
mod state;

pub use instance::NodeInstance;
pub use model::InstanceModel;
pub use node::{Node, PropertyDefinition, RelationshipDef, Topology};
pub use relationship::{RelationshipInstance, relationship_id};
pub use state::{NodeOperation, NodeState, RelationshipOperation, RelationshipState};

/// Error types for topology model operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Referenced node template does not exist in the topology
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Referenced node instance does not exist in the model
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Referenced relationship instance does not exist in the model
    #[error("relationship instance not found: {0}")]
    RelationshipNotFound(String),

    /// A mandatory property has neither a value nor a default
    #[error("node '{node}' is missing mandatory property '{property}'")]
    MissingProperty {
        /// Node template name
        node: String,
        /// Property name
        property: String,
    },

    /// A node references an unknown dependency, host or relationship endpoint
    #[error("node '{node}' references unknown element '{reference}'")]
    UnknownReference {
        /// Node template name
        node: String,
        /// The dangling reference
        reference: String,
    },

    /// Declared instance counts violate `min <= default <= max`
    #[error("node '{node}' has invalid instance bounds: min={min}, default={default}, max={max}")]
    InvalidInstanceBounds {
        /// Node template name
        node: String,
        /// Minimum instance count
        min: u32,
        /// Default instance count
        default: u32,
        /// Maximum instance count
        max: u32,
    },

    /// An operation was applied to an instance in a state it does not accept
    #[error("invalid transition: '{id}' in state '{state}' does not accept operation '{operation}'")]
    InvalidTransition {
        /// Instance or relationship id
        id: String,
        /// Current lifecycle state
        state: String,
        /// The rejected operation
        operation: String,
    },

    /// An instance still referenced by relationship instances was removed
    #[error("instance '{0}' still has relationship instances attached")]
    InstanceStillLinked(String),

    /// Failed to parse a topology description
    #[error("failed to parse topology: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
