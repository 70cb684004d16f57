//! Shared test fixtures: a recording provider over a small compute/network
//! topology.

#![allow(dead_code)]

use deployment_engine::{CONFIGURE_INTERFACE, OperationRegistry, STANDARD_INTERFACE};
use std::sync::{Arc, Mutex};
use topology_model::{Node, RelationshipDef, Topology};

/// Install the test log subscriber once; `RUST_LOG` controls verbosity
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const LIFECYCLE_OPERATIONS: [&str; 5] = ["create", "configure", "start", "stop", "delete"];

pub const RELATIONSHIP_OPERATIONS: [&str; 8] = [
    "pre_configure_source",
    "pre_configure_target",
    "post_configure_source",
    "post_configure_target",
    "add_source",
    "add_target",
    "remove_source",
    "remove_target",
];

/// Records every provider call in invocation order
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Position of an entry in the recorded order; panics when absent
    pub fn position(&self, entry: &str) -> usize {
        let entries = self.entries();
        entries
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{entry}' not recorded; got {entries:?}"))
    }

    pub fn assert_order(&self, earlier: &str, later: &str) {
        assert!(
            self.position(earlier) < self.position(later),
            "expected '{earlier}' before '{later}'; got {:?}",
            self.entries()
        );
    }

    /// Register recording lifecycle handlers for a node type
    pub fn register_lifecycle(&self, registry: &mut OperationRegistry, type_key: &str) {
        for operation in LIFECYCLE_OPERATIONS {
            let recorder = self.clone();
            registry.register_fn(type_key, STANDARD_INTERFACE, operation, move |ctx| {
                recorder.record(format!("{}.{}", ctx.instance_id(), ctx.operation()));
                async { Ok(()) }
            });
        }
    }

    /// Register recording configure/link hooks for a relationship type
    pub fn register_relationship(&self, registry: &mut OperationRegistry, relationship_type: &str) {
        for operation in RELATIONSHIP_OPERATIONS {
            let recorder = self.clone();
            registry.register_fn(relationship_type, CONFIGURE_INTERFACE, operation, move |ctx| {
                let relationship_id = ctx.relationship().map(|r| r.id).unwrap_or_default();
                recorder.record(format!("{relationship_id}.{}", ctx.operation()));
                async { Ok(()) }
            });
        }
    }
}

/// Two compute servers attached to one network, the servers depending on
/// the network through the attachment relationship
pub fn compute_network_topology() -> Topology {
    Topology::new("web-stack")
        .with_node(Node::new("server", "compute").with_instance_bounds(1, 4, 2))
        .with_node(Node::new("vpc", "network"))
        .with_relationship(RelationshipDef::new("attachment", "attachment", "server", "vpc"))
}

/// Recording handlers for every type in [`compute_network_topology`]
pub fn recording_registry(recorder: &Recorder) -> OperationRegistry {
    init_logging();
    let mut registry = OperationRegistry::new();
    recorder.register_lifecycle(&mut registry, "compute");
    recorder.register_lifecycle(&mut registry, "network");
    recorder.register_relationship(&mut registry, "attachment");
    registry
}
