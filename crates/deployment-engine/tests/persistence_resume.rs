//! Persistence and resume: a second orchestrator over the same store picks
//! up where the first one stopped.

mod common;

use common::{Recorder, compute_network_topology, recording_registry};
use deployment_engine::{
    DeploymentOrchestrator, MemoryStore, OperationRegistry, PersistenceStore, STANDARD_INTERFACE,
};
use serde_json::json;
use std::sync::Arc;
use topology_model::{Node, NodeState, RelationshipState, Topology};

#[tokio::test]
async fn store_tracks_states_attributes_and_outputs() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();
    let mut registry = recording_registry(&recorder);
    registry.register_fn("network", STANDARD_INTERFACE, "create", |ctx| async move {
        ctx.set_attribute("cidr", json!("10.0.0.0/16")).await?;
        ctx.record_output("network_cidr", json!("10.0.0.0/16")).await;
        Ok(())
    });

    let orchestrator = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(registry)
        .store(store.clone())
        .build()
        .await
        .unwrap();
    orchestrator.install().await.unwrap();

    assert_eq!(store.instance_state("vpc_1"), Some(NodeState::Started));
    assert_eq!(store.instance_state("server_1"), Some(NodeState::Started));
    assert_eq!(
        store.relationship_state("attachment:server_1:vpc_1"),
        Some(RelationshipState::Established)
    );
    assert_eq!(store.output("network_cidr"), Some(json!("10.0.0.0/16")));

    let model = store.load_model().await.unwrap().unwrap();
    assert_eq!(model.instance("vpc_1").unwrap().attribute("cidr"), Some(&json!("10.0.0.0/16")));

    orchestrator.uninstall().await.unwrap();
    assert_eq!(store.instance_state("vpc_1"), None);
    assert_eq!(store.relationship_state("attachment:server_1:vpc_1"), None);
}

#[tokio::test]
async fn resumed_orchestrator_skips_settled_work() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();

    let first = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(recording_registry(&recorder))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    first.install().await.unwrap();
    recorder.clear();

    let second = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(recording_registry(&recorder))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    assert!(second.resume().await.unwrap());
    second.install().await.unwrap();

    assert!(
        recorder.entries().is_empty(),
        "resume re-ran settled work: {:?}",
        recorder.entries()
    );
    let model = second.model().read().unwrap();
    assert_eq!(model.instance("server_2").unwrap().state, NodeState::Started);
}

#[tokio::test]
async fn resume_finishes_a_partially_deployed_model() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();

    // first run: server creation fails after the vpc is up
    let mut registry = recording_registry(&recorder);
    registry.register_fn("compute", STANDARD_INTERFACE, "create", |ctx| async move {
        Err(ctx.permanent_error("out of capacity"))
    });
    let first = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(registry)
        .store(store.clone())
        .build()
        .await
        .unwrap();
    assert!(first.install().await.is_err());
    // persist the partial model the way a crash-recovery path would see it
    let snapshot = first.model().read().unwrap().clone();
    store.save_model(&snapshot).await.unwrap();
    recorder.clear();

    // second run: capacity is back, resume completes the deployment
    let second = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(recording_registry(&recorder))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    assert!(second.resume().await.unwrap());
    second.install().await.unwrap();

    // the vpc was already started and is left alone
    assert!(!recorder.contains("vpc_1.create"));
    assert!(!recorder.contains("vpc_1.start"));
    // the interrupted create runs again and the servers finish deploying
    recorder.assert_order("server_1.create", "server_1.start");
    let model = second.model().read().unwrap();
    assert_eq!(model.instance("server_1").unwrap().state, NodeState::Started);
    assert_eq!(
        model.relationship("attachment:server_2:vpc_1").unwrap().state,
        RelationshipState::Established
    );
}

#[tokio::test]
async fn resume_without_a_persisted_model_starts_fresh() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();
    let topology = Topology::new("fresh").with_node(Node::new("api", "compute"));
    let mut registry = OperationRegistry::new();
    recorder.register_lifecycle(&mut registry, "compute");

    let orchestrator = DeploymentOrchestrator::builder(topology)
        .operations(registry)
        .store(store)
        .build()
        .await
        .unwrap();
    assert!(!orchestrator.resume().await.unwrap());
    orchestrator.install().await.unwrap();

    recorder.assert_order("api_1.create", "api_1.start");
}
