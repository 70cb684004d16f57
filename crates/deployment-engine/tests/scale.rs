//! Scaling workflows: growing and shrinking a node template's instance
//! count against a running deployment.

mod common;

use common::{Recorder, compute_network_topology, recording_registry};
use deployment_engine::{DeploymentOrchestrator, Error};
use topology_model::{NodeState, RelationshipState};

async fn installed_orchestrator(recorder: &Recorder) -> DeploymentOrchestrator {
    let orchestrator = DeploymentOrchestrator::builder(compute_network_topology())
        .operations(recording_registry(recorder))
        .build()
        .await
        .unwrap();
    orchestrator.install().await.unwrap();
    recorder.clear();
    orchestrator
}

#[tokio::test]
async fn scale_up_deploys_only_the_new_instance() {
    let recorder = Recorder::new();
    let orchestrator = installed_orchestrator(&recorder).await;

    orchestrator.scale("server", 3).await.unwrap();

    // only server_3 and its attachment were touched
    for entry in recorder.entries() {
        assert!(
            entry.starts_with("server_3.") || entry.starts_with("attachment:server_3:"),
            "unexpected work during scale-up: {entry}"
        );
    }
    recorder.assert_order("server_3.create", "attachment:server_3:vpc_1.pre_configure_source");
    recorder.assert_order("server_3.start", "attachment:server_3:vpc_1.add_target");

    let model = orchestrator.model().read().unwrap();
    assert_eq!(model.instance_count("server"), 3);
    assert_eq!(model.instance("server_3").unwrap().state, NodeState::Started);
    assert_eq!(
        model.relationship("attachment:server_3:vpc_1").unwrap().state,
        RelationshipState::Established
    );
}

#[tokio::test]
async fn scale_down_removes_highest_indexed_instances_first() {
    let recorder = Recorder::new();
    let orchestrator = installed_orchestrator(&recorder).await;
    orchestrator.scale("server", 3).await.unwrap();
    recorder.clear();

    orchestrator.scale("server", 1).await.unwrap();

    for victim in ["server_2", "server_3"] {
        let attachment = format!("attachment:{victim}:vpc_1");
        recorder.assert_order(&format!("{attachment}.remove_source"), &format!("{victim}.stop"));
        recorder.assert_order(&format!("{victim}.stop"), &format!("{victim}.delete"));
    }
    assert!(!recorder.contains("server_1.stop"));
    assert!(!recorder.contains("vpc_1.stop"));

    let model = orchestrator.model().read().unwrap();
    assert_eq!(model.instance_count("server"), 1);
    assert!(model.instance("server_1").is_ok());
    assert!(model.instance("server_2").is_err());
    assert!(model.relationship("attachment:server_2:vpc_1").is_err());
    // the survivor keeps its attachment
    assert_eq!(
        model.relationship("attachment:server_1:vpc_1").unwrap().state,
        RelationshipState::Established
    );
}

#[tokio::test]
async fn scale_to_current_count_is_a_noop() {
    let recorder = Recorder::new();
    let orchestrator = installed_orchestrator(&recorder).await;

    orchestrator.scale("server", 2).await.unwrap();
    assert!(recorder.entries().is_empty());
}

#[tokio::test]
async fn scale_outside_bounds_is_rejected_before_any_work() {
    let recorder = Recorder::new();
    let orchestrator = installed_orchestrator(&recorder).await;

    for requested in [0, 5] {
        let result = orchestrator.scale("server", requested).await;
        assert!(
            matches!(
                result,
                Err(Error::InvalidScaleTarget {
                    requested: r,
                    min: 1,
                    max: 4,
                    ..
                }) if r == requested
            ),
            "expected bounds rejection for {requested}"
        );
    }
    assert!(recorder.entries().is_empty());

    let model = orchestrator.model().read().unwrap();
    assert_eq!(model.instance_count("server"), 2);
}

#[tokio::test]
async fn instance_indices_are_not_reused_across_scaling() {
    let recorder = Recorder::new();
    let orchestrator = installed_orchestrator(&recorder).await;

    orchestrator.scale("server", 1).await.unwrap();
    orchestrator.scale("server", 2).await.unwrap();

    let model = orchestrator.model().read().unwrap();
    let ids: Vec<String> = model
        .instances_of_node("server")
        .iter()
        .map(|i| i.id.clone())
        .collect();
    assert_eq!(ids, vec!["server_1".to_string(), "server_3".into()]);
}
