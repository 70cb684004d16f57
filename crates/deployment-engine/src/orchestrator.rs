//! The deployment orchestrator: workflow entry points over one model.

use crate::cancel::CancelToken;
use crate::connection::{ConnectionFactory, ConnectionRegistry, TargetConfig, UnconfiguredFactory};
use crate::context::{AttributeRefresher, DeploymentContext};
use crate::executor::ActionExecutor;
use crate::hooks::DeploymentHook;
use crate::operations::OperationRegistry;
use crate::persistence::{MemoryStore, PersistenceStore};
use crate::retry::RetryPolicy;
use crate::run::RunTracker;
use crate::workflow::{WorkflowBuilder, WorkflowOperation};
use crate::Error;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use topology_model::{InstanceModel, NodeState, RelationshipState, Topology};
use tracing::{info, warn};
use uuid::Uuid;

/// Drives install, uninstall, and scale workflows over one deployment.
///
/// Workflows are mutually exclusive per orchestrator: starting one while
/// another is running fails with [`Error::ConcurrentWorkflow`] rather than
/// queueing.
pub struct DeploymentOrchestrator {
    name: String,
    model: Arc<RwLock<InstanceModel>>,
    operations: Arc<OperationRegistry>,
    connections: Arc<ConnectionRegistry>,
    hooks: Vec<Arc<dyn DeploymentHook>>,
    store: Arc<dyn PersistenceStore>,
    refresher: Option<Arc<dyn AttributeRefresher>>,
    default_retry: RetryPolicy,
    running: AtomicBool,
    cancel: Mutex<CancelToken>,
    runs: RunTracker,
}

impl DeploymentOrchestrator {
    /// Start building an orchestrator for a topology
    pub fn builder(topology: Topology) -> DeploymentOrchestratorBuilder {
        DeploymentOrchestratorBuilder::new(topology)
    }

    /// Deployment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live instance model
    pub fn model(&self) -> &RwLock<InstanceModel> {
        &self.model
    }

    /// The per-target connection registry
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Snapshot of recorded workflow runs, oldest first
    pub fn runs(&self) -> Vec<crate::run::WorkflowRun> {
        self.runs.runs()
    }

    /// Reload the last persisted model from the store, replacing the
    /// in-memory model.
    ///
    /// Returns whether a persisted model was found. Refused while a
    /// workflow is running.
    pub async fn resume(&self) -> Result<bool, Error> {
        let _guard = self.begin_run()?;
        match self.store.load_model().await? {
            Some(model) => {
                info!(deployment = %self.name, "resumed from persisted model");
                *self.model.write().unwrap() = model;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Request cancellation of the workflow currently running, if any.
    ///
    /// In-flight tasks finish their current provider call; no new task
    /// starts afterwards.
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Deploy the full topology.
    ///
    /// Materializes the instance model on first install; a resumed model
    /// is walked as-is, skipping work that already settled where the
    /// lifecycle allows it.
    pub async fn install(&self) -> Result<Uuid, Error> {
        let _guard = self.begin_run()?;
        let run_id = self.runs.start(WorkflowOperation::Install);
        info!(deployment = %self.name, "starting install");

        let result = self.run_install().await;
        self.runs.finish(run_id, &result);
        result.map(|()| run_id)
    }

    async fn run_install(&self) -> Result<(), Error> {
        let materialized = {
            let mut model = self.model.write().unwrap();
            if model.instance_ids().is_empty() {
                model.materialize()?;
                true
            } else {
                false
            }
        };
        if materialized {
            self.persist_model().await;
            let snapshot = self.model.read().unwrap().clone();
            for hook in &self.hooks {
                if let Err(error) = hook.post_construct_instances(&snapshot).await {
                    warn!(%error, "post-construct-instances hook failed");
                }
            }
        }

        let tree = {
            let model = self.model.read().unwrap();
            WorkflowBuilder::new(&model).install_tree()?
        };
        self.execute(tree).await?;
        self.persist_model().await;
        info!(deployment = %self.name, "install completed");
        Ok(())
    }

    /// Tear the full topology down.
    ///
    /// Teardown is best-effort over whatever states the model holds;
    /// fully torn-down instances and relationships are removed from the
    /// model afterwards.
    pub async fn uninstall(&self) -> Result<Uuid, Error> {
        let _guard = self.begin_run()?;
        let run_id = self.runs.start(WorkflowOperation::Uninstall);
        info!(deployment = %self.name, "starting uninstall");

        let result = self.run_uninstall().await;
        self.runs.finish(run_id, &result);
        result.map(|()| run_id)
    }

    async fn run_uninstall(&self) -> Result<(), Error> {
        let tree = {
            let model = self.model.read().unwrap();
            WorkflowBuilder::new(&model).uninstall_tree()?
        };
        self.execute(tree).await?;
        self.cleanup(None).await;
        info!(deployment = %self.name, "uninstall completed");
        Ok(())
    }

    /// Change the instance count of a node template.
    ///
    /// Growing deploys only the new instances (and their links into the
    /// existing deployment); shrinking tears down the highest-indexed
    /// instances first. A target outside the node's declared bounds is
    /// rejected before any task runs.
    pub async fn scale(&self, node: &str, target_count: u32) -> Result<Uuid, Error> {
        let _guard = self.begin_run()?;
        let run_id = self.runs.start(WorkflowOperation::Scale {
            node: node.to_string(),
            target_count,
        });
        info!(deployment = %self.name, node, target_count, "starting scale");

        let result = self.run_scale(node, target_count).await;
        self.runs.finish(run_id, &result);
        result.map(|()| run_id)
    }

    async fn run_scale(&self, node: &str, target_count: u32) -> Result<(), Error> {
        let current = {
            let model = self.model.read().unwrap();
            let definition = model.topology().node(node)?;
            if target_count < definition.min_instances || target_count > definition.max_instances {
                return Err(Error::InvalidScaleTarget {
                    node: node.to_string(),
                    requested: target_count,
                    min: definition.min_instances,
                    max: definition.max_instances,
                });
            }
            model.instance_count(node) as u32
        };

        if target_count > current {
            self.scale_up(node, target_count - current).await
        } else if target_count < current {
            self.scale_down(node, current - target_count).await
        } else {
            info!(deployment = %self.name, node, "already at target count");
            Ok(())
        }
    }

    async fn scale_up(&self, node: &str, delta: u32) -> Result<(), Error> {
        let scope: BTreeSet<String> = {
            let mut model = self.model.write().unwrap();
            let mut added = BTreeSet::new();
            for _ in 0..delta {
                added.insert(model.add_instance(node)?);
            }
            // relationships from existing sources into the new instances
            for id in model.instance_ids() {
                model.generate_relationships_for(&id)?;
            }
            added
        };
        self.persist_model().await;

        let tree = {
            let model = self.model.read().unwrap();
            WorkflowBuilder::new(&model).scoped_install(&scope)?
        };
        self.execute(tree).await?;
        self.persist_model().await;
        Ok(())
    }

    async fn scale_down(&self, node: &str, delta: u32) -> Result<(), Error> {
        let scope: BTreeSet<String> = {
            let model = self.model.read().unwrap();
            let instances = model.instances_of_node(node);
            instances
                .iter()
                .rev()
                .take(delta as usize)
                .map(|i| i.id.clone())
                .collect()
        };

        let tree = {
            let model = self.model.read().unwrap();
            WorkflowBuilder::new(&model).scoped_uninstall(&scope)?
        };
        self.execute(tree).await?;
        self.cleanup(Some(&scope)).await;
        Ok(())
    }

    async fn execute(&self, tree: crate::Action) -> Result<(), Error> {
        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();
        let ctx = Arc::new(DeploymentContext {
            model: Arc::clone(&self.model),
            operations: Arc::clone(&self.operations),
            connections: Arc::clone(&self.connections),
            hooks: self.hooks.clone(),
            store: Arc::clone(&self.store),
            refresher: self.refresher.clone(),
            default_retry: self.default_retry,
            cancel,
        });
        ActionExecutor::new(ctx).execute(tree).await
    }

    /// Remove torn-down relationships and instances from the model.
    ///
    /// Only relationships back in their initial state and instances in the
    /// deleted state are removed; anything a failed teardown left behind
    /// stays visible in the model.
    async fn cleanup(&self, scope: Option<&BTreeSet<String>>) {
        let (relationship_ids, instance_ids) = {
            let mut model = self.model.write().unwrap();
            let relationship_ids: Vec<String> = model
                .relationships()
                .filter(|r| r.state == RelationshipState::Initial)
                .filter(|r| {
                    scope.is_none_or(|s| s.contains(&r.source_id) || s.contains(&r.target_id))
                })
                .map(|r| r.id.clone())
                .collect();
            for id in &relationship_ids {
                if let Err(error) = model.remove_relationship(id) {
                    warn!(relationship = %id, %error, "failed to remove relationship");
                }
            }
            let instance_ids: Vec<String> = model
                .instance_ids()
                .into_iter()
                .filter(|id| {
                    model
                        .instance(id)
                        .map(|i| i.state == NodeState::Deleted)
                        .unwrap_or(false)
                })
                .filter(|id| scope.is_none_or(|s| s.contains(id)))
                .collect();
            for id in &instance_ids {
                if let Err(error) = model.remove_instance(id) {
                    warn!(instance = %id, %error, "failed to remove instance");
                }
            }
            (relationship_ids, instance_ids)
        };
        for id in &relationship_ids {
            if let Err(error) = self.store.remove_relationship(id).await {
                warn!(relationship = %id, %error, "failed to remove persisted relationship");
            }
        }
        for id in &instance_ids {
            if let Err(error) = self.store.remove_instance(id).await {
                warn!(instance = %id, %error, "failed to remove persisted instance");
            }
        }
        self.persist_model().await;
    }

    async fn persist_model(&self) {
        let snapshot = self.model.read().unwrap().clone();
        if let Err(error) = self.store.save_model(&snapshot).await {
            warn!(deployment = %self.name, %error, "failed to persist model");
        }
    }

    fn begin_run(&self) -> Result<RunGuard<'_>, Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ConcurrentWorkflow {
                deployment: self.name.clone(),
            });
        }
        Ok(RunGuard(&self.running))
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`DeploymentOrchestrator`]
pub struct DeploymentOrchestratorBuilder {
    topology: Topology,
    name: Option<String>,
    operations: OperationRegistry,
    hooks: Vec<Arc<dyn DeploymentHook>>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    targets: Vec<TargetConfig>,
    bootstrap: Option<Map<String, Value>>,
    store: Option<Arc<dyn PersistenceStore>>,
    refresher: Option<Arc<dyn AttributeRefresher>>,
    default_retry: RetryPolicy,
}

impl DeploymentOrchestratorBuilder {
    fn new(topology: Topology) -> Self {
        Self {
            topology,
            name: None,
            operations: OperationRegistry::new(),
            hooks: Vec::new(),
            factory: None,
            targets: Vec::new(),
            bootstrap: None,
            store: None,
            refresher: None,
            default_retry: RetryPolicy::default(),
        }
    }

    /// Deployment name; defaults to the topology name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Provider operations for the topology's node and relationship types
    pub fn operations(mut self, operations: OperationRegistry) -> Self {
        self.operations = operations;
        self
    }

    /// Add a lifecycle hook
    pub fn hook(mut self, hook: Arc<dyn DeploymentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Factory producing provider connections
    pub fn connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Add a named provider target
    pub fn target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    /// Bootstrap configuration handed to the connection factory
    pub fn bootstrap(mut self, bootstrap: Map<String, Value>) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// State and output store; defaults to an in-memory store
    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Post-operation attribute refresher
    pub fn refresher(mut self, refresher: Arc<dyn AttributeRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Default retry policy for operations without per-instance overrides
    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Assemble the orchestrator and fire the post-construct hooks
    pub async fn build(self) -> Result<DeploymentOrchestrator, Error> {
        let name = self.name.unwrap_or_else(|| self.topology.name.clone());
        let store: Arc<dyn PersistenceStore> =
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let model = InstanceModel::new(self.topology)?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(UnconfiguredFactory));
        let connections = Arc::new(ConnectionRegistry::new(
            factory,
            self.targets,
            self.bootstrap,
        ));
        for hook in &self.hooks {
            if let Err(error) = hook.post_construct(&connections).await {
                warn!(%error, "post-construct hook failed");
            }
        }

        Ok(DeploymentOrchestrator {
            name,
            model: Arc::new(RwLock::new(model)),
            operations: Arc::new(self.operations),
            connections,
            hooks: self.hooks,
            store,
            refresher: self.refresher,
            default_retry: self.default_retry,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancelToken::new()),
            runs: RunTracker::new(),
        })
    }
}
