//! Per-target connection registry.
//!
//! Cloud-API clients and SSH/Docker sessions are expensive and often
//! rate-limited: one physical connection must serve every instance resolving
//! to the same provider target, while distinct targets (regions, accounts)
//! must never share one. Connections are cached under a structural key built
//! from the merged target configuration, not from object identity.

use crate::Error;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// An opaque provider handle, immutable once constructed
pub trait Connection: Send + Sync + 'static {
    /// Downcast support for provider code that knows the concrete type
    fn as_any(&self) -> &dyn Any;
}

/// Provider-supplied factory constructing connections for a target
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Build a connection from the merged target properties.
    ///
    /// `multiple_targets` tells the provider whether more than one target is
    /// registered, so it can decide whether to trust ambient bootstrap
    /// context (such as a network id only valid for the bootstrap target).
    async fn new_connection(
        &self,
        target: &str,
        properties: &Map<String, Value>,
        bootstrap: Option<&Map<String, Value>>,
        multiple_targets: bool,
    ) -> Result<Arc<dyn Connection>, Error>;
}

/// A named provider target configuration (e.g. a region or account)
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// Target name, referenced by instances
    pub name: String,
    /// Base configuration merged with caller overrides on lookup
    pub properties: Map<String, Value>,
}

impl TargetConfig {
    /// Create a target configuration
    pub fn new(name: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }
}

/// Structural cache key: target name plus the flattened merged configuration
type ConnectionKey = (String, BTreeMap<String, String>);

/// Flatten a configuration map into dotted scalar entries so structurally
/// equal configurations produce equal keys regardless of nesting or object
/// identity.
fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, nested, out);
            }
        }
        Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                flatten(&format!("{prefix}[{i}]"), nested, out);
            }
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.to_string());
        }
    }
}

fn flatten_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten("", &Value::Object(map.clone()), &mut out);
    out
}

/// Lazily creating, thread-safe cache of one connection per
/// (target, effective configuration) key
pub struct ConnectionRegistry {
    targets: HashMap<String, Map<String, Value>>,
    bootstrap: Option<Map<String, Value>>,
    factory: Arc<dyn ConnectionFactory>,
    /// One lock around get-or-create: concurrent first-callers for the same
    /// key block on, rather than duplicate, connection setup.
    cache: Mutex<HashMap<ConnectionKey, Arc<dyn Connection>>>,
}

impl ConnectionRegistry {
    /// Create a registry over the given targets and factory
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        targets: Vec<TargetConfig>,
        bootstrap: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            targets: targets
                .into_iter()
                .map(|t| (t.name, t.properties))
                .collect(),
            bootstrap,
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registered target names
    pub fn target_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    /// Get or create the connection for a target, with optional property
    /// overrides merged over the target's base configuration.
    pub async fn get(
        &self,
        target: &str,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<Arc<dyn Connection>, Error> {
        let base = self
            .targets
            .get(target)
            .ok_or_else(|| Error::TargetNotFound {
                target: target.to_string(),
            })?;
        let mut merged = base.clone();
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        let key = (target.to_string(), flatten_map(&merged));

        let mut cache = self.cache.lock().await;
        if let Some(connection) = cache.get(&key) {
            debug!(target, "reusing cached connection");
            return Ok(connection.clone());
        }
        info!(target, "creating connection");
        let connection = self
            .factory
            .new_connection(
                target,
                &merged,
                self.bootstrap.as_ref(),
                self.targets.len() > 1,
            )
            .await?;
        cache.insert(key, connection.clone());
        Ok(connection)
    }

    /// Number of cached connections
    pub async fn cached_connections(&self) -> usize {
        self.cache.lock().await.len()
    }
}

/// Default factory for deployments that register no provider: every lookup
/// is a configuration error.
pub(crate) struct UnconfiguredFactory;

#[async_trait]
impl ConnectionFactory for UnconfiguredFactory {
    async fn new_connection(
        &self,
        target: &str,
        _properties: &Map<String, Value>,
        _bootstrap: Option<&Map<String, Value>>,
        _multiple_targets: bool,
    ) -> Result<Arc<dyn Connection>, Error> {
        Err(Error::Config(format!(
            "no connection factory registered (requested target '{target}')"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeConnection {
        target: String,
    }

    impl Connection for FakeConnection {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CountingFactory {
        constructed: AtomicU32,
        delay: Duration,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                constructed: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                constructed: AtomicU32::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        async fn new_connection(
            &self,
            target: &str,
            _properties: &Map<String, Value>,
            _bootstrap: Option<&Map<String, Value>>,
            _multiple_targets: bool,
        ) -> Result<Arc<dyn Connection>, Error> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeConnection {
                target: target.to_string(),
            }))
        }
    }

    fn registry_with(factory: Arc<CountingFactory>) -> ConnectionRegistry {
        let mut us_east = Map::new();
        us_east.insert("region".to_string(), json!("us-east-1"));
        let mut eu_west = Map::new();
        eu_west.insert("region".to_string(), json!("eu-west-3"));
        ConnectionRegistry::new(
            factory,
            vec![
                TargetConfig::new("us-east", us_east),
                TargetConfig::new("eu-west", eu_west),
            ],
            None,
        )
    }

    #[tokio::test]
    async fn structurally_equal_configs_share_a_connection() {
        let factory = Arc::new(CountingFactory::new());
        let registry = registry_with(factory.clone());

        // distinct maps, same structure
        let mut a = Map::new();
        a.insert("keystone_url".to_string(), json!("http://auth"));
        let mut b = Map::new();
        b.insert("keystone_url".to_string(), json!("http://auth"));

        let first = registry.get("us-east", Some(&a)).await.unwrap();
        let second = registry.get("us-east", Some(&b)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_configs_and_targets_get_distinct_connections() {
        let factory = Arc::new(CountingFactory::new());
        let registry = registry_with(factory.clone());

        let plain = registry.get("us-east", None).await.unwrap();
        let mut overridden = Map::new();
        overridden.insert("region".to_string(), json!("us-east-2"));
        let with_override = registry.get("us-east", Some(&overridden)).await.unwrap();
        let other_target = registry.get("eu-west", None).await.unwrap();

        assert!(!Arc::ptr_eq(&plain, &with_override));
        assert!(!Arc::ptr_eq(&plain, &other_target));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 3);
        assert_eq!(registry.cached_connections().await, 3);

        let conn = other_target
            .as_any()
            .downcast_ref::<FakeConnection>()
            .unwrap();
        assert_eq!(conn.target, "eu-west");
    }

    #[tokio::test]
    async fn concurrent_first_callers_construct_once() {
        let factory = Arc::new(CountingFactory::with_delay(Duration::from_millis(50)));
        let registry = Arc::new(registry_with(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(
                async move { registry.get("us-east", None).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_target_is_rejected() {
        let registry = registry_with(Arc::new(CountingFactory::new()));
        assert!(matches!(
            registry.get("ap-south", None).await,
            Err(Error::TargetNotFound { .. })
        ));
    }
}
