use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};
use trellis_core::Failure;

use super::config::ServerConfig;

// ---------------------------------------------------------------------------
// ResourceContext
// ---------------------------------------------------------------------------

/// Context provided to resources during acquisition.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub config: Arc<ServerConfig>,
}

// ---------------------------------------------------------------------------
// Resource trait
// ---------------------------------------------------------------------------

/// A resource held for the lifetime of a running server (connection pool,
/// cache, client).
///
/// Resources are acquired in registration order before warmup and released
/// in reverse registration order at shutdown or when startup fails. The
/// `Any` bound enables type-based lookup via `ResourceRegistry::get::<T>()`.
#[async_trait]
pub trait Resource: Send + Sync + Any {
    /// Returns the unique name of this resource.
    fn name(&self) -> &'static str;

    async fn acquire(&self, ctx: &ResourceContext) -> anyhow::Result<()>;

    async fn release(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ResourceRegistry
// ---------------------------------------------------------------------------

/// Registry for lifecycle-managed resources.
///
/// Lookup is by name (`get_by_name`) or by concrete type (`get::<T>`).
/// Only resources whose `acquire` succeeded are released.
pub struct ResourceRegistry {
    by_name: DashMap<&'static str, Arc<dyn Resource>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order for deterministic acquire/release sequencing.
    order: RwLock<Vec<&'static str>>,
    /// Names acquired so far, in acquisition order.
    acquired: Mutex<Vec<&'static str>>,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            order: RwLock::new(Vec::new()),
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if a resource with the same name is
    /// already registered.
    pub fn register<T: Resource>(&self, resource: T) -> Result<(), Failure> {
        let name = resource.name();
        if self.by_name.contains_key(name) {
            return Err(Failure::configuration(format!(
                "resource `{name}` is registered twice"
            )));
        }
        let arc = Arc::new(resource);
        self.by_name.insert(name, arc.clone());
        self.by_type.insert(TypeId::of::<T>(), arc);
        self.order.write().push(name);
        Ok(())
    }

    /// Retrieve a resource by its concrete type.
    pub fn get<T: Resource>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieve a resource by its name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.read().is_empty()
    }

    /// Number of resources currently held.
    #[must_use]
    pub fn acquired_count(&self) -> usize {
        self.acquired.lock().len()
    }

    /// Acquires all registered resources in registration order.
    ///
    /// On the first failure, everything acquired so far is released (in
    /// reverse order) before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the failing resource's error, annotated with its name.
    pub async fn acquire_all(&self, ctx: &ResourceContext) -> anyhow::Result<()> {
        let order = self.order.read().clone();
        for name in order {
            let Some(resource) = self.get_by_name(name) else {
                continue;
            };
            if let Err(e) = resource.acquire(ctx).await {
                error!(resource = name, error = %e, "resource acquisition failed");
                // Best effort; the acquisition error is the one reported.
                let _ = self.release_all().await;
                return Err(e.context(format!("failed to acquire resource `{name}`")));
            }
            info!(resource = name, "resource acquired");
            self.acquired.lock().push(name);
        }
        Ok(())
    }

    /// Releases every acquired resource in reverse acquisition order.
    ///
    /// Release continues past errors so that one failing resource does not
    /// leak the others.
    ///
    /// # Errors
    ///
    /// Returns the first release error after all releases were attempted.
    pub async fn release_all(&self) -> anyhow::Result<()> {
        let acquired = std::mem::take(&mut *self.acquired.lock());
        let mut first_error = None;
        for name in acquired.iter().rev() {
            let Some(resource) = self.get_by_name(name) else {
                continue;
            };
            match resource.release().await {
                Ok(()) => info!(resource = *name, "resource released"),
                Err(e) => {
                    error!(resource = *name, error = %e, "resource release failed");
                    if first_error.is_none() {
                        first_error = Some(e.context(format!("failed to release resource `{name}`")));
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use trellis_core::FailureKind;

    use super::*;

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    /// Test resource that records lifecycle calls and can be told to fail.
    struct TestResource {
        res_name: &'static str,
        fail_acquire: bool,
        fail_release: bool,
        order_log: Log,
    }

    impl TestResource {
        fn new(name: &'static str, order_log: Log) -> Self {
            Self {
                res_name: name,
                fail_acquire: false,
                fail_release: false,
                order_log,
            }
        }

        fn failing_acquire(mut self) -> Self {
            self.fail_acquire = true;
            self
        }

        fn failing_release(mut self) -> Self {
            self.fail_release = true;
            self
        }
    }

    #[async_trait]
    impl Resource for TestResource {
        fn name(&self) -> &'static str {
            self.res_name
        }

        async fn acquire(&self, _ctx: &ResourceContext) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("acquire:{}", self.res_name));
            if self.fail_acquire {
                anyhow::bail!("{} unavailable", self.res_name);
            }
            Ok(())
        }

        async fn release(&self) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("release:{}", self.res_name));
            if self.fail_release {
                anyhow::bail!("{} stuck", self.res_name);
            }
            Ok(())
        }
    }

    /// A distinct resource type for type-based lookup testing.
    struct Pool;

    #[async_trait]
    impl Resource for Pool {
        fn name(&self) -> &'static str {
            "pool"
        }
        async fn acquire(&self, _ctx: &ResourceContext) -> anyhow::Result<()> {
            Ok(())
        }
        async fn release(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn make_ctx() -> ResourceContext {
        ResourceContext {
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn new_log() -> Log {
        Arc::new(parking_lot::Mutex::new(Vec::new()))
    }

    #[test]
    fn register_and_lookup() {
        let registry = ResourceRegistry::new();
        registry.register(TestResource::new("cache", new_log())).unwrap();
        registry.register(Pool).unwrap();

        assert_eq!(registry.get_by_name("cache").unwrap().name(), "cache");
        assert!(registry.get_by_name("nonexistent").is_none());
        assert!(registry.get::<Pool>().is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = ResourceRegistry::new();
        registry.register(Pool).unwrap();
        let err = registry.register(Pool).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[tokio::test]
    async fn acquire_in_order_release_in_reverse() {
        let log = new_log();
        let registry = ResourceRegistry::new();
        registry.register(TestResource::new("first", log.clone())).unwrap();
        registry.register(TestResource::new("second", log.clone())).unwrap();
        registry.register(TestResource::new("third", log.clone())).unwrap();

        registry.acquire_all(&make_ctx()).await.unwrap();
        assert_eq!(registry.acquired_count(), 3);
        registry.release_all().await.unwrap();
        assert_eq!(registry.acquired_count(), 0);

        assert_eq!(
            log.lock().clone(),
            vec![
                "acquire:first",
                "acquire:second",
                "acquire:third",
                "release:third",
                "release:second",
                "release:first",
            ]
        );
    }

    #[tokio::test]
    async fn failed_acquire_releases_already_acquired() {
        let log = new_log();
        let registry = ResourceRegistry::new();
        registry.register(TestResource::new("first", log.clone())).unwrap();
        registry
            .register(TestResource::new("second", log.clone()).failing_acquire())
            .unwrap();
        registry.register(TestResource::new("third", log.clone())).unwrap();

        let err = registry.acquire_all(&make_ctx()).await.unwrap_err();
        assert!(err.to_string().contains("second"));
        assert_eq!(
            log.lock().clone(),
            vec!["acquire:first", "acquire:second", "release:first"]
        );
        assert_eq!(registry.acquired_count(), 0);
    }

    #[tokio::test]
    async fn release_continues_past_errors() {
        let log = new_log();
        let registry = ResourceRegistry::new();
        registry.register(TestResource::new("first", log.clone())).unwrap();
        registry
            .register(TestResource::new("second", log.clone()).failing_release())
            .unwrap();

        registry.acquire_all(&make_ctx()).await.unwrap();
        assert!(registry.release_all().await.is_err());
        assert_eq!(
            log.lock().clone(),
            vec![
                "acquire:first",
                "acquire:second",
                "release:second",
                "release:first",
            ]
        );
    }

    #[tokio::test]
    async fn release_without_acquire_is_noop() {
        let log = new_log();
        let registry = ResourceRegistry::new();
        registry.register(TestResource::new("only", log.clone())).unwrap();
        registry.release_all().await.unwrap();
        assert!(log.lock().is_empty());
    }
}
