//! Document store factory keyed by backend name.
use crate::config::StorageConfig;
use crate::data::jsonl_store::JsonlStore;
use crate::data::memory_store::MemoryStore;
use crate::data::store::DocumentStore;
use crate::error::StorageError;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

type StoreFactory = Box<
    dyn Fn(StorageConfig) -> BoxFuture<'static, Result<Arc<dyn DocumentStore>, StorageError>>
        + Send
        + Sync,
>;

/// Registry for document store factories.
///
/// The built-in backends are registered on construction:
/// - `memory` → [`MemoryStore`]
/// - `jsonl` → [`JsonlStore`] rooted at `StorageConfig::data_dir`
///
/// # Examples
///
/// ```no_run
/// use sensor_buckets::config::StorageConfig;
/// use sensor_buckets::data::storage_factory::StoreRegistry;
///
/// # async fn demo() -> Result<(), sensor_buckets::error::StorageError> {
/// let registry = StoreRegistry::new();
/// let store = registry.create(&StorageConfig::default()).await?;
/// println!("Using backend {}", store.backend());
/// # Ok(())
/// # }
/// ```
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRegistry {
    /// Creates a new registry with the built-in backends.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        registry.register("memory", |_config| {
            Box::pin(async {
                Ok::<_, StorageError>(Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>)
            })
        });

        registry.register("jsonl", |config| {
            Box::pin(async move {
                let store = JsonlStore::open(config.data_dir).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
            })
        });

        registry
    }

    /// Registers a custom backend, replacing any factory with the same name.
    pub fn register<F>(&mut self, backend: &str, factory: F)
    where
        F: Fn(StorageConfig) -> BoxFuture<'static, Result<Arc<dyn DocumentStore>, StorageError>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(backend.to_string(), Box::new(factory));
    }

    /// Creates the store named by `config.backend`.
    ///
    /// # Errors
    ///
    /// `StorageError::UnknownBackend` when nothing is registered under that name, or
    /// whatever the backend reports while opening.
    pub async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn DocumentStore>, StorageError> {
        let factory = self.factories.get(&config.backend).ok_or_else(|| {
            StorageError::UnknownBackend(format!(
                "{} (available: {})",
                config.backend,
                self.list_backends().join(", ")
            ))
        })?;
        let store = factory(config.clone()).await?;
        tracing::info!(backend = store.backend(), "Document store ready");
        Ok(store)
    }

    /// All registered backend names, sorted.
    pub fn list_backends(&self) -> Vec<String> {
        let mut backends: Vec<String> = self.factories.keys().cloned().collect();
        backends.sort();
        backends
    }

    /// Whether `backend` is registered.
    pub fn is_available(&self, backend: &str) -> bool {
        self.factories.contains_key(backend)
    }
}
