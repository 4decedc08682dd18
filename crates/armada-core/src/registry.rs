//! Lazy, shared registries for vendor-keyed capability objects.
//!
//! One registry instance serves the whole worker pool: entries are
//! constructed on first lookup through an injected factory, cached forever
//! (vendor clients are long-lived and concurrency-safe by contract), and a
//! failed construction is not cached so a later lookup retries.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::provider::Provider;
use crate::provisioner::Provisioner;

/// Registry of lazily constructed [`Provider`] adapters, keyed by vendor tag.
pub type ProviderRegistry = LazyRegistry<dyn Provider>;

/// Registry of lazily constructed [`Provisioner`] adapters, keyed by vendor tag.
pub type ProvisionerRegistry = LazyRegistry<dyn Provisioner>;

/// A map of shared capability objects populated on demand.
///
/// Lookup is double-checked: a read-lock miss upgrades to the write lock,
/// re-checks (another task may have won the race), and only then constructs
/// and inserts. Entries are never evicted.
pub struct LazyRegistry<T: ?Sized> {
    factory: Box<dyn Fn(&str) -> Result<Arc<T>> + Send + Sync>,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> LazyRegistry<T> {
    /// Create a registry that constructs entries with `factory`.
    ///
    /// The factory receives the vendor tag and returns the shared adapter,
    /// or an error when the tag is unknown or construction fails.
    pub fn new(factory: impl Fn(&str) -> Result<Arc<T>> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the adapter for a vendor tag, constructing it on first use.
    pub async fn get(&self, key: &str) -> Result<Arc<T>> {
        if let Some(entry) = self.entries.read().await.get(key) {
            return Ok(Arc::clone(entry));
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock: another task may have constructed
        // the entry while we waited.
        if let Some(entry) = entries.get(key) {
            return Ok(Arc::clone(entry));
        }

        let entry = (self.factory)(key)?;
        entries.insert(key.to_owned(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Number of constructed entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no entry has been constructed yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
