//! Entity catalog
//!
//! The scheduler only ever reads entities. The catalog owns them and is free
//! to change between cycles; each cycle works on the snapshot returned by
//! [`EntityCatalog::list_entities`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::entity::Entity;

/// Read access to the entity population
///
/// Implementations must be `Send + Sync` as one catalog is shared by the
/// actors of all proxy checks.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    /// All entities in `namespace`, in a stable order
    async fn list_entities(&self, namespace: &str) -> Result<Vec<Entity>>;
}

/// In-memory catalog
///
/// Entities are grouped by namespace and kept in insertion order. Useful for
/// tests and for static fleets declared in the configuration file.
#[derive(Default)]
pub struct MemoryCatalog {
    namespaces: RwLock<HashMap<String, Vec<Entity>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog pre-populated with `entities`
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut namespaces: HashMap<String, Vec<Entity>> = HashMap::new();
        for entity in entities {
            let list = namespaces.entry(entity.namespace.clone()).or_default();
            match list.iter_mut().find(|e| e.name == entity.name) {
                Some(existing) => *existing = entity,
                None => list.push(entity),
            }
        }

        Self {
            namespaces: RwLock::new(namespaces),
        }
    }

    /// Insert an entity or replace the one with the same name and namespace
    pub async fn upsert(&self, entity: Entity) {
        let mut namespaces = self.namespaces.write().await;
        let list = namespaces.entry(entity.namespace.clone()).or_default();

        match list.iter_mut().find(|e| e.name == entity.name) {
            Some(existing) => *existing = entity,
            None => list.push(entity),
        }
    }

    /// Remove an entity, returning it if it existed
    pub async fn remove(&self, namespace: &str, name: &str) -> Option<Entity> {
        let mut namespaces = self.namespaces.write().await;
        let list = namespaces.get_mut(namespace)?;
        let index = list.iter().position(|e| e.name == name)?;
        Some(list.remove(index))
    }

    /// Total number of entities across namespaces
    pub async fn len(&self) -> usize {
        self.namespaces.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EntityCatalog for MemoryCatalog {
    async fn list_entities(&self, namespace: &str) -> Result<Vec<Entity>> {
        let entities = self
            .namespaces
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default();

        debug!("listing {} entities in namespace {namespace}", entities.len());
        Ok(entities)
    }
}
