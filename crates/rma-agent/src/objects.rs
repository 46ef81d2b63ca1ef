//! Process-wide table of bound managed objects.
//!
//! Every session binds its root and auxiliary objects here under names
//! derived from its identity; connectors serve requests out of it.

use std::collections::HashMap;
use std::sync::Arc;

use rma_core::ManagedObject;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::BindingError;

/// Shared name → object table. Cheap to clone.
#[derive(Clone, Default)]
pub struct ObjectTable {
    objects: Arc<RwLock<HashMap<String, Arc<dyn ManagedObject>>>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `object` under `name`; fails if the name is taken.
    pub async fn bind(
        &self,
        name: &str,
        object: Arc<dyn ManagedObject>,
    ) -> Result<(), BindingError> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(name) {
            return Err(BindingError::AlreadyBound(name.to_string()));
        }
        objects.insert(name.to_string(), object);
        debug!(object = name, "Bound object");
        Ok(())
    }

    pub async fn unbind(&self, name: &str) -> Result<Arc<dyn ManagedObject>, BindingError> {
        let removed = self.objects.write().await.remove(name);
        debug!(object = name, found = removed.is_some(), "Unbound object");
        removed.ok_or_else(|| BindingError::NotBound(name.to_string()))
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ManagedObject>> {
        self.objects.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.objects.read().await.contains_key(name)
    }

    /// All bound names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
