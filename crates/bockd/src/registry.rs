//! Process-wide container table.

use std::sync::Arc;

use dashmap::DashMap;

use crate::container::Container;

/// Containers by id, safe for concurrent lookup, insert and removal.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: DashMap<String, Arc<Container>>,
}

impl ContainerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a container.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert `container`, replacing any previous entry with the same id.
    pub fn add(&self, container: Arc<Container>) {
        self.containers.insert(container.id().to_string(), container);
    }

    /// Remove a container.
    pub fn delete(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.remove(id).map(|(_, container)| container)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.containers.contains_key(id)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.containers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;

    #[test]
    fn add_lookup_remove() {
        let registry = ContainerRegistry::new();
        registry.add(Arc::new(Container::new("b", ContainerConfig::default())));
        registry.add(Arc::new(Container::new("a", ContainerConfig::default())));

        assert!(registry.exists("a"));
        assert_eq!(registry.get("b").unwrap().id(), "b");
        assert_eq!(registry.ids(), vec!["a", "b"]);

        assert!(registry.delete("a").is_some());
        assert!(!registry.exists("a"));
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 1);
    }
}
