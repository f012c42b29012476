//! In-memory artifact registry.

use std::sync::Arc;

use dashmap::DashMap;

use super::namespace::ArtifactSource;
use crate::compile::CompiledArtifact;

/// Name → artifact map shared by the driver and the loader.
///
/// Writers for different names do not contend; for the same name the last
/// insert wins.
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    entries: DashMap<String, CompiledArtifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous artifact for the name.
    pub fn insert(&self, artifact: CompiledArtifact) -> Option<CompiledArtifact> {
        self.entries.insert(artifact.name().to_string(), artifact)
    }

    pub fn get(&self, name: &str) -> Option<CompiledArtifact> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<CompiledArtifact> {
        self.entries.remove(name).map(|(_, artifact)| artifact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Point-in-time copy of every artifact, sorted by name.
    pub fn snapshot(&self) -> Vec<CompiledArtifact> {
        let mut artifacts: Vec<CompiledArtifact> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        artifacts.sort_by(|a, b| a.name().cmp(b.name()));
        artifacts
    }
}

impl ArtifactSource for ArtifactRegistry {
    fn describe(&self) -> String {
        format!("registry ({} artifact(s))", self.len())
    }

    fn lookup(&self, name: &str) -> Option<Arc<[u8]>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let registry = ArtifactRegistry::new();
        assert!(registry.insert(CompiledArtifact::new("p::A", vec![1u8])).is_none());
        let previous = registry.insert(CompiledArtifact::new("p::A", vec![2u8])).unwrap();

        assert_eq!(&previous.bytes()[..], [1]);
        assert_eq!(&registry.get("p::A").unwrap().bytes()[..], [2]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_shares_bytes() {
        let registry = ArtifactRegistry::new();
        let artifact = CompiledArtifact::new("A", vec![7u8; 16]);
        registry.insert(artifact.clone());

        let bytes = registry.lookup("A").unwrap();
        assert!(Arc::ptr_eq(&bytes, artifact.bytes()));
        assert!(registry.lookup("B").is_none());
    }

    #[test]
    fn test_clear_and_names() {
        let registry = ArtifactRegistry::new();
        registry.insert(CompiledArtifact::new("b::B", vec![0u8]));
        registry.insert(CompiledArtifact::new("a::A", vec![0u8]));

        assert_eq!(registry.names(), ["a::A", "b::B"]);
        assert_eq!(registry.snapshot()[0].name(), "a::A");

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("a::A"));
    }

    #[test]
    fn test_concurrent_inserts_for_distinct_names() {
        let registry = Arc::new(ArtifactRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.insert(CompiledArtifact::new(format!("t{i}::T{j}"), vec![i as u8]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
        for i in 0..8u8 {
            for j in 0..50 {
                let artifact = registry.get(&format!("t{i}::T{j}")).unwrap();
                assert_eq!(&artifact.bytes()[..], [i]);
            }
        }
    }
}
