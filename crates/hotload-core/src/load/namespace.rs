//! The loader namespace.
//!
//! Resolves names to loaded types. A name is materialized at most once per
//! namespace; afterwards the cached [`TypeHandle`] is returned even if new
//! bytes are registered under the same name.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;

use super::archive::ArchiveSearchPath;
use super::handle::{LoadedType, TypeHandle};
use super::registry::ArtifactRegistry;
use crate::compile::CompiledArtifact;
use crate::config::RedefinitionPolicy;
use crate::error::{Error, Result};

/// A place artifact bytes can be found by name.
pub trait ArtifactSource: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    fn lookup(&self, name: &str) -> Option<Arc<[u8]>>;
}

type LoadSlot = Arc<Mutex<Option<TypeHandle>>>;

pub struct LoaderNamespace {
    registry: Arc<ArtifactRegistry>,
    search_path: Arc<ArchiveSearchPath>,
    /// Consulted in order: registry, archives, then pushed sources.
    sources: RwLock<Vec<Arc<dyn ArtifactSource>>>,
    loaded: DashMap<String, LoadSlot>,
    policy: RedefinitionPolicy,
}

impl Default for LoaderNamespace {
    fn default() -> Self {
        Self::new(RedefinitionPolicy::default())
    }
}

impl LoaderNamespace {
    pub fn new(policy: RedefinitionPolicy) -> Self {
        let registry = Arc::new(ArtifactRegistry::new());
        let search_path = Arc::new(ArchiveSearchPath::new());
        let sources: Vec<Arc<dyn ArtifactSource>> = vec![
            Arc::clone(&registry) as Arc<dyn ArtifactSource>,
            Arc::clone(&search_path) as Arc<dyn ArtifactSource>,
        ];

        Self {
            registry,
            search_path,
            sources: RwLock::new(sources),
            loaded: DashMap::new(),
            policy,
        }
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn search_path(&self) -> &ArchiveSearchPath {
        &self.search_path
    }

    pub fn policy(&self) -> RedefinitionPolicy {
        self.policy
    }

    /// Store `bytes` as the definition of `name`.
    pub fn register(&self, name: &str, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.register_artifact(CompiledArtifact::new(name, bytes))
    }

    /// Store an artifact; last write wins.
    ///
    /// Holds `name`'s load slot, so a concurrent [`resolve`](Self::resolve)
    /// sees either the old bytes and a loaded name, or the new bytes.
    pub fn register_artifact(&self, artifact: CompiledArtifact) -> Result<()> {
        let name = artifact.name().to_string();
        let slot = self.slot(&name);

        let outcome = {
            let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match (guard.is_some(), self.policy) {
                (true, RedefinitionPolicy::Reject) => Err(Error::RedefinitionHazard {
                    name: name.clone(),
                }),
                (loaded, _) => {
                    if loaded {
                        tracing::warn!(
                            "{} is already loaded; new bytes only affect other namespaces",
                            name
                        );
                    }
                    let len = artifact.len();
                    if self.registry.insert(artifact).is_some() {
                        tracing::debug!("Replaced artifact for {} ({} bytes)", name, len);
                    } else {
                        tracing::debug!("Registered artifact for {} ({} bytes)", name, len);
                    }
                    Ok(())
                }
            }
        };

        self.release(&name, slot);
        outcome
    }

    /// Whether `name` has been materialized in this namespace.
    pub fn is_loaded(&self, name: &str) -> bool {
        let Some(slot) = self.loaded.get(name).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let loaded = slot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        loaded
    }

    /// Names materialized so far, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        let slots: Vec<(String, LoadSlot)> = self
            .loaded
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut names: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Resolve `name` to a loaded type, materializing it on first use.
    pub fn resolve(&self, name: &str) -> Result<TypeHandle> {
        let slot = self.slot(name);
        let resolved = self.materialize(name, &slot);
        if resolved.is_err() {
            self.release(name, slot);
        }
        resolved
    }

    fn materialize(&self, name: &str, slot: &LoadSlot) -> Result<TypeHandle> {
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }

        let (origin, bytes) = self.find(name).ok_or_else(|| Error::Resolution {
            name: name.to_string(),
        })?;

        let handle = TypeHandle::new(LoadedType::load(name, &bytes)?);
        tracing::info!(
            "Loaded {} from {} ({} operation(s))",
            name,
            origin,
            handle.operations().len()
        );

        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// The load slot for `name`, created empty on first use.
    fn slot(&self, name: &str) -> LoadSlot {
        if let Some(slot) = self.loaded.get(name) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.loaded.entry(name.to_string()).or_default().value())
    }

    /// Forget `name`'s slot if it is still empty and only we hold it.
    fn release(&self, name: &str, slot: LoadSlot) {
        self.loaded.remove_if(name, |_, current| {
            Arc::ptr_eq(current, &slot)
                && Arc::strong_count(current) == 2
                && matches!(current.try_lock().as_deref(), Ok(None))
        });
    }

    fn find(&self, name: &str) -> Option<(String, Arc<[u8]>)> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources
            .iter()
            .find_map(|source| source.lookup(name).map(|bytes| (source.describe(), bytes)))
    }

    /// Open the archive at `location` and search it after earlier ones.
    pub fn append_search_path(&self, location: impl AsRef<Path>) -> Result<()> {
        let archive = self.search_path.append(location)?;
        tracing::info!(
            "Appended {} ({} artifact(s)) to the search path",
            archive.location().display(),
            archive.len()
        );
        Ok(())
    }

    /// Consult `source` after every existing source.
    pub fn push_source(&self, source: Arc<dyn ArtifactSource>) {
        tracing::debug!("Added artifact source: {}", source.describe());
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source);
    }

    /// Forget all registered bytes. Loaded types stay resolvable.
    pub fn clear_registry(&self) {
        let count = self.registry.len();
        self.registry.clear();
        tracing::debug!("Cleared {} registered artifact(s)", count);
    }
}

impl std::fmt::Debug for LoaderNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderNamespace")
            .field("registered", &self.registry.len())
            .field("archives", &self.search_path.len())
            .field("loaded", &self.loaded_names())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(&'static str, &'static [u8]);

    impl ArtifactSource for FixedSource {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        fn lookup(&self, name: &str) -> Option<Arc<[u8]>> {
            (name == self.0).then(|| Arc::from(self.1))
        }
    }

    #[test]
    fn test_unknown_name_fails_resolution() {
        let namespace = LoaderNamespace::default();
        let err = namespace.resolve("p::Missing").unwrap_err();
        assert!(matches!(err, Error::Resolution { ref name } if name == "p::Missing"));
        assert!(!namespace.is_loaded("p::Missing"));
    }

    #[test]
    fn test_registry_comes_before_pushed_sources() {
        let namespace = LoaderNamespace::default();
        namespace.push_source(Arc::new(FixedSource("A", b"from source")));
        namespace.register("A", b"from registry".to_vec()).unwrap();

        let (origin, bytes) = namespace.find("A").unwrap();
        assert!(origin.starts_with("registry"));
        assert_eq!(&bytes[..], b"from registry");

        namespace.clear_registry();
        let (origin, bytes) = namespace.find("A").unwrap();
        assert_eq!(origin, "fixed");
        assert_eq!(&bytes[..], b"from source");
    }

    #[test]
    fn test_garbage_bytes_are_rejected_and_not_cached() {
        let namespace = LoaderNamespace::default();
        namespace.register("p::Junk", b"not a library".to_vec()).unwrap();

        let err = namespace.resolve("p::Junk").unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { .. }));
        assert!(!namespace.is_loaded("p::Junk"));
        assert!(namespace.loaded_names().is_empty());
    }

    #[test]
    fn test_bad_search_path_location() {
        let namespace = LoaderNamespace::default();
        let err = namespace.append_search_path("/nonexistent/lib.hla").unwrap_err();
        assert!(matches!(err, Error::InvalidLocation { .. }));
        assert!(namespace.search_path().is_empty());
    }

    #[test]
    fn test_failed_resolution_leaves_no_slot() {
        let namespace = LoaderNamespace::default();
        for i in 0..10 {
            assert!(namespace.resolve(&format!("p::Missing{}", i)).is_err());
        }
        assert!(namespace.loaded.is_empty());

        namespace.register("p::Junk", b"not a library".to_vec()).unwrap();
        assert!(namespace.resolve("p::Junk").is_err());
        assert!(namespace.loaded.is_empty());
    }

    #[test]
    fn test_register_waits_for_in_flight_load() {
        let namespace = LoaderNamespace::new(RedefinitionPolicy::Reject);
        let slot = namespace.slot("A");
        let guard = slot.lock().unwrap();

        std::thread::scope(|s| {
            let register = s.spawn(|| namespace.register("A", vec![1u8]));

            std::thread::sleep(std::time::Duration::from_millis(100));
            assert!(!register.is_finished());
            assert!(!namespace.registry().contains("A"));

            drop(guard);
            register.join().unwrap().unwrap();
        });

        assert!(namespace.registry().contains("A"));
    }

    #[test]
    fn test_register_before_load_is_unrestricted() {
        let namespace = LoaderNamespace::new(RedefinitionPolicy::Reject);
        namespace.register("A", vec![1u8]).unwrap();
        namespace.register("A", vec![2u8]).unwrap();
        assert_eq!(&namespace.registry().get("A").unwrap().bytes()[..], [2]);
    }
}
