//! The compile-and-load facade.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::compile::{
    CompilationDriver, CompileReport, OptionSet, ToolchainManager, resolve_name,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::load::{ArchiveWriter, ArtifactSource, LoaderNamespace, TypeHandle};

/// Compiles source text and loads the result into the running process.
///
/// One engine owns one registry and one loader namespace. It is `Send + Sync`
/// and meant to be shared behind an `Arc`.
pub struct Engine {
    config: EngineConfig,
    namespace: Arc<LoaderNamespace>,
    driver: CompilationDriver,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let namespace = Arc::new(LoaderNamespace::new(config.redefinition_policy));
        let driver = CompilationDriver::new(config.clone(), Arc::clone(&namespace));
        Self {
            config,
            namespace,
            driver,
        }
    }

    /// Engine configured from `HOTLOAD_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn namespace(&self) -> &Arc<LoaderNamespace> {
        &self.namespace
    }

    /// The detected toolchain (detected once, on first use).
    pub fn toolchain(&self) -> Result<&ToolchainManager> {
        self.driver.toolchain()
    }

    /// Fully-qualified name of the type `source` declares.
    pub fn resolve_name(&self, source: &str) -> Result<String> {
        resolve_name(source)
    }

    /// Compile and register `source` under `name`.
    pub fn compile(&self, name: &str, source: &str, options: &OptionSet) -> Result<CompileReport> {
        self.driver.compile(name, source, options)
    }

    /// [`compile`](Self::compile) with an explicit deadline (`None` waits forever).
    pub fn compile_with_deadline(
        &self,
        name: &str,
        source: &str,
        options: &OptionSet,
        deadline: Option<Duration>,
    ) -> Result<CompileReport> {
        self.driver
            .compile_with_deadline(name, source, options, deadline)
    }

    /// Resolve the name, compile, and load in one step.
    ///
    /// Default options are used when `options` is `None`. Nothing is
    /// registered if any step before loading fails.
    pub fn compile_and_load(&self, source: &str, options: Option<&OptionSet>) -> Result<TypeHandle> {
        let name = resolve_name(source)?;
        let defaults = OptionSet::default();
        let report = self.compile(&name, source, options.unwrap_or(&defaults))?;

        for diagnostic in &report.diagnostics {
            tracing::debug!("{}: {}", name, diagnostic.message);
        }

        self.load(&name)
    }

    /// Resolve `name` through the namespace, materializing it if needed.
    pub fn load(&self, name: &str) -> Result<TypeHandle> {
        self.namespace.resolve(name)
    }

    /// Register precompiled artifact bytes under `name`.
    pub fn register(&self, name: &str, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.namespace.register(name, bytes)
    }

    /// Append an archive to the search path.
    pub fn append_search_path(&self, location: impl AsRef<Path>) -> Result<()> {
        self.namespace.append_search_path(location)
    }

    /// Append a custom artifact source after every existing one.
    pub fn push_source(&self, source: Arc<dyn ArtifactSource>) {
        self.namespace.push_source(source)
    }

    /// Forget all registered bytes. Already loaded types stay usable.
    pub fn clear_registry(&self) {
        self.namespace.clear_registry()
    }

    /// Write every registered artifact into an archive at `path`.
    /// Returns the number of artifacts written.
    pub fn export_archive(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut writer = ArchiveWriter::new();
        for artifact in self.namespace.registry().snapshot() {
            writer.add_artifact(&artifact);
        }
        writer.write_to(path)?;
        Ok(writer.len())
    }
}
