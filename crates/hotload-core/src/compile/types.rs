//! Common types for the compilation pipeline.

use std::sync::Arc;

use super::diagnostics::Diagnostic;
use super::name_resolver::resolve_name;
use crate::error::Result;

/// One self-contained source text, paired with the name of the type it declares.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    name: String,
    source: String,
}

impl CompilationUnit {
    /// Pair source text with an already known name.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Derive the name from the source text.
    pub fn from_source(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let name = resolve_name(&source)?;
        Ok(Self { name, source })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// File name reported in diagnostics, e.g. `memory:///p/Greeter.rs`.
    pub fn virtual_path(&self) -> String {
        format!("memory:///{}.rs", self.name.replace("::", "/"))
    }

    /// Crate name handed to rustc; unique enough per name, always a valid identifier.
    pub fn crate_name(&self) -> String {
        let mut crate_name = String::from("hotload_unit_");
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                crate_name.push(c.to_ascii_lowercase());
            } else {
                crate_name.push('_');
            }
        }
        crate_name
    }
}

/// Compiled output for one declared type.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    name: String,
    bytes: Arc<[u8]>,
}

impl CompiledArtifact {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of a successful compile call.
#[derive(Debug, Clone)]
pub struct CompileReport {
    /// The artifact now held by the registry
    pub artifact: CompiledArtifact,

    /// Non-fatal diagnostics (warnings, notes)
    pub diagnostics: Vec<Diagnostic>,

    /// Wall-clock compile time in milliseconds
    pub compile_time_ms: u64,
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_from_source() {
        let unit = CompilationUnit::from_source("pub mod p { pub struct Greeter; }").unwrap();
        assert_eq!(unit.name(), "p::Greeter");
        assert_eq!(unit.virtual_path(), "memory:///p/Greeter.rs");
        assert_eq!(unit.crate_name(), "hotload_unit_p__greeter");
    }

    #[test]
    fn test_unit_from_source_without_type() {
        assert!(CompilationUnit::from_source("fn main() {}").is_err());
    }

    #[test]
    fn test_artifact_shares_bytes() {
        let artifact = CompiledArtifact::new("A", vec![1u8, 2, 3]);
        let clone = artifact.clone();
        assert!(Arc::ptr_eq(artifact.bytes(), clone.bytes()));
        assert_eq!(artifact.len(), 3);
        assert!(!artifact.is_empty());
    }

    #[test]
    fn test_dylib_extension() {
        let ext = dylib_extension();
        #[cfg(target_os = "linux")]
        assert_eq!(ext, "so");
        #[cfg(target_os = "macos")]
        assert_eq!(ext, "dylib");
        #[cfg(target_os = "windows")]
        assert_eq!(ext, "dll");
        assert!(!ext.is_empty());
    }
}
