//! Virtual output sink.
//!
//! rustc insists on writing its output somewhere on disk, so every compile
//! gets a private scratch directory that is removed when the sink drops.
//! Artifacts never leave it as files: they are read back into memory and
//! handed to the loader namespace.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use super::types::{CompilationUnit, CompiledArtifact, dylib_extension, dylib_prefix};
use crate::error::Result;
use crate::load::LoaderNamespace;

/// Classification of what the toolchain produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// The linked artifact; captured in memory.
    Artifact,
    /// The compiler's diagnostic stream; kept in scratch and parsed.
    Diagnostics,
    /// Anything requested through options (`--emit dep-info=...`);
    /// written wherever the option says.
    Other,
}

impl OutputKind {
    /// Whether outputs of this kind are held in memory.
    pub fn is_captured(self) -> bool {
        matches!(self, Self::Artifact)
    }
}

/// Private scratch area for one compilation.
pub struct VirtualOutputSink {
    scratch: TempDir,
    namespace: Arc<LoaderNamespace>,
}

impl VirtualOutputSink {
    /// Create a scratch directory under `scratch_root` (or the system temp
    /// directory).
    pub fn new(scratch_root: Option<&Path>, namespace: Arc<LoaderNamespace>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("hotload-");
        let scratch = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        tracing::debug!("Scratch area at {}", scratch.path().display());
        Ok(Self { scratch, namespace })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Where the toolchain is told to link the unit.
    pub fn artifact_path(&self, unit: &CompilationUnit) -> PathBuf {
        self.path_for(unit, OutputKind::Artifact)
    }

    /// Where the toolchain's stderr is collected.
    pub fn diagnostics_path(&self, unit: &CompilationUnit) -> PathBuf {
        self.path_for(unit, OutputKind::Diagnostics)
    }

    fn path_for(&self, unit: &CompilationUnit, kind: OutputKind) -> PathBuf {
        let crate_name = unit.crate_name();
        let file_name = match kind {
            OutputKind::Artifact => {
                format!("{}{}.{}", dylib_prefix(), crate_name, dylib_extension())
            }
            OutputKind::Diagnostics => format!("{}.stderr", crate_name),
            OutputKind::Other => crate_name,
        };
        self.scratch.path().join(file_name)
    }

    /// Open an in-memory writer for the artifact named `name`.
    pub fn open_artifact(&self, name: &str) -> ArtifactWriter {
        ArtifactWriter {
            name: name.to_string(),
            buffer: Vec::new(),
            namespace: Arc::clone(&self.namespace),
        }
    }

    /// Move the linked artifact for `unit` from scratch into the registry.
    pub fn capture(&self, unit: &CompilationUnit) -> Result<CompiledArtifact> {
        let mut file = File::open(self.artifact_path(unit))?;
        let mut writer = self.open_artifact(unit.name());
        io::copy(&mut file, &mut writer)?;
        writer.close()
    }
}

/// Accumulates artifact bytes; [`close`](Self::close) registers them.
///
/// Dropping the writer without closing it discards the bytes.
pub struct ArtifactWriter {
    name: String,
    buffer: Vec<u8>,
    namespace: Arc<LoaderNamespace>,
}

impl ArtifactWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finish the artifact and register it under its name.
    pub fn close(self) -> Result<CompiledArtifact> {
        let artifact = CompiledArtifact::new(self.name, self.buffer);
        self.namespace.register_artifact(artifact.clone())?;
        Ok(artifact)
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (VirtualOutputSink, Arc<LoaderNamespace>) {
        let namespace = Arc::new(LoaderNamespace::default());
        let sink = VirtualOutputSink::new(None, Arc::clone(&namespace)).unwrap();
        (sink, namespace)
    }

    #[test]
    fn test_close_registers_bytes() {
        let (sink, namespace) = sink();
        let mut writer = sink.open_artifact("p::A");
        writer.write_all(b"\x7fELF").unwrap();
        writer.write_all(b"rest").unwrap();
        assert_eq!(writer.len(), 8);

        let artifact = writer.close().unwrap();
        assert_eq!(artifact.len(), 8);
        assert_eq!(namespace.registry().get("p::A").unwrap().len(), 8);
    }

    #[test]
    fn test_unclosed_writer_registers_nothing() {
        let (sink, namespace) = sink();
        {
            let mut writer = sink.open_artifact("p::A");
            writer.write_all(b"partial").unwrap();
        }
        assert!(namespace.registry().get("p::A").is_none());
    }

    #[test]
    fn test_scratch_is_removed_on_drop() {
        let (sink, _namespace) = sink();
        let unit = CompilationUnit::new("p::A", "");
        let dir = sink.scratch_dir().to_path_buf();
        std::fs::write(sink.artifact_path(&unit), b"bytes").unwrap();
        assert!(dir.exists());

        drop(sink);
        assert!(!dir.exists());
    }

    #[test]
    fn test_capture_reads_linked_artifact() {
        let (sink, namespace) = sink();
        let unit = CompilationUnit::new("p::A", "");
        std::fs::write(sink.artifact_path(&unit), b"artifact bytes").unwrap();

        let artifact = sink.capture(&unit).unwrap();
        assert_eq!(&artifact.bytes()[..], b"artifact bytes");
        assert!(namespace.registry().contains("p::A"));
    }

    #[test]
    fn test_paths_stay_inside_scratch() {
        let root = tempfile::tempdir().unwrap();
        let namespace = Arc::new(LoaderNamespace::default());
        let sink = VirtualOutputSink::new(Some(root.path()), namespace).unwrap();
        let unit = CompilationUnit::new("p::Greeter", "");

        assert!(sink.scratch_dir().starts_with(root.path()));
        assert!(sink.artifact_path(&unit).starts_with(sink.scratch_dir()));
        assert!(sink.diagnostics_path(&unit).starts_with(sink.scratch_dir()));
        assert!(OutputKind::Artifact.is_captured());
        assert!(!OutputKind::Other.is_captured());
    }
}
