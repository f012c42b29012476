//! Artifact archives.
//!
//! An archive bundles previously compiled artifacts into one file:
//!
//! ```text
//! b"HLARCHV1" | bincode(ArchiveBody { format_version, entries: [(name, bytes)] })
//! ```
//!
//! Archives on the search path are consulted after the registry, in the
//! order they were appended.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use bincode::{Decode, Encode};
use rustc_hash::FxHashMap;

use super::namespace::ArtifactSource;
use crate::compile::CompiledArtifact;
use crate::error::{Error, Result};

/// Leading bytes of every archive file.
pub const ARCHIVE_MAGIC: &[u8; 8] = b"HLARCHV1";

const FORMAT_VERSION: u32 = 1;

/// Upper bound on archive size, and on what decoding may allocate.
pub const MAX_ARCHIVE_BYTES: usize = 1 << 30;

#[derive(Debug, Encode, Decode)]
struct ArchiveBody {
    format_version: u32,
    entries: Vec<ArchiveEntry>,
}

#[derive(Debug, Encode, Decode)]
struct ArchiveEntry {
    name: String,
    bytes: Vec<u8>,
}

/// An opened, fully indexed archive.
#[derive(Debug)]
pub struct Archive {
    location: PathBuf,
    entries: FxHashMap<String, Arc<[u8]>>,
}

impl Archive {
    /// Read and index the archive at `path`.
    ///
    /// Any problem with the file surfaces as [`Error::InvalidLocation`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let location = path.as_ref().to_path_buf();
        let invalid = |reason: String| Error::InvalidLocation {
            location: location.clone(),
            reason,
        };

        let data = std::fs::read(&location).map_err(|e| invalid(e.to_string()))?;
        if data.len() > MAX_ARCHIVE_BYTES {
            return Err(invalid(format!(
                "archive is {} bytes, limit is {}",
                data.len(),
                MAX_ARCHIVE_BYTES
            )));
        }
        let body = data
            .strip_prefix(ARCHIVE_MAGIC.as_slice())
            .ok_or_else(|| invalid("not a hotload archive".to_string()))?;

        // length prefixes are untrusted
        let config = bincode::config::standard().with_limit::<MAX_ARCHIVE_BYTES>();
        let (body, _): (ArchiveBody, _) = bincode::decode_from_slice(body, config)
            .map_err(|e| invalid(format!("corrupt archive: {}", e)))?;

        if body.format_version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported archive format version {}",
                body.format_version
            )));
        }

        let mut entries = FxHashMap::default();
        for entry in body.entries {
            // first entry for a name wins, as on the search path
            entries
                .entry(entry.name)
                .or_insert_with(|| Arc::from(entry.bytes));
        }

        tracing::debug!("Opened {} ({} artifact(s))", location.display(), entries.len());
        Ok(Self { location, entries })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn get(&self, name: &str) -> Option<Arc<[u8]>> {
        self.entries.get(name).cloned()
    }

    /// Names defined by this archive, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds archive files.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    entries: Vec<ArchiveEntry>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push(ArchiveEntry {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn add_artifact(&mut self, artifact: &CompiledArtifact) -> &mut Self {
        self.add(artifact.name(), artifact.bytes().to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the archive, magic included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = ArchiveBodyRef {
            format_version: FORMAT_VERSION,
            entries: &self.entries,
        };
        let encoded = bincode::encode_to_vec(&body, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let mut out = Vec::with_capacity(ARCHIVE_MAGIC.len() + encoded.len());
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.extend_from_slice(&encoded);
        Ok(out)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_bytes()?)?;
        tracing::debug!(
            "Wrote {} artifact(s) to {}",
            self.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Borrowing twin of [`ArchiveBody`]; encodes identically.
#[derive(Encode)]
struct ArchiveBodyRef<'a> {
    format_version: u32,
    entries: &'a [ArchiveEntry],
}

/// Ordered list of opened archives.
#[derive(Debug, Default)]
pub struct ArchiveSearchPath {
    archives: RwLock<Vec<Arc<Archive>>>,
}

impl ArchiveSearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the archive at `path` and append it to the search order.
    pub fn append(&self, path: impl AsRef<Path>) -> Result<Arc<Archive>> {
        let archive = Arc::new(Archive::open(path)?);
        self.push(Arc::clone(&archive));
        Ok(archive)
    }

    pub fn push(&self, archive: Arc<Archive>) {
        self.archives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(archive);
    }

    pub fn locations(&self) -> Vec<PathBuf> {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.location().to_path_buf())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.archives.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactSource for ArchiveSearchPath {
    fn describe(&self) -> String {
        format!("archive search path ({} archive(s))", self.len())
    }

    fn lookup(&self, name: &str) -> Option<Arc<[u8]>> {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|archive| archive.get(name))
    }
}
