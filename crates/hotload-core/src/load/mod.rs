//! Runtime loading of compiled artifacts.
//!
//! ```text
//! resolve(name)
//!     │
//!     ├── loaded cache hit ──────────────────────────► TypeHandle (same Arc)
//!     │
//!     └── per-name slot lock
//!             ├── ArtifactRegistry      (compiled / registered bytes)
//!             ├── ArchiveSearchPath     (appended archives, in order)
//!             └── pushed ArtifactSources
//!                     │
//!                     └── LoadedLibrary (memfd / temp file) ──► TypeHandle
//! ```

mod archive;
mod handle;
mod library;
mod namespace;
mod registry;

pub use archive::{ARCHIVE_MAGIC, Archive, ArchiveSearchPath, ArchiveWriter, MAX_ARCHIVE_BYTES};
pub use handle::{Instance, TypeHandle};
pub use namespace::{ArtifactSource, LoaderNamespace};
pub use registry::ArtifactRegistry;
