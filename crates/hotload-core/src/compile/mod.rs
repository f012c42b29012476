//! Compilation pipeline.
//!
//! This module provides:
//! - Name resolution (source text → fully-qualified type name)
//! - Compiler options (ordered flag tokens)
//! - Shim generation (the artifact ABI for the declared type)
//! - The driver (one rustc invocation per unit, with an optional deadline)
//! - The virtual output sink (scratch area + in-memory artifact capture)
//! - Diagnostic mapping (rustc JSON → unit source locations)
//!
//! # Architecture
//!
//! ```text
//! source ──► resolve_name ──► CompilationUnit ──► Shim::generate
//!                                   │                  │
//!                                   └──── rustc - ◄────┘  (stdin: source with shim)
//!                                            │
//!                    stderr ──► DiagnosticMapper     cdylib ──► VirtualOutputSink
//!                                                                  │
//!                                                   ArtifactWriter::close ──► registry
//! ```

mod diagnostics;
mod driver;
mod name_resolver;
mod options;
mod shim;
mod sink;
mod toolchain;
mod types;

pub use diagnostics::{Diagnostic, DiagnosticMapper, DiagnosticSpan, SHIM_FILE, Severity, SourceLocation};
pub use driver::{CompilationDriver, DEFAULT_EDITION};
pub use name_resolver::resolve_name;
pub use options::{CompilerOptions, OptionSet};
pub use shim::{InlineRegion, Shim};
pub use sink::{ArtifactWriter, OutputKind, VirtualOutputSink};
pub use toolchain::{RUSTC_ENV, ToolchainManager};
pub use types::{CompilationUnit, CompileReport, CompiledArtifact, dylib_extension, dylib_prefix};
