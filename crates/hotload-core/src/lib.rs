//! Core engine for compiling Rust source at runtime and loading the result.
//!
//! This crate provides:
//! - Name resolution for source units
//! - Compilation through the host `rustc`, with output captured in memory
//! - A registry and loader namespace with archive search paths
//! - Type handles for instantiating and invoking loaded types
//!
//! ```no_run
//! use hotload_core::Engine;
//!
//! let engine = Engine::default();
//! let greeter = engine.compile_and_load(
//!     r#"
//!     pub mod p {
//!         #[derive(Default)]
//!         pub struct Greeter;
//!         impl Greeter {
//!             pub fn greet(&self) -> String { "hello".to_string() }
//!         }
//!     }
//!     "#,
//!     None,
//! )?;
//!
//! let mut instance = greeter.instantiate()?;
//! assert_eq!(instance.invoke("greet", &[])?, "hello");
//! # Ok::<(), hotload_core::Error>(())
//! ```

pub mod abi;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod load;

pub use compile::{CompileReport, CompiledArtifact, CompilerOptions, Diagnostic, OptionSet, resolve_name};
pub use config::{EngineConfig, RedefinitionPolicy};
pub use engine::Engine;
pub use error::{Error, Result};
pub use load::{Instance, LoaderNamespace, TypeHandle};
