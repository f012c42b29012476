//! Inspect command implementation.
//!
//! Shows what the engine would expose for a source file, without invoking
//! the compiler.

use anyhow::Context;
use hotload_core::compile::{CompilationUnit, Shim};

use crate::colors;
use crate::output::print_operations;

/// Execute the inspect command.
pub fn execute(file: &str) -> anyhow::Result<()> {
    let source =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file))?;

    let unit = CompilationUnit::from_source(source)?;
    let shim = Shim::generate(&unit)?;

    print_operations(unit.name(), &shim.manifest().operations);
    if !shim.is_instantiable() {
        println!(
            "  {}generic or unparsable: operations are not exposed{}",
            colors::YELLOW,
            colors::RESET
        );
    }
    Ok(())
}
