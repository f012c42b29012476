//! Pack command implementation.
//!
//! Compiles each source file and writes every artifact into one archive.

use std::time::Instant;

use anyhow::Context;
use hotload_core::Engine;

use crate::colors;
use crate::output::print_diagnostics;
use crate::run::BuildArgs;

/// Execute the pack command.
pub fn execute(archive: &str, files: &[String], build: &BuildArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let engine = Engine::from_env();
    let options = build.options();

    for file in files {
        let source =
            std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file))?;
        let name = engine.resolve_name(&source)?;

        eprintln!("{}Compiling{} {} ({})", colors::GREEN, colors::RESET, name, file);
        let report = engine
            .compile(&name, &source, &options)
            .with_context(|| format!("failed to compile {}", file))?;
        print_diagnostics(&report.diagnostics);
    }

    let count = engine.export_archive(archive)?;
    println!(
        "{}Packed{} {} artifact(s) into {} in {:.2}s",
        colors::GREEN,
        colors::RESET,
        count,
        archive,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
