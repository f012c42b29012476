//! Run command implementation.
//!
//! Compiles a source file in-process, loads the declared type, lists its
//! operations and optionally calls one.

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use hotload_core::{CompilerOptions, Engine, OptionSet};

use crate::colors;
use crate::invoke::call_operation;
use crate::output::{print_diagnostics, print_operations};

/// Compiler flags shared by commands that compile.
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Rust edition to compile with
    #[arg(long)]
    edition: Option<String>,

    /// Embed debug information
    #[arg(long, conflicts_with = "no_debug")]
    debug: bool,

    /// Strip debug information
    #[arg(long)]
    no_debug: bool,

    /// Codegen option passed to rustc as -C FLAG (repeatable)
    #[arg(short = 'C', value_name = "FLAG")]
    codegen: Vec<String>,
}

impl BuildArgs {
    pub fn options(&self) -> OptionSet {
        let mut options = CompilerOptions::new();
        if let Some(edition) = &self.edition {
            options = options.edition(edition.as_str());
        }
        if self.debug {
            options = options.enable_debug();
        }
        if self.no_debug {
            options = options.disable_debug();
        }
        for flag in &self.codegen {
            options = options.add_option(format!("-C{}", flag));
        }
        options.build()
    }
}

/// Execute the run command.
pub fn execute(
    file: &str,
    build: &BuildArgs,
    call: Option<&str>,
    args: &[String],
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let source =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file))?;

    let engine = Engine::from_env();
    let name = engine.resolve_name(&source)?;
    let deadline = timeout
        .map(Duration::from_secs)
        .or(engine.config().default_timeout);

    eprintln!("{}Compiling{} {}", colors::GREEN, colors::RESET, name);
    let report = engine.compile_with_deadline(&name, &source, &build.options(), deadline)?;
    print_diagnostics(&report.diagnostics);

    let handle = engine.load(&name)?;
    eprintln!(
        "{}Loaded{} {} in {:.2}s (compile: {}ms)",
        colors::GREEN,
        colors::RESET,
        name,
        start.elapsed().as_secs_f64(),
        report.compile_time_ms
    );

    match call {
        Some(operation) => println!("{}", call_operation(&handle, operation, args)?),
        None => print_operations(handle.name(), handle.operations()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_to_options() {
        let build = BuildArgs {
            edition: Some("2018".into()),
            debug: true,
            no_debug: false,
            codegen: vec!["opt-level=2".into()],
        };
        assert_eq!(
            build.options().as_slice(),
            ["--edition", "2018", "-g", "-Copt-level=2"]
        );
        assert!(BuildArgs::default().options().is_empty());
    }
}
