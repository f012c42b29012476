//! hotload CLI - compile Rust source at runtime and call into it.

mod colors;
mod inspect;
mod invoke;
mod output;
mod pack;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hotload")]
#[command(about = "Compile Rust source at runtime and call into the loaded type")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and load a source file, then optionally call an operation
    Run {
        /// Path to the source (.rs file)
        file: String,

        /// Operation to call after loading
        #[arg(long)]
        call: Option<String>,

        /// Argument for the operation (repeatable)
        #[arg(long = "arg", value_name = "ARG")]
        args: Vec<String>,

        #[command(flatten)]
        build: run::BuildArgs,

        /// Give up compiling after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Print the declared type and its operations without compiling
    Inspect {
        /// Path to the source (.rs file)
        file: String,
    },

    /// Compile source files into an archive
    Pack {
        /// Archive to write
        archive: String,

        /// Source files to compile
        #[arg(required = true)]
        files: Vec<String>,

        #[command(flatten)]
        build: run::BuildArgs,
    },

    /// Call an operation on a type loaded from archives
    Invoke {
        /// Archive to search (repeatable, searched in order)
        #[arg(long = "archive", value_name = "PATH", required = true)]
        archives: Vec<String>,

        /// Fully-qualified type name, e.g. p::Greeter
        type_name: String,

        /// Operation to call
        operation: String,

        /// Arguments for the operation
        args: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Compile errors carry diagnostics worth showing in full
    let report_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<hotload_core::Error>() {
            output::print_diagnostics(core_err.diagnostics());
        }
        err
    };

    match cli.command {
        Commands::Run {
            file,
            call,
            args,
            build,
            timeout,
        } => run::execute(&file, &build, call.as_deref(), &args, timeout).map_err(report_error)?,

        Commands::Inspect { file } => inspect::execute(&file).map_err(report_error)?,

        Commands::Pack {
            archive,
            files,
            build,
        } => pack::execute(&archive, &files, &build).map_err(report_error)?,

        Commands::Invoke {
            archives,
            type_name,
            operation,
            args,
        } => invoke::execute(&archives, &type_name, &operation, &args).map_err(report_error)?,
    }

    Ok(())
}
