//! Invoke command implementation.
//!
//! Loads a type from archives only; nothing is compiled.

use hotload_core::{Engine, TypeHandle};

/// Call `operation`, instantiating the type when the operation needs a receiver.
pub fn call_operation(handle: &TypeHandle, operation: &str, args: &[String]) -> hotload_core::Result<String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match handle.operation(operation) {
        Some(op) if !op.needs_instance() => handle.invoke_static(operation, &args),
        _ => handle.instantiate()?.invoke(operation, &args),
    }
}

/// Execute the invoke command.
pub fn execute(
    archives: &[String],
    type_name: &str,
    operation: &str,
    args: &[String],
) -> anyhow::Result<()> {
    let engine = Engine::from_env();
    for archive in archives {
        engine.append_search_path(archive)?;
    }

    let handle = engine.load(type_name)?;
    println!("{}", call_operation(&handle, operation, args)?);
    Ok(())
}
