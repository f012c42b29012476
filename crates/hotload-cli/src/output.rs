//! Terminal output helpers.

use hotload_core::Diagnostic;
use hotload_core::abi::Operation;

use crate::colors;

/// Print compiler diagnostics to stderr.
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match &diagnostic.rendered {
            // rustc's own rendering already has the source snippet
            Some(rendered) if diagnostic.location.is_some() => eprint!("{}", rendered),
            _ => eprint!("{}", diagnostic.format_terminal()),
        }
    }
}

/// Print a type and its operations.
pub fn print_operations(type_name: &str, operations: &[Operation]) {
    println!("{}{}{}", colors::BOLD, type_name, colors::RESET);
    if operations.is_empty() {
        println!("  {}(no invocable operations){}", colors::DIM, colors::RESET);
        return;
    }
    for op in operations {
        let marker = if op.needs_instance() { " " } else { "*" };
        println!("  {}{}{} {}", colors::CYAN, marker, colors::RESET, op.signature());
    }
}
