//! Compiler diagnostics and their mapping back to the submitted unit.

use serde::{Deserialize, Serialize};

use super::shim::InlineRegion;

/// File name used for diagnostics that point into generated shim code.
pub const SHIM_FILE: &str = "<hotload shim>";

/// One compiler message with source location information.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Message text
    pub message: String,

    /// Error code (e.g., "E0308")
    pub code: Option<String>,

    /// Severity level
    pub level: Severity,

    /// Primary source location
    pub location: Option<SourceLocation>,

    /// Additional spans (e.g., "help: consider...")
    pub spans: Vec<DiagnosticSpan>,

    /// Rendered message as printed by the compiler
    pub rendered: Option<String>,
}

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
    Help,
}

/// A location in source code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Virtual file name of the unit, or [`SHIM_FILE`]
    pub file: String,

    /// Line number (1-indexed)
    pub line: usize,

    /// Column number (1-indexed)
    pub column: usize,
}

/// A labelled span attached to a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSpan {
    pub location: SourceLocation,
    pub end_location: Option<SourceLocation>,
    pub label: Option<String>,
    pub is_primary: bool,
}

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
struct RustcDiagnostic {
    message: String,
    code: Option<RustcCode>,
    level: String,
    spans: Vec<RustcSpan>,
    rendered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    line_start: usize,
    line_end: usize,
    column_start: usize,
    column_end: usize,
    is_primary: bool,
    label: Option<String>,
}

/// Maps rustc diagnostics onto the unit the caller submitted.
///
/// The driver compiles the user's source with the generated shim attached.
/// An appended shim owns every line past `source_lines`; a spliced one owns
/// a column range of a single line.
pub struct DiagnosticMapper {
    file: String,
    source_lines: usize,
    inline_shim: Option<InlineRegion>,
}

impl DiagnosticMapper {
    /// Create a mapper for a unit with the given virtual file name.
    pub fn new(file: impl Into<String>, source: &str) -> Self {
        Self {
            file: file.into(),
            source_lines: source.lines().count(),
            inline_shim: None,
        }
    }

    /// Account for a shim spliced into the source at `region`.
    pub fn with_inline_shim(mut self, region: InlineRegion) -> Self {
        self.inline_shim = Some(region);
        self
    }

    /// Parse rustc JSON output (one diagnostic per line).
    pub fn parse_rustc_output(&self, json_output: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for line in json_output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RustcDiagnostic>(line) {
                Ok(diagnostic) => {
                    if let Some(mapped) = self.map_diagnostic(&diagnostic) {
                        diagnostics.push(mapped);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to parse rustc JSON: {} (line: {})",
                        e,
                        line.chars().take(100).collect::<String>()
                    );
                }
            }
        }

        diagnostics
    }

    fn map_diagnostic(&self, diagnostic: &RustcDiagnostic) -> Option<Diagnostic> {
        let level = match diagnostic.level.as_str() {
            "error" | "error: internal compiler error" => Severity::Error,
            "warning" => Severity::Warning,
            "note" | "failure-note" => Severity::Note,
            "help" => Severity::Help,
            _ => return None,
        };

        let location = diagnostic
            .spans
            .iter()
            .find(|s| s.is_primary)
            .map(|span| self.map_location(span.line_start, span.column_start));

        let spans = diagnostic
            .spans
            .iter()
            .map(|span| DiagnosticSpan {
                location: self.map_location(span.line_start, span.column_start),
                end_location: (span.line_start != span.line_end)
                    .then(|| self.map_location(span.line_end, span.column_end)),
                label: span.label.clone(),
                is_primary: span.is_primary,
            })
            .collect();

        Some(Diagnostic {
            message: diagnostic.message.clone(),
            code: diagnostic.code.as_ref().map(|c| c.code.clone()),
            level,
            location,
            spans,
            rendered: diagnostic.rendered.clone(),
        })
    }

    fn map_location(&self, line: usize, column: usize) -> SourceLocation {
        if let Some(region) = self.inline_shim.filter(|r| r.line == line && column >= r.column) {
            return if column < region.column + region.width {
                SourceLocation {
                    file: SHIM_FILE.to_string(),
                    line: 1,
                    column: column - region.column + 1,
                }
            } else {
                SourceLocation {
                    file: self.file.clone(),
                    line,
                    column: column - region.width,
                }
            };
        }

        if line <= self.source_lines {
            SourceLocation {
                file: self.file.clone(),
                line,
                column,
            }
        } else {
            SourceLocation {
                file: SHIM_FILE.to_string(),
                line: line - self.source_lines,
                column,
            }
        }
    }
}

impl Diagnostic {
    /// Create a single error with just a message.
    pub fn simple(message: impl Into<String>) -> Vec<Self> {
        vec![Self {
            message: message.into(),
            code: None,
            level: Severity::Error,
            location: None,
            spans: Vec::new(),
            rendered: None,
        }]
    }

    /// Create a single error from raw compiler output.
    pub fn simple_rendered(message: impl Into<String>) -> Vec<Self> {
        let msg = message.into();
        vec![Self {
            message: msg.clone(),
            code: None,
            level: Severity::Error,
            location: None,
            spans: Vec::new(),
            rendered: Some(msg),
        }]
    }

    pub fn is_error(&self) -> bool {
        self.level == Severity::Error
    }

    /// Format the diagnostic for terminal display.
    pub fn format_terminal(&self) -> String {
        let mut output = String::new();

        let level_str = match self.level {
            Severity::Error => "\x1b[1;31merror\x1b[0m",
            Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
            Severity::Note => "\x1b[1;36mnote\x1b[0m",
            Severity::Help => "\x1b[1;32mhelp\x1b[0m",
        };

        if let Some(code) = &self.code {
            output.push_str(&format!("{level_str}[{code}]: {}\n", self.message));
        } else {
            output.push_str(&format!("{level_str}: {}\n", self.message));
        }

        if let Some(loc) = &self.location {
            output.push_str(&format!(
                "  \x1b[1;34m-->\x1b[0m {}:{}:{}\n",
                loc.file, loc.line, loc.column
            ));
        }

        output
    }
}
