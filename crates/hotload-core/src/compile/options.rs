//! Compiler option builder.
//!
//! Flags are accumulated verbatim, in call order. Nothing is validated here;
//! rustc reports unknown or conflicting flags as diagnostics.

use std::sync::Arc;

/// Fluent accumulator of rustc flags.
///
/// ```
/// use hotload_core::compile::CompilerOptions;
///
/// let options = CompilerOptions::new()
///     .edition("2021")
///     .enable_debug()
///     .add_option("-Copt-level=1")
///     .build();
///
/// assert_eq!(options.as_slice(), ["--edition", "2021", "-g", "-Copt-level=1"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    tokens: Vec<String>,
}

impl CompilerOptions {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Language version the source is written against (`--edition`).
    pub fn edition(self, edition: impl Into<String>) -> Self {
        self.add_options(["--edition".to_string(), edition.into()])
    }

    /// Target the artifact is produced for (`--target`).
    ///
    /// Artifacts built for a foreign target cannot be loaded into this process.
    pub fn target(self, triple: impl Into<String>) -> Self {
        self.add_options(["--target".to_string(), triple.into()])
    }

    /// Embed full debug information.
    pub fn enable_debug(self) -> Self {
        self.add_option("-g")
    }

    /// Strip debug information.
    pub fn disable_debug(self) -> Self {
        self.add_option("-Cdebuginfo=0")
    }

    /// Optimization level (0-3, `s`, `z` are passed through as given).
    pub fn opt_level(self, level: impl std::fmt::Display) -> Self {
        self.add_option(format!("-Copt-level={level}"))
    }

    /// Append one free-form flag token.
    pub fn add_option(mut self, option: impl Into<String>) -> Self {
        self.tokens.push(option.into());
        self
    }

    /// Append several free-form flag tokens.
    pub fn add_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(options.into_iter().map(Into::into));
        self
    }

    /// Snapshot the accumulated flags. May be called any number of times.
    pub fn build(&self) -> OptionSet {
        OptionSet {
            tokens: self.tokens.clone().into(),
        }
    }
}

/// Immutable, ordered sequence of flag tokens handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSet {
    tokens: Arc<[String]>,
}

impl Default for OptionSet {
    fn default() -> Self {
        CompilerOptions::new().build()
    }
}

impl OptionSet {
    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether any token sets `flag`, either as `flag`, `flag=value` or
    /// `flag` followed by a separate value token.
    pub fn sets(&self, flag: &str) -> bool {
        self.iter().any(|token| {
            token == flag
                || token
                    .strip_prefix(flag)
                    .is_some_and(|rest| rest.starts_with('='))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_compose_in_order() {
        let options = CompilerOptions::new()
            .edition("2018")
            .target("x86_64-unknown-linux-gnu")
            .disable_debug()
            .opt_level(2)
            .add_options(["-A", "warnings"])
            .build();

        assert_eq!(
            options.as_slice(),
            [
                "--edition",
                "2018",
                "--target",
                "x86_64-unknown-linux-gnu",
                "-Cdebuginfo=0",
                "-Copt-level=2",
                "-A",
                "warnings",
            ]
        );
    }

    #[test]
    fn test_build_produces_independent_snapshots() {
        let builder = CompilerOptions::new().enable_debug();
        let first = builder.build();
        let second = builder.add_option("--cfg=extra").build();

        assert_eq!(first.as_slice(), ["-g"]);
        assert_eq!(second.as_slice(), ["-g", "--cfg=extra"]);
    }

    #[test]
    fn test_conflicting_flags_pass_through() {
        let options = CompilerOptions::new()
            .enable_debug()
            .disable_debug()
            .add_option("--not-a-real-flag")
            .build();
        assert_eq!(options.as_slice().len(), 3);
    }

    #[test]
    fn test_sets_flag() {
        let separate = CompilerOptions::new().edition("2021").build();
        let joined = CompilerOptions::new().add_option("--edition=2024").build();
        let other = CompilerOptions::new().add_option("--editionx").build();

        assert!(separate.sets("--edition"));
        assert!(joined.sets("--edition"));
        assert!(!other.sets("--edition"));
        assert!(OptionSet::default().is_empty());
    }
}
