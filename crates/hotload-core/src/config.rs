//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the scratch root.
pub const SCRATCH_DIR_ENV: &str = "HOTLOAD_SCRATCH_DIR";

/// Environment variable setting the default compile deadline, in seconds.
pub const COMPILE_TIMEOUT_ENV: &str = "HOTLOAD_COMPILE_TIMEOUT_SECS";

/// Environment variable selecting the redefinition policy (`allow`/`reject`).
pub const REDEFINITION_ENV: &str = "HOTLOAD_REDEFINITION";

/// What happens when bytes are registered for a name that is already loaded.
///
/// A loaded type keeps the definition it was materialized from either way;
/// the policy only decides whether the new bytes are accepted for later
/// namespaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedefinitionPolicy {
    /// Accept the bytes and log a warning.
    #[default]
    Allow,
    /// Refuse with [`Error::RedefinitionHazard`](crate::Error::RedefinitionHazard).
    Reject,
}

impl std::str::FromStr for RedefinitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown redefinition policy: {}", other)),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Compiler binary; detected when unset
    pub rustc_path: Option<PathBuf>,

    /// Parent directory for per-compile scratch areas (system temp dir by default)
    pub scratch_root: Option<PathBuf>,

    /// Deadline applied by `compile` when none is given
    pub default_timeout: Option<Duration>,

    /// Behaviour on redefinition of a loaded name
    pub redefinition_policy: RedefinitionPolicy,
}

impl EngineConfig {
    /// Defaults overridden by `HOTLOAD_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning. `HOTLOAD_RUSTC` is read
    /// by toolchain detection itself.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = std::env::var_os(SCRATCH_DIR_ENV).filter(|d| !d.is_empty()) {
            config.scratch_root = Some(PathBuf::from(dir));
        }

        if let Ok(secs) = std::env::var(COMPILE_TIMEOUT_ENV) {
            match secs.trim().parse::<u64>() {
                Ok(secs) => config.default_timeout = Some(Duration::from_secs(secs)),
                Err(e) => tracing::warn!("Ignoring {}={:?}: {}", COMPILE_TIMEOUT_ENV, secs, e),
            }
        }

        if let Ok(policy) = std::env::var(REDEFINITION_ENV) {
            match policy.parse() {
                Ok(policy) => config.redefinition_policy = policy,
                Err(e) => tracing::warn!("Ignoring {}: {}", REDEFINITION_ENV, e),
            }
        }

        config
    }

    pub fn with_rustc(mut self, path: impl Into<PathBuf>) -> Self {
        self.rustc_path = Some(path.into());
        self
    }

    pub fn with_scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_redefinition_policy(mut self, policy: RedefinitionPolicy) -> Self {
        self.redefinition_policy = policy;
        self
    }
}
