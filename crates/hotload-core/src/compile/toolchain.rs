//! Toolchain discovery.
//!
//! Locates a `rustc` able to produce artifacts for this process.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Environment variable naming the compiler binary to use.
pub const RUSTC_ENV: &str = "HOTLOAD_RUSTC";

/// A detected Rust compiler.
#[derive(Debug, Clone)]
pub struct ToolchainManager {
    /// Path to rustc
    rustc_path: PathBuf,

    /// Toolchain version string
    version: String,
}

impl ToolchainManager {
    /// Detect the toolchain.
    ///
    /// Lookup order: `rustc_override`, then `$HOTLOAD_RUSTC`, then `rustc`
    /// on `PATH`. The candidate must answer `--version`.
    pub fn new(rustc_override: Option<&Path>) -> Result<Self> {
        let rustc_path = match rustc_override {
            Some(path) => path.to_path_buf(),
            None => Self::find_rustc()?,
        };
        let version = Self::get_rustc_version(&rustc_path)?;

        tracing::debug!("Using {} ({})", rustc_path.display(), version);

        Ok(Self {
            rustc_path,
            version,
        })
    }

    /// Get the rustc path.
    pub fn rustc_path(&self) -> &Path {
        &self.rustc_path
    }

    /// Get the toolchain version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Host target triple, from `rustc -vV`.
    pub fn host_triple(&self) -> Result<String> {
        let output = Command::new(&self.rustc_path)
            .arg("-vV")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ToolchainUnavailable(format!("failed to run rustc: {}", e)))?;

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(|line| line.strip_prefix("host: "))
            .map(|host| host.trim().to_string())
            .ok_or_else(|| Error::ToolchainUnavailable("rustc did not report a host triple".into()))
    }

    /// Find rustc through the environment or in PATH.
    fn find_rustc() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(RUSTC_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        which::which("rustc")
            .map_err(|_| Error::ToolchainUnavailable("rustc not found in PATH".to_string()))
    }

    /// Get rustc version string.
    fn get_rustc_version(rustc: &Path) -> Result<String> {
        let output = Command::new(rustc)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::ToolchainUnavailable(format!("failed to run {}: {}", rustc.display(), e))
            })?;

        if !output.status.success() {
            return Err(Error::ToolchainUnavailable(format!(
                "{} --version exited with {}",
                rustc.display(),
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return Err(Error::ToolchainUnavailable(format!(
                "{} reported no version",
                rustc.display()
            )));
        }

        Ok(version)
    }
}
