//! Compilation driver.
//!
//! Runs rustc once per unit. The unit (with its shim attached) is piped in
//! on stdin; the artifact is linked into a [`VirtualOutputSink`] and moved
//! into the registry from there.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::diagnostics::{Diagnostic, DiagnosticMapper};
use super::options::OptionSet;
use super::shim::Shim;
use super::sink::VirtualOutputSink;
use super::toolchain::ToolchainManager;
use super::types::{CompilationUnit, CompileReport};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::load::LoaderNamespace;

/// Edition used when the options do not choose one.
pub const DEFAULT_EDITION: &str = "2021";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Turns source text into registered artifacts.
pub struct CompilationDriver {
    config: EngineConfig,
    namespace: Arc<LoaderNamespace>,
    /// Detected on first use; a failure is remembered as its message.
    toolchain: OnceLock<std::result::Result<ToolchainManager, String>>,
}

impl CompilationDriver {
    pub fn new(config: EngineConfig, namespace: Arc<LoaderNamespace>) -> Self {
        Self {
            config,
            namespace,
            toolchain: OnceLock::new(),
        }
    }

    /// The detected toolchain. Detection runs at most once per driver.
    pub fn toolchain(&self) -> Result<&ToolchainManager> {
        self.toolchain
            .get_or_init(|| {
                ToolchainManager::new(self.config.rustc_path.as_deref()).map_err(|e| {
                    tracing::warn!("Toolchain detection failed: {}", e);
                    match e {
                        Error::ToolchainUnavailable(reason) => reason,
                        other => other.to_string(),
                    }
                })
            })
            .as_ref()
            .map_err(|reason| Error::ToolchainUnavailable(reason.clone()))
    }

    /// Compile `source` as the definition of `name`, with the configured
    /// default deadline.
    pub fn compile(&self, name: &str, source: &str, options: &OptionSet) -> Result<CompileReport> {
        self.compile_with_deadline(name, source, options, self.config.default_timeout)
    }

    /// Compile `source` as the definition of `name`.
    ///
    /// On success the artifact is in the registry. On any failure nothing is
    /// registered and the scratch area is gone.
    pub fn compile_with_deadline(
        &self,
        name: &str,
        source: &str,
        options: &OptionSet,
        deadline: Option<Duration>,
    ) -> Result<CompileReport> {
        let toolchain = self.toolchain()?;
        let unit = CompilationUnit::new(name, source);
        let shim = Shim::generate(&unit)?;
        let sink =
            VirtualOutputSink::new(self.config.scratch_root.as_deref(), Arc::clone(&self.namespace))?;

        let start = Instant::now();
        let artifact_path = sink.artifact_path(&unit);
        let log_path = sink.diagnostics_path(&unit);

        let mut cmd = self.command(toolchain.rustc_path(), &unit, &artifact_path, options);
        cmd.env("TMPDIR", sink.scratch_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&log_path)?));

        tracing::debug!("Compiling {}: {:?}", name, cmd);
        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // rustc exits early on bad flags; its diagnostics explain why.
            match stdin.write_all(shim.attach_to(source).as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    reap(&mut child);
                    return Err(e.into());
                }
                _ => {}
            }
        }

        let Some(status) = wait_with_deadline(&mut child, deadline)? else {
            let after = deadline.unwrap_or_default();
            tracing::warn!("Compilation of {} timed out after {:?}", name, after);
            return Err(Error::Timeout {
                name: name.to_string(),
                after,
            });
        };

        let stderr = String::from_utf8_lossy(&std::fs::read(&log_path)?).into_owned();
        let mut mapper = DiagnosticMapper::new(unit.virtual_path(), source);
        if let Some(region) = shim.inline_region(source) {
            mapper = mapper.with_inline_shim(region);
        }
        let mut diagnostics = mapper.parse_rustc_output(&stderr);
        let compile_time_ms = start.elapsed().as_millis() as u64;

        if !status.success() || !artifact_path.exists() {
            if !diagnostics.iter().any(Diagnostic::is_error) {
                let raw = stderr.trim();
                diagnostics.extend(if raw.is_empty() {
                    Diagnostic::simple(format!("rustc exited with {}", status))
                } else {
                    Diagnostic::simple_rendered(raw)
                });
            }
            tracing::debug!(
                "Compilation of {} failed with {} diagnostic(s)",
                name,
                diagnostics.len()
            );
            return Err(Error::Compile {
                name: name.to_string(),
                diagnostics,
            });
        }

        let artifact = sink.capture(&unit)?;
        tracing::info!(
            "Compiled {} ({} bytes) in {}ms",
            name,
            artifact.len(),
            compile_time_ms
        );

        Ok(CompileReport {
            artifact,
            diagnostics,
            compile_time_ms,
        })
    }

    fn command(
        &self,
        rustc: &Path,
        unit: &CompilationUnit,
        artifact_path: &Path,
        options: &OptionSet,
    ) -> Command {
        let mut cmd = Command::new(rustc);
        cmd.arg("-")
            .arg("--crate-name")
            .arg(unit.crate_name())
            .arg("--crate-type=cdylib")
            .arg("--error-format=json")
            .arg("-o")
            .arg(artifact_path);

        if !options.sets("--edition") {
            cmd.arg(format!("--edition={}", DEFAULT_EDITION));
        }

        for flag in options.iter() {
            cmd.arg(flag);
        }

        cmd
    }
}

/// Wait for `child`, killing it once `deadline` has passed.
/// Returns `None` on expiry.
fn wait_with_deadline(child: &mut Child, deadline: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(limit) = deadline else {
        return child.wait().map(Some);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let elapsed = started.elapsed();
        if elapsed >= limit {
            reap(child);
            return Ok(None);
        }

        std::thread::sleep(POLL_INTERVAL.min(limit - elapsed));
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill rustc: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::debug!("Failed to reap rustc: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompilerOptions;

    fn driver(config: EngineConfig) -> CompilationDriver {
        CompilationDriver::new(config, Arc::new(LoaderNamespace::default()))
    }

    #[test]
    fn test_command_defaults_edition() {
        let driver = driver(EngineConfig::default());
        let unit = CompilationUnit::new("p::A", "");
        let cmd = driver.command(Path::new("rustc"), &unit, Path::new("/tmp/x.so"), &OptionSet::default());
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[0], "-");
        assert!(args.contains(&"hotload_unit_p__a".to_string()));
        assert!(args.contains(&"--crate-type=cdylib".to_string()));
        assert!(args.contains(&"--edition=2021".to_string()));
    }

    #[test]
    fn test_command_keeps_option_edition_and_order() {
        let driver = driver(EngineConfig::default());
        let unit = CompilationUnit::new("A", "");
        let options = CompilerOptions::new().edition("2024").enable_debug().build();
        let cmd = driver.command(Path::new("rustc"), &unit, Path::new("/tmp/x.so"), &options);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert!(!args.iter().any(|a| a == "--edition=2021"));
        assert_eq!(&args[args.len() - 3..], ["--edition", "2024", "-g"]);
    }

    #[test]
    fn test_toolchain_failure_is_cached() {
        let driver = driver(EngineConfig::default().with_rustc("/nonexistent/rustc"));

        let first = driver.toolchain().unwrap_err();
        let second = driver.toolchain().unwrap_err();
        assert!(matches!(first, Error::ToolchainUnavailable(_)));
        assert_eq!(first.to_string(), second.to_string());

        let err = driver
            .compile("A", "pub struct A;", &OptionSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::ToolchainUnavailable(_)));
    }
}
