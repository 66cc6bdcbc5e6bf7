//! Driver backed by UTM's AppleScript automation.

use super::Driver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

fn default_osascript() -> PathBuf {
    PathBuf::from("/usr/bin/osascript")
}

fn default_defaults() -> PathBuf {
    PathBuf::from("/usr/bin/defaults")
}

fn default_utm_app() -> PathBuf {
    PathBuf::from("/Applications/UTM.app")
}

fn default_command_timeout_secs() -> u64 {
    300
}

/// Host-side settings for [`OsascriptDriver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Directory holding the `*.applescript` automation scripts.
    pub scripts_dir: PathBuf,
    #[serde(default = "default_osascript")]
    pub osascript: PathBuf,
    /// `defaults` binary used to read the app bundle's version.
    #[serde(default = "default_defaults")]
    pub defaults: PathBuf,
    #[serde(default = "default_utm_app")]
    pub utm_app: PathBuf,
    /// Guest tools ISO shipped with the host installation, if any.
    #[serde(default)]
    pub guest_tools_iso: Option<PathBuf>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl DriverConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            osascript: default_osascript(),
            defaults: default_defaults(),
            utm_app: default_utm_app(),
            guest_tools_iso: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Runs `osascript <scripts_dir>/<script> args...` for every command.
///
/// Child processes are killed when the future is dropped, so a cancelled
/// build does not leave automation scripts running.
pub struct OsascriptDriver {
    config: DriverConfig,
}

impl OsascriptDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    async fn run(&self, program: &Path, args: &[String]) -> UtmforgeResult<String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %program.display(), args = ?args, "Running driver command");

        let output = tokio::time::timeout(self.timeout(), cmd.output())
            .await
            .map_err(|_| {
                UtmforgeError::Driver(format!(
                    "{} timed out after {}s",
                    program.display(),
                    self.config.command_timeout_secs
                ))
            })?
            .map_err(|e| {
                UtmforgeError::Driver(format!("failed to run {}: {}", program.display(), e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(UtmforgeError::Driver(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                if stderr.is_empty() { &stdout } else { &stderr }
            )));
        }

        tracing::trace!(output = %stdout, "Driver command finished");
        Ok(stdout)
    }
}

#[async_trait::async_trait]
impl Driver for OsascriptDriver {
    async fn execute_script(&self, args: &[String]) -> UtmforgeResult<String> {
        let (script, rest) = args
            .split_first()
            .ok_or_else(|| UtmforgeError::Internal("execute_script called without a script".into()))?;

        let mut full = Vec::with_capacity(args.len());
        full.push(self.config.scripts_dir.join(script).display().to_string());
        full.extend(rest.iter().cloned());

        self.run(&self.config.osascript, &full).await
    }

    async fn version(&self) -> UtmforgeResult<String> {
        let info = self.config.utm_app.join("Contents").join("Info");
        let version = self
            .run(
                &self.config.defaults,
                &[
                    "read".to_string(),
                    info.display().to_string(),
                    "CFBundleShortVersionString".to_string(),
                ],
            )
            .await?;

        if version.is_empty() {
            return Err(UtmforgeError::Driver(format!(
                "no version reported by {}",
                self.config.utm_app.display()
            )));
        }
        Ok(version)
    }

    async fn guest_tools_iso_path(&self) -> UtmforgeResult<String> {
        match &self.config.guest_tools_iso {
            Some(path) if path.is_file() => Ok(path.display().to_string()),
            Some(path) => Err(UtmforgeError::Storage(format!(
                "guest tools ISO not found at {}",
                path.display()
            ))),
            None => Err(UtmforgeError::Unsupported(
                "UTM does not bundle a guest tools ISO".into(),
            )),
        }
    }
}
