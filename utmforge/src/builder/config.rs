//! Build configuration.
//!
//! Loaded from JSON. Validation is separate from parsing so every problem is
//! reported at once instead of one per run.

use crate::driver::{ControllerInterface, DriverConfig};
use crate::fetch::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use utmforge_shared::constants::CD_FILES_INTERFACE;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

fn default_interface() -> String {
    CD_FILES_INTERFACE.to_string()
}

/// How guest tools reach the VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestAdditionsMode {
    /// Neither downloaded nor attached.
    #[serde(alias = "disabled")]
    Disable,
    /// Downloaded for a later upload step; not attached.
    Upload,
    /// Downloaded and attached as a removable drive.
    #[default]
    Attach,
}

impl GuestAdditionsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestAdditionsMode::Disable => "disable",
            GuestAdditionsMode::Upload => "upload",
            GuestAdditionsMode::Attach => "attach",
        }
    }
}

impl fmt::Display for GuestAdditionsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra QEMU arguments persisted in the VM definition.
///
/// Each inner list is joined with spaces into one argument, e.g.
/// `[["-accel", "hvf"], ["-cpu", "host"]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QemuConfig {
    #[serde(default)]
    pub qemuargs: Vec<Vec<String>>,
}

impl QemuConfig {
    pub fn prepare(&self) -> Vec<UtmforgeError> {
        let mut errs = Vec::new();
        for (i, args) in self.qemuargs.iter().enumerate() {
            if args.is_empty() {
                errs.push(UtmforgeError::Config(format!(
                    "qemuargs[{}]: empty argument list",
                    i
                )));
                continue;
            }
            if args.join(" ").trim().is_empty() {
                errs.push(UtmforgeError::Config(format!(
                    "qemuargs[{}]: argument resolves to empty string",
                    i
                )));
            }
        }
        errs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestAdditionsConfig {
    #[serde(rename = "guest_additions_mode", default)]
    pub mode: GuestAdditionsMode,
    /// URL template; `{{ .Version }}` expands to the guest tools version.
    #[serde(rename = "guest_additions_url", default)]
    pub url: String,
    #[serde(rename = "guest_additions_sha256", default)]
    pub sha256: String,
    /// Download destination. Defaults to the fetch cache.
    #[serde(rename = "guest_additions_path", default)]
    pub path: Option<PathBuf>,
    #[serde(rename = "guest_additions_interface", default = "default_interface")]
    pub interface: String,
}

impl Default for GuestAdditionsConfig {
    fn default() -> Self {
        Self {
            mode: GuestAdditionsMode::default(),
            url: String::new(),
            sha256: String::new(),
            path: None,
            interface: default_interface(),
        }
    }
}

impl GuestAdditionsConfig {
    pub fn prepare(&self) -> Vec<UtmforgeError> {
        let mut errs = Vec::new();
        if !self.sha256.is_empty()
            && let Err(e) = Checksum::sha256(&self.sha256)
        {
            errs.push(e);
        }
        if self.mode == GuestAdditionsMode::Attach
            && let Err(e) = self.interface.parse::<ControllerInterface>()
        {
            errs.push(e.context("guest_additions_interface"));
        }
        errs
    }
}

/// Everything needed to run a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(flatten)]
    pub qemu: QemuConfig,
    #[serde(flatten)]
    pub guest_additions: GuestAdditionsConfig,
    /// Attach the `iso_path` ISO before the other drives.
    #[serde(default)]
    pub attach_boot_iso: bool,
    #[serde(default = "default_interface")]
    pub iso_interface: String,
    pub driver: DriverConfig,
    /// Download cache. Defaults to the per-user cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl BuildConfig {
    pub fn new(driver: DriverConfig) -> Self {
        Self {
            qemu: QemuConfig::default(),
            guest_additions: GuestAdditionsConfig::default(),
            attach_boot_iso: false,
            iso_interface: default_interface(),
            driver,
            cache_dir: None,
        }
    }

    /// Load a JSON configuration file. Does not validate.
    pub fn from_file(path: impl AsRef<Path>) -> UtmforgeResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            UtmforgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            UtmforgeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Collect every validation problem.
    pub fn prepare(&self) -> Vec<UtmforgeError> {
        let mut errs = self.qemu.prepare();
        errs.extend(self.guest_additions.prepare());
        if self.attach_boot_iso
            && let Err(e) = self.iso_interface.parse::<ControllerInterface>()
        {
            errs.push(e.context("iso_interface"));
        }
        errs
    }

    /// [`prepare`](Self::prepare) folded into one error.
    pub fn validate(&self) -> UtmforgeResult<()> {
        let errs = self.prepare();
        if errs.is_empty() {
            return Ok(());
        }

        let problems: Vec<String> = errs
            .into_iter()
            .map(|e| match e {
                UtmforgeError::Config(msg) => msg,
                other => other.to_string(),
            })
            .collect();
        Err(UtmforgeError::Config(problems.join("; ")))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(crate::fetch::CachingFetcher::default_cache_dir)
    }
}
