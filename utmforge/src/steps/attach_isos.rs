//! Step: attach boot, cd files and guest tools ISOs.
//!
//! Guests assign drive letters in attachment order, so ISOs are always
//! attached as:
//!   1. boot_iso        - installation media (typically D: on Windows)
//!   2. cd_files        - files prepared by an earlier step (typically E:)
//!   3. guest_additions - UTM guest tools (typically F:)
//!
//! Every successful attachment records the command that removes it. The step
//! replays those commands on cleanup unless a later step already detached the
//! drives and set the `detached_isos` marker. Entries a later step removed
//! from the published table are skipped.

use crate::builder::GuestAdditionsMode;
use crate::driver::ControllerInterface;
use crate::pipeline::{BuildStep, StateBag, StepAction, halt, step_start};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::{CD_FILES_INTERFACE, scripts, state_keys};
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

const NAME: &str = "attach_isos";

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("UUID pattern is valid")
});

/// Kind of ISO, ordered by attachment priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsoCategory {
    BootIso,
    CdFiles,
    GuestAdditions,
}

impl IsoCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsoCategory::BootIso => "boot_iso",
            IsoCategory::CdFiles => "cd_files",
            IsoCategory::GuestAdditions => "guest_additions",
        }
    }
}

impl fmt::Display for IsoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ISO waiting to be attached, with its canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskToMount {
    pub category: IsoCategory,
    pub path: PathBuf,
}

impl DiskToMount {
    /// Make `path` absolute and resolve symlinks.
    async fn resolve(category: IsoCategory, path: &Path) -> UtmforgeResult<Self> {
        let resolved = canonical_path(path).await.map_err(|e| {
            UtmforgeError::Storage(format!(
                "error resolving {} path {}: {}",
                category,
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            category,
            path: resolved,
        })
    }
}

async fn canonical_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    tokio::fs::canonicalize(absolute).await
}

/// Detach command per category.
pub type UnmountCommands = BTreeMap<IsoCategory, Vec<String>>;

pub struct AttachIsosStep {
    attach_boot_iso: bool,
    iso_interface: String,
    guest_additions_mode: GuestAdditionsMode,
    guest_additions_interface: String,
    unmount_commands: UnmountCommands,
}

impl AttachIsosStep {
    /// Step that attaches nothing until configured.
    pub fn new() -> Self {
        Self {
            attach_boot_iso: false,
            iso_interface: CD_FILES_INTERFACE.to_string(),
            guest_additions_mode: GuestAdditionsMode::Disable,
            guest_additions_interface: CD_FILES_INTERFACE.to_string(),
            unmount_commands: UnmountCommands::new(),
        }
    }

    /// Attach the `iso_path` ISO through `interface`.
    pub fn with_boot_iso(mut self, interface: impl Into<String>) -> Self {
        self.attach_boot_iso = true;
        self.iso_interface = interface.into();
        self
    }

    /// Attach the `guest_additions_path` ISO when `mode` is `Attach`.
    pub fn with_guest_additions(
        mut self,
        mode: GuestAdditionsMode,
        interface: impl Into<String>,
    ) -> Self {
        self.guest_additions_mode = mode;
        self.guest_additions_interface = interface.into();
        self
    }

    pub fn unmount_commands(&self) -> &UnmountCommands {
        &self.unmount_commands
    }

    async fn collect_disks(&self, state: &StateBag) -> UtmforgeResult<Vec<DiskToMount>> {
        let mut disks = Vec::new();

        if self.attach_boot_iso {
            let path = state.get::<PathBuf>(state_keys::ISO_PATH)?;
            disks.push(DiskToMount::resolve(IsoCategory::BootIso, path).await?);
        }

        if state.contains(state_keys::CD_PATH) {
            let path = state.get::<PathBuf>(state_keys::CD_PATH)?;
            disks.push(DiskToMount::resolve(IsoCategory::CdFiles, path).await?);
        }

        if self.guest_additions_mode == GuestAdditionsMode::Attach {
            let path = state.get::<PathBuf>(state_keys::GUEST_ADDITIONS_PATH)?;
            disks.push(DiskToMount::resolve(IsoCategory::GuestAdditions, path).await?);
        }

        disks.sort_by_key(|d| d.category);
        Ok(disks)
    }

    fn interface_for(&self, category: IsoCategory) -> &str {
        match category {
            IsoCategory::BootIso => &self.iso_interface,
            IsoCategory::CdFiles => CD_FILES_INTERFACE,
            IsoCategory::GuestAdditions => &self.guest_additions_interface,
        }
    }

    async fn attach(&mut self, state: &StateBag, disk: &DiskToMount) -> UtmforgeResult<()> {
        let interface: ControllerInterface = self.interface_for(disk.category).parse()?;
        let driver = state.driver()?;
        let vm_id = state.vm_id()?;

        tracing::info!(
            vm_id = %vm_id,
            category = %disk.category,
            interface = %interface,
            path = %disk.path.display(),
            "Attaching ISO"
        );

        let output = driver
            .execute_script(&[
                scripts::ATTACH_ISO.to_string(),
                vm_id.clone(),
                "--interface".to_string(),
                interface.enum_code().to_string(),
                "--source".to_string(),
                disk.path.display().to_string(),
            ])
            .await
            .map_err(|e| e.context(format!("error attaching {} ISO", disk.category)))?;

        let uuid = extract_uuid(&output).ok_or_else(|| {
            UtmforgeError::Contract(format!("error extracting UUID from output: {:?}", output))
        })?;

        tracing::debug!(category = %disk.category, drive = %uuid, "ISO attached");
        self.unmount_commands.insert(
            disk.category,
            vec![scripts::REMOVE_DRIVE.to_string(), vm_id, uuid],
        );
        Ok(())
    }
}

impl Default for AttachIsosStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildStep for AttachIsosStep {
    async fn run(&mut self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        step_start(state, NAME);
        self.unmount_commands.clear();

        let disks = match self.collect_disks(state).await {
            Ok(disks) => disks,
            Err(e) => return halt(state, NAME, e),
        };

        if disks.is_empty() {
            tracing::debug!("No ISOs to attach");
            return StepAction::Continue;
        }

        for disk in &disks {
            // Attachments already made are undone by cleanup.
            if cancel.is_cancelled() {
                return halt(state, NAME, UtmforgeError::Cancelled);
            }
            if let Err(e) = self.attach(state, disk).await {
                return halt(state, NAME, e);
            }
        }

        state.put(state_keys::DISK_UNMOUNT_COMMANDS, self.unmount_commands.clone());
        StepAction::Continue
    }

    async fn cleanup(&mut self, state: &mut StateBag) -> UtmforgeResult<()> {
        if self.unmount_commands.is_empty() {
            return Ok(());
        }

        let mut commands = std::mem::take(&mut self.unmount_commands);
        if state.contains(state_keys::DETACHED_ISOS) {
            tracing::debug!("ISOs already detached, skipping");
            return Ok(());
        }
        if let Some(pending) =
            state.get_ok::<UnmountCommands>(state_keys::DISK_UNMOUNT_COMMANDS)
        {
            commands.retain(|category, _| pending.contains_key(category));
        }

        let driver = state.driver()?;
        let mut failures = Vec::new();
        for (category, command) in &commands {
            tracing::info!(category = %category, "Detaching ISO");
            if let Err(e) = driver.execute_script(command).await {
                tracing::warn!(category = %category, "Failed to detach ISO: {}", e);
                failures.push(format!("{}: {}", category, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UtmforgeError::Driver(format!(
                "error detaching ISOs: {}",
                failures.join("; ")
            )))
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// First canonical UUID in `output`, as written by the driver.
pub fn extract_uuid(output: &str) -> Option<String> {
    UUID_PATTERN
        .find_iter(output)
        .map(|m| m.as_str())
        .find(|candidate| uuid::Uuid::parse_str(candidate).is_ok())
        .map(str::to_string)
}
