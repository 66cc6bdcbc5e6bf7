//! Well-known names shared between steps, drivers and callers.

/// Keys of the shared build state.
pub mod state_keys {
    /// `Arc<dyn Driver>` handle.
    pub const DRIVER: &str = "driver";
    /// Identifier of the VM being built (`String`).
    pub const VM_ID: &str = "vmId";
    /// Boot ISO path (`PathBuf`).
    pub const ISO_PATH: &str = "iso_path";
    /// Supplemental files ISO path (`PathBuf`), prepared by an earlier step.
    pub const CD_PATH: &str = "cd_path";
    /// Downloaded guest tools ISO (`PathBuf`).
    pub const GUEST_ADDITIONS_PATH: &str = "guest_additions_path";
    /// Joined user QEMU arguments (`Vec<String>`).
    pub const USER_QEMU_ARGS: &str = "userQemuArgs";
    /// Per-category detach commands.
    pub const DISK_UNMOUNT_COMMANDS: &str = "disk_unmount_commands";
    /// Presence-only marker: ISOs were already detached.
    pub const DETACHED_ISOS: &str = "detached_isos";
    /// Terminal build error.
    pub const ERROR: &str = "error";
}

/// AppleScript automation entry points shipped alongside UTM builds.
pub mod scripts {
    pub const ADD_QEMU_ADDITIONAL_ARGS: &str = "add_qemu_additional_args.applescript";
    pub const ATTACH_ISO: &str = "attach_iso.applescript";
    pub const REMOVE_DRIVE: &str = "remove_drive.applescript";
}

/// Guest tools distribution.
pub mod guest_tools {
    /// Vendor download location used when neither the operator nor the
    /// driver can name an ISO.
    pub const DEFAULT_DOWNLOAD_BASE: &str = "https://getutm.app/downloads";
    /// Version label of the vendor's rolling guest tools build.
    pub const DEFAULT_RELEASE: &str = "latest";
    pub const ISO_EXTENSION: &str = "iso";
}

/// Interface used for the supplemental files ISO regardless of configuration.
pub const CD_FILES_INTERFACE: &str = "usb";
