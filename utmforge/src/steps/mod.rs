//! Build steps.
//!
//! Each step is a [`BuildStep`](crate::pipeline::BuildStep) that reads its
//! prerequisites from the state bag, talks to the driver or fetcher, and
//! publishes its results under a well-known key:
//!
//! | Step                         | Reads                                    | Writes                  |
//! |------------------------------|------------------------------------------|-------------------------|
//! | [`ConfigureQemuArgsStep`]    | `driver`, `vmId`                         | `userQemuArgs`          |
//! | [`DownloadGuestAdditionsStep`] | `driver`                               | `guest_additions_path`  |
//! | [`AttachIsosStep`]           | `iso_path`, `cd_path`, `guest_additions_path` | `disk_unmount_commands` |
//! | [`DetachIsosStep`]           | `disk_unmount_commands`                  | `disk_unmount_commands`, `detached_isos` |

mod attach_isos;
mod configure_qemu_args;
mod detach_isos;
mod download_guest_additions;

pub use attach_isos::{AttachIsosStep, DiskToMount, IsoCategory, UnmountCommands, extract_uuid};
pub use configure_qemu_args::{ConfigureQemuArgsStep, join_arg_groups, merged_qemu_args};
pub use detach_isos::DetachIsosStep;
pub use download_guest_additions::{
    DownloadGuestAdditionsStep, default_guest_tools_url, remap_version, render_url_template,
};
