//! Drive interface designations understood by UTM's scripting dictionary.

use std::fmt;
use std::str::FromStr;
use utmforge_shared::UtmforgeError;

/// QEMU drive interface a removable drive is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerInterface {
    None,
    Ide,
    Scsi,
    Sd,
    Mtd,
    Floppy,
    Pflash,
    Usb,
    Nvme,
    Virtio,
}

impl ControllerInterface {
    pub const ALL: [ControllerInterface; 10] = [
        ControllerInterface::None,
        ControllerInterface::Ide,
        ControllerInterface::Scsi,
        ControllerInterface::Sd,
        ControllerInterface::Mtd,
        ControllerInterface::Floppy,
        ControllerInterface::Pflash,
        ControllerInterface::Usb,
        ControllerInterface::Nvme,
        ControllerInterface::Virtio,
    ];

    /// Four-character enum code used by the automation scripts.
    pub fn enum_code(self) -> &'static str {
        match self {
            ControllerInterface::None => "QdIn",
            ControllerInterface::Ide => "QdIi",
            ControllerInterface::Scsi => "QdIs",
            ControllerInterface::Sd => "QdId",
            ControllerInterface::Mtd => "QdIm",
            ControllerInterface::Floppy => "QdIf",
            ControllerInterface::Pflash => "QdIp",
            ControllerInterface::Usb => "QdIu",
            ControllerInterface::Nvme => "QdIN",
            ControllerInterface::Virtio => "QdIv",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerInterface::None => "none",
            ControllerInterface::Ide => "ide",
            ControllerInterface::Scsi => "scsi",
            ControllerInterface::Sd => "sd",
            ControllerInterface::Mtd => "mtd",
            ControllerInterface::Floppy => "floppy",
            ControllerInterface::Pflash => "pflash",
            ControllerInterface::Usb => "usb",
            ControllerInterface::Nvme => "nvme",
            ControllerInterface::Virtio => "virtio",
        }
    }
}

impl FromStr for ControllerInterface {
    type Err = UtmforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|iface| iface.as_str() == s)
            .ok_or_else(|| {
                UtmforgeError::Config(format!(
                    "unknown drive interface '{}'; expected one of: {}",
                    s,
                    Self::ALL.map(|i| i.as_str()).join(", ")
                ))
            })
    }
}

impl fmt::Display for ControllerInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
