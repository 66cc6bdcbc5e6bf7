//! Hypervisor automation driver.
//!
//! The engine only sequences calls through the [`Driver`] trait; it never
//! builds automation scripts itself.
//!
//! ## Architecture
//!
//! - **Driver**: Opaque capability (execute script, version, guest tools path)
//! - **OsascriptDriver**: Runs UTM AppleScript automation via `osascript`
//! - **ControllerInterface**: Maps drive interface names to UTM enum codes

mod controller;
mod osascript;

pub use controller::ControllerInterface;
pub use osascript::{DriverConfig, OsascriptDriver};

use std::sync::Arc;
use utmforge_shared::UtmforgeResult;

/// Trait for the hypervisor control surface.
///
/// Implementations may retry internally; the pipeline never does.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Run a named automation script with arguments and return its output.
    ///
    /// `args[0]` is the script name, the rest are passed through verbatim.
    async fn execute_script(&self, args: &[String]) -> UtmforgeResult<String>;

    /// Hypervisor version as reported by the host installation.
    async fn version(&self) -> UtmforgeResult<String>;

    /// Default location of the guest tools ISO, if the hypervisor knows one.
    async fn guest_tools_iso_path(&self) -> UtmforgeResult<String>;
}

pub type SharedDriver = Arc<dyn Driver>;
