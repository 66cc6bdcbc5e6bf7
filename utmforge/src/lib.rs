//! utmforge: VM image build steps for UTM.
//!
//! A build is an ordered [`Pipeline`] of [`BuildStep`]s sharing one
//! [`StateBag`]. Steps drive the hypervisor through the [`Driver`] capability
//! and retrieve artifacts through the [`Fetcher`] capability. The first step
//! that halts stops the build, and every step that ran is cleaned up in
//! reverse order.

pub mod builder;
pub mod driver;
pub mod fetch;
pub mod pipeline;
pub mod steps;
pub mod util;

#[cfg(test)]
mod testing;

pub use builder::{
    BuildConfig, BuildInputs, BuildReport, GuestAdditionsConfig, GuestAdditionsMode,
    ImageBuilder, QemuConfig,
};
pub use driver::{ControllerInterface, Driver, DriverConfig, OsascriptDriver, SharedDriver};
pub use fetch::{CachingFetcher, Checksum, FetchRequest, Fetcher, SharedFetcher};
pub use pipeline::{
    BoxedStep, BuildStep, Pipeline, PipelineExecutor, PipelineMetrics, StateBag, StepAction,
};
pub use utmforge_shared::constants;
pub use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};
