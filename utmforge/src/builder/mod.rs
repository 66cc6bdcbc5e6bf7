//! Image build orchestration.
//!
//! [`ImageBuilder`] turns a validated [`BuildConfig`] into the standard step
//! sequence and runs it against one VM:
//!
//! ```text
//! configure_qemu_args → download_guest_additions → attach_isos
//!     → <caller steps> → detach_isos
//! ```
//!
//! Caller steps run while the ISOs are attached (e.g. waiting for an
//! unattended install). `detach_isos` marks the drives as detached so the
//! unwind does not detach them twice.

mod config;

pub use config::{BuildConfig, GuestAdditionsConfig, GuestAdditionsMode, QemuConfig};

use crate::driver::{OsascriptDriver, SharedDriver};
use crate::fetch::{CachingFetcher, SharedFetcher};
use crate::pipeline::{BoxedStep, Pipeline, PipelineExecutor, PipelineMetrics, StateBag};
use crate::steps::{AttachIsosStep, ConfigureQemuArgsStep, DetachIsosStep, DownloadGuestAdditionsStep};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::state_keys;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

/// Artifacts produced before this engine runs.
#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    /// Boot ISO. Required when `attach_boot_iso` is set.
    pub iso_path: Option<PathBuf>,
    /// ISO with supplemental files.
    pub cd_path: Option<PathBuf>,
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub vm_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: PipelineMetrics,
    /// Arguments written to the VM definition.
    pub user_qemu_args: Vec<String>,
    pub guest_additions_path: Option<PathBuf>,
}

pub struct ImageBuilder {
    config: BuildConfig,
    driver: SharedDriver,
    fetcher: SharedFetcher,
    extra_steps: Vec<BoxedStep>,
}

impl ImageBuilder {
    /// Validate `config` and bind it to the given capabilities.
    pub fn new(
        config: BuildConfig,
        driver: SharedDriver,
        fetcher: SharedFetcher,
    ) -> UtmforgeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            driver,
            fetcher,
            extra_steps: Vec::new(),
        })
    }

    /// Builder backed by UTM's AppleScript automation and the download cache.
    pub fn with_host_defaults(config: BuildConfig) -> UtmforgeResult<Self> {
        let driver: SharedDriver = Arc::new(OsascriptDriver::new(config.driver.clone()));
        let fetcher: SharedFetcher = Arc::new(CachingFetcher::new(config.cache_dir()));
        Self::new(config, driver, fetcher)
    }

    /// Steps to run while the ISOs are attached.
    pub fn with_steps(mut self, steps: Vec<BoxedStep>) -> Self {
        self.extra_steps.extend(steps);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn execution_plan(&mut self) -> Pipeline {
        let ga = &self.config.guest_additions;

        let mut attach = AttachIsosStep::new().with_guest_additions(ga.mode, ga.interface.clone());
        if self.config.attach_boot_iso {
            attach = attach.with_boot_iso(self.config.iso_interface.clone());
        }

        let mut steps: Vec<BoxedStep> = vec![
            Box::new(ConfigureQemuArgsStep::new(self.config.qemu.qemuargs.clone())),
            Box::new(DownloadGuestAdditionsStep::new(
                ga.clone(),
                Arc::clone(&self.fetcher),
            )),
            Box::new(attach),
        ];
        steps.append(&mut self.extra_steps);
        steps.push(Box::new(DetachIsosStep::new()));
        Pipeline::new(steps)
    }

    /// Run the build against `vm_id`.
    ///
    /// On failure every step that ran has been cleaned up before the first
    /// recorded error is returned.
    pub async fn build(
        mut self,
        vm_id: &str,
        inputs: BuildInputs,
        cancel: &CancellationToken,
    ) -> UtmforgeResult<BuildReport> {
        if self.config.attach_boot_iso && inputs.iso_path.is_none() {
            return Err(UtmforgeError::Config(
                "attach_boot_iso is set but no boot ISO was provided".into(),
            ));
        }

        let started_at = Utc::now();
        let mut state = StateBag::new();
        state.put(state_keys::DRIVER, Arc::clone(&self.driver));
        state.put(state_keys::VM_ID, vm_id.to_string());
        if let Some(path) = inputs.iso_path {
            state.put(state_keys::ISO_PATH, path);
        }
        if let Some(path) = inputs.cd_path {
            state.put(state_keys::CD_PATH, path);
        }

        let pipeline = self.execution_plan();
        tracing::info!(vm_id = %vm_id, steps = ?pipeline.step_names(), "Starting build");

        let metrics = PipelineExecutor::execute(pipeline, &mut state, cancel).await;

        if let Some(err) = state.take_error() {
            tracing::error!(
                vm_id = %vm_id,
                halted_at = ?metrics.halted_at,
                cleanup_failures = metrics.cleanup_failures.len(),
                "Build failed: {}",
                err
            );
            return Err(err);
        }

        let report = BuildReport {
            vm_id: vm_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            user_qemu_args: state
                .get_ok::<Vec<String>>(state_keys::USER_QEMU_ARGS)
                .cloned()
                .unwrap_or_default(),
            guest_additions_path: state
                .get_ok::<PathBuf>(state_keys::GUEST_ADDITIONS_PATH)
                .cloned(),
            metrics,
        };

        tracing::info!(
            vm_id = %vm_id,
            duration_ms = report.metrics.total_duration_ms as u64,
            "Build finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverConfig;
    use crate::testing::{MockDriver, MockFetcher};
    use utmforge_shared::constants::scripts;

    fn builder(config: BuildConfig, driver: &Arc<MockDriver>, fetcher: &Arc<MockFetcher>) -> ImageBuilder {
        ImageBuilder::new(config, driver.clone(), fetcher.clone()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = BuildConfig::new(DriverConfig::new("/opt/utm/scripts"));
        config.qemu.qemuargs = vec![Vec::new()];

        let result = ImageBuilder::new(
            config,
            Arc::new(MockDriver::new()),
            Arc::new(MockFetcher::returning("/tmp/tools.iso")),
        );
        assert!(matches!(result, Err(UtmforgeError::Config(_))));
    }

    #[test]
    fn test_execution_plan_order() {
        let config = BuildConfig::new(DriverConfig::new("/opt/utm/scripts"));
        let mut builder = builder(
            config,
            &Arc::new(MockDriver::new()),
            &Arc::new(MockFetcher::returning("/tmp/tools.iso")),
        )
        .with_steps(vec![Box::new(DetachIsosStep::new())]);

        let plan = builder.execution_plan();
        assert_eq!(
            plan.step_names(),
            vec![
                "configure_qemu_args",
                "download_guest_additions",
                "attach_isos",
                "detach_isos",
                "detach_isos",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_boot_iso_fails_fast() {
        let mut config = BuildConfig::new(DriverConfig::new("/opt/utm/scripts"));
        config.attach_boot_iso = true;
        let driver = Arc::new(MockDriver::new());
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let err = builder(config, &driver, &fetcher)
            .build("vm-1", BuildInputs::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UtmforgeError::Config(_)));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_build_touches_nothing() {
        let mut config = BuildConfig::new(DriverConfig::new("/opt/utm/scripts"));
        config.guest_additions.mode = GuestAdditionsMode::Disable;
        let driver = Arc::new(MockDriver::new());
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let report = builder(config, &driver, &fetcher)
            .build("vm-1", BuildInputs::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.vm_id, "vm-1");
        assert!(report.user_qemu_args.is_empty());
        assert!(report.guest_additions_path.is_none());
        assert!(report.finished_at >= report.started_at);
        assert!(driver.calls().is_empty());
        assert!(driver.calls_to(scripts::ATTACH_ISO).is_empty());
        assert_eq!(driver.version_calls(), 0);
        assert!(fetcher.requests().is_empty());
        assert_eq!(report.metrics.steps.len(), 4);
    }
}
