#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use utmforge::constants::scripts;
use utmforge::{
    BuildStep, Driver, DriverConfig, StateBag, StepAction, UtmforgeError, UtmforgeResult,
};

// ============================================================================
// FAKE HYPERVISOR
// ============================================================================

/// In-memory stand-in for UTM's automation layer.
///
/// Tracks which drives are currently attached so tests can assert that a
/// build leaves nothing behind.
#[derive(Default)]
pub struct FakeUtm {
    pub version: String,
    calls: Mutex<Vec<Vec<String>>>,
    attached: Mutex<Vec<(String, String)>>,
    next_drive: AtomicUsize,
    fail_attach_of: Mutex<Option<String>>,
    attach_delay_ms: AtomicU64,
}

impl FakeUtm {
    pub fn new(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: version.to_string(),
            ..Default::default()
        })
    }

    /// Make attaching `source` fail.
    pub fn fail_attach_of(&self, source: &str) {
        *self.fail_attach_of.lock().unwrap() = Some(source.to_string());
    }

    /// Keep each attach call running for `delay` after the drive is added.
    pub fn slow_attach(&self, delay: Duration) {
        self.attach_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scripts_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c[0].clone()).collect()
    }

    /// Sources of currently attached drives, in attachment order.
    pub fn attached_sources(&self) -> Vec<String> {
        self.attached
            .lock()
            .unwrap()
            .iter()
            .map(|(_, source)| source.clone())
            .collect()
    }

    /// Every source ever attached, in order.
    pub fn attach_history(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c[0] == scripts::ATTACH_ISO)
            .map(|c| c[5].clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Driver for FakeUtm {
    async fn execute_script(&self, args: &[String]) -> UtmforgeResult<String> {
        self.calls.lock().unwrap().push(args.to_vec());

        match args.first().map(String::as_str) {
            Some(scripts::ATTACH_ISO) => {
                let source = args[5].clone();
                if self.fail_attach_of.lock().unwrap().as_deref() == Some(source.as_str()) {
                    return Err(UtmforgeError::Driver(format!("cannot attach {}", source)));
                }
                let n = self.next_drive.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("{:08X}-AAAA-4BBB-8CCC-{:012X}", n, n);
                self.attached.lock().unwrap().push((id.clone(), source));

                let delay = self.attach_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok(format!("Added drive {}", id))
            }
            Some(scripts::REMOVE_DRIVE) => {
                let mut attached = self.attached.lock().unwrap();
                let before = attached.len();
                attached.retain(|(id, _)| id != &args[2]);
                if attached.len() == before {
                    return Err(UtmforgeError::Driver(format!("no drive {}", args[2])));
                }
                Ok(String::new())
            }
            Some(scripts::ADD_QEMU_ADDITIONAL_ARGS) => Ok(String::new()),
            other => Err(UtmforgeError::Driver(format!("unknown script {:?}", other))),
        }
    }

    async fn version(&self) -> UtmforgeResult<String> {
        Ok(self.version.clone())
    }

    async fn guest_tools_iso_path(&self) -> UtmforgeResult<String> {
        Err(UtmforgeError::Unsupported("no bundled guest tools".into()))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub struct IsoFixture {
    pub dir: TempDir,
    pub boot: PathBuf,
    pub cd: PathBuf,
    pub tools: PathBuf,
}

impl IsoFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let write = |name: &str, body: &[u8]| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).expect("Failed to write ISO");
            path.canonicalize().expect("Failed to canonicalize ISO")
        };
        let boot = write("boot.iso", b"boot");
        let cd = write("cd.iso", b"cd");
        let tools = write("tools.iso", b"hello");
        Self {
            dir,
            boot,
            cd,
            tools,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(self.dir.path().join("scripts"))
    }
}

pub fn display(path: &std::path::Path) -> String {
    path.display().to_string()
}

// ============================================================================
// STEPS
// ============================================================================

/// Step that waits until cancelled, like an install watcher.
pub struct WaitForInstall;

#[async_trait::async_trait]
impl BuildStep for WaitForInstall {
    async fn run(&mut self, _state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        tokio::select! {
            _ = cancel.cancelled() => StepAction::Halt,
            _ = tokio::time::sleep(Duration::from_secs(3600)) => StepAction::Continue,
        }
    }

    async fn cleanup(&mut self, _state: &mut StateBag) -> UtmforgeResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "wait_for_install"
    }
}
