//! Test doubles for the driver and fetch capabilities.

use crate::driver::{Driver, SharedDriver};
use crate::fetch::{FetchRequest, Fetcher};
use crate::pipeline::StateBag;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::{scripts, state_keys};
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

pub const VM_ID: &str = "vm-test";

/// Driver that records every script invocation.
///
/// `attach_iso.applescript` answers with a fresh UUID unless an output is
/// scripted; every other script answers with an empty string.
#[derive(Default)]
pub struct MockDriver {
    calls: Mutex<Vec<Vec<String>>>,
    version_calls: AtomicUsize,
    attach_count: AtomicUsize,
    version: Option<String>,
    tools_path: Option<String>,
    attach_output: Option<String>,
    failing: Vec<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_tools_path(mut self, path: &str) -> Self {
        self.tools_path = Some(path.to_string());
        self
    }

    pub fn with_attach_output(mut self, output: &str) -> Self {
        self.attach_output = Some(output.to_string());
        self
    }

    /// Fail every invocation whose arguments contain `arg`.
    pub fn failing_on(mut self, arg: &str) -> Self {
        self.failing.push(arg.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, script: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.first().is_some_and(|s| s == script))
            .collect()
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    async fn execute_script(&self, args: &[String]) -> UtmforgeResult<String> {
        self.calls.lock().unwrap().push(args.to_vec());

        if let Some(arg) = self.failing.iter().find(|f| args.contains(f)) {
            return Err(UtmforgeError::Driver(format!("script failed on {}", arg)));
        }

        if args.first().is_some_and(|s| s == scripts::ATTACH_ISO) {
            if let Some(output) = &self.attach_output {
                return Ok(output.clone());
            }
            let n = self.attach_count.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(format!("{:08X}-0000-4000-8000-{:012X}", n, n));
        }
        Ok(String::new())
    }

    async fn version(&self) -> UtmforgeResult<String> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.version
            .clone()
            .ok_or_else(|| UtmforgeError::Driver("version unavailable".into()))
    }

    async fn guest_tools_iso_path(&self) -> UtmforgeResult<String> {
        self.tools_path
            .clone()
            .ok_or_else(|| UtmforgeError::Unsupported("no bundled guest tools".into()))
    }
}

/// Fetcher that records requests and returns a fixed path.
pub struct MockFetcher {
    requests: Mutex<Vec<FetchRequest>>,
    result: Result<PathBuf, String>,
}

impl MockFetcher {
    pub fn returning(path: impl Into<PathBuf>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            result: Ok(path.into()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            result: Err(message.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        _cancel: &CancellationToken,
    ) -> UtmforgeResult<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        self.result.clone().map_err(UtmforgeError::Fetch)
    }
}

/// State bag seeded with `driver` and `vmId`.
pub fn state_with(driver: &Arc<MockDriver>) -> StateBag {
    let mut state = StateBag::new();
    let shared: SharedDriver = driver.clone();
    state.put(state_keys::DRIVER, shared);
    state.put(state_keys::VM_ID, VM_ID.to_string());
    state
}
