//! Step: resolve and fetch the guest tools ISO.
//!
//! Source precedence: operator URL template, then the ISO bundled with the
//! host installation, then the vendor's rolling release.

use crate::builder::{GuestAdditionsConfig, GuestAdditionsMode};
use crate::driver::SharedDriver;
use crate::fetch::{Checksum, FetchRequest, SharedFetcher};
use crate::pipeline::{BuildStep, StateBag, StepAction, halt, step_start};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::{guest_tools, state_keys};
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

const NAME: &str = "download_guest_additions";

/// Host versions whose guest tools are published under another version.
const VERSION_REMAP: &[(&str, &str)] = &[("4.6.4", "0.229.2")];

static TEMPLATE_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("template action pattern is valid")
});

pub struct DownloadGuestAdditionsStep {
    config: GuestAdditionsConfig,
    fetcher: SharedFetcher,
}

/// Where the ISO comes from.
#[derive(Debug, PartialEq, Eq)]
struct GuestToolsSource {
    url: String,
    /// Provided by the host installation; not checksummed.
    bundled: bool,
}

impl DownloadGuestAdditionsStep {
    pub fn new(config: GuestAdditionsConfig, fetcher: SharedFetcher) -> Self {
        Self { config, fetcher }
    }

    async fn download(
        &self,
        state: &StateBag,
        cancel: &CancellationToken,
    ) -> UtmforgeResult<PathBuf> {
        let driver = state.driver()?;

        let reported = driver
            .version()
            .await
            .map_err(|e| e.context("error reading version for guest additions download"))?;
        let version = remap_version(&reported);
        if version != reported {
            tracing::info!(reported = %reported, version = %version, "Using remapped guest tools version");
        }

        let rendered = render_url_template(&self.config.url, version).map_err(|e| {
            UtmforgeError::Config(format!("error preparing guest additions url: {}", e))
        })?;

        let source = resolve_source(rendered, &driver).await?;
        let checksum = if source.bundled {
            Checksum::None
        } else if !self.config.sha256.is_empty() {
            Checksum::sha256(&self.config.sha256)?
        } else {
            tracing::warn!(url = %source.url, "No guest additions checksum configured, skipping verification");
            Checksum::None
        };

        let request = FetchRequest {
            urls: vec![source.url],
            checksum,
            target_path: self.config.path.clone(),
            extension: guest_tools::ISO_EXTENSION.to_string(),
            description: "Guest additions".to_string(),
        };
        self.fetcher.fetch(&request, cancel).await
    }
}

#[async_trait]
impl BuildStep for DownloadGuestAdditionsStep {
    async fn run(&mut self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        step_start(state, NAME);

        if self.config.mode == GuestAdditionsMode::Disable {
            tracing::debug!("Guest additions disabled, skipping download");
            return StepAction::Continue;
        }

        match self.download(state, cancel).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Guest additions ready");
                state.put(state_keys::GUEST_ADDITIONS_PATH, path);
                StepAction::Continue
            }
            Err(e) => halt(state, NAME, e),
        }
    }

    async fn cleanup(&mut self, _state: &mut StateBag) -> UtmforgeResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Guest tools version matching a host version.
pub fn remap_version(version: &str) -> &str {
    VERSION_REMAP
        .iter()
        .find(|(host, _)| *host == version)
        .map(|(_, tools)| *tools)
        .unwrap_or(version)
}

/// Vendor URL of the rolling guest tools release.
pub fn default_guest_tools_url() -> String {
    format!(
        "{}/utm-guest-tools-{}.{}",
        guest_tools::DEFAULT_DOWNLOAD_BASE,
        guest_tools::DEFAULT_RELEASE,
        guest_tools::ISO_EXTENSION
    )
}

/// Render `{{ .Version }}` actions in `template`.
///
/// `.Version` is the only variable. Any other action, or a `{{` without a
/// matching `}}`, is an error. The result is trimmed.
pub fn render_url_template(template: &str, version: &str) -> Result<String, String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in TEMPLATE_ACTION.captures_iter(template) {
        let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        match expr.as_str() {
            ".Version" => rendered.push_str(version),
            other => return Err(format!("unknown template variable '{}'", other)),
        }
        last = whole.end();
    }

    let rest = &template[last..];
    if rest.contains("{{") {
        return Err(format!("unclosed action in '{}'", template));
    }
    rendered.push_str(rest);
    Ok(rendered.trim().to_string())
}

async fn resolve_source(rendered: String, driver: &SharedDriver) -> UtmforgeResult<GuestToolsSource> {
    if !rendered.is_empty() {
        return Ok(GuestToolsSource {
            url: rendered,
            bundled: false,
        });
    }

    tracing::debug!("guest_additions_url is blank, querying driver for bundled ISO");
    let source = match driver.guest_tools_iso_path().await {
        Ok(path) => GuestToolsSource {
            url: path,
            bundled: true,
        },
        Err(e) => {
            tracing::debug!("No bundled guest tools: {}", e);
            let url = default_guest_tools_url();
            tracing::info!(url = %url, "Falling back to vendor guest tools release");
            GuestToolsSource {
                url,
                bundled: false,
            }
        }
    };

    if source.url.is_empty() {
        return Err(UtmforgeError::Config(
            "couldn't detect guest additions URL.\nPlease specify `guest_additions_url` manually"
                .into(),
        ));
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDriver, MockFetcher, state_with};
    use std::sync::Arc;

    const SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn config(mode: GuestAdditionsMode, url: &str, sha256: &str) -> GuestAdditionsConfig {
        GuestAdditionsConfig {
            mode,
            url: url.to_string(),
            sha256: sha256.to_string(),
            ..Default::default()
        }
    }

    async fn run_step(
        driver: &Arc<MockDriver>,
        fetcher: &Arc<MockFetcher>,
        config: GuestAdditionsConfig,
    ) -> (StepAction, StateBag) {
        let mut state = state_with(driver);
        let mut step = DownloadGuestAdditionsStep::new(config, fetcher.clone());
        let action = step.run(&mut state, &CancellationToken::new()).await;
        (action, state)
    }

    #[tokio::test]
    async fn test_disabled_mode_does_nothing() {
        let driver = Arc::new(MockDriver::new().with_version("4.6.4"));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let (action, state) =
            run_step(&driver, &fetcher, config(GuestAdditionsMode::Disable, "", "")).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(driver.version_calls(), 0);
        assert!(fetcher.requests().is_empty());
        assert!(!state.contains(state_keys::GUEST_ADDITIONS_PATH));
    }

    #[tokio::test]
    async fn test_remapped_version_is_rendered() {
        let driver = Arc::new(MockDriver::new().with_version("4.6.4"));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));
        let url = "https://mirror.example/utm-guest-tools-{{ .Version }}.iso";

        let (action, state) =
            run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, url, SHA)).await;

        assert_eq!(action, StepAction::Continue);
        let requests = fetcher.requests();
        assert_eq!(
            requests[0].urls,
            vec!["https://mirror.example/utm-guest-tools-0.229.2.iso".to_string()]
        );
        assert_eq!(requests[0].checksum, Checksum::Sha256(SHA.to_string()));
        assert_eq!(requests[0].extension, "iso");
        assert_eq!(
            state.get::<PathBuf>(state_keys::GUEST_ADDITIONS_PATH).unwrap(),
            &PathBuf::from("/tmp/tools.iso")
        );
    }

    #[tokio::test]
    async fn test_unmapped_version_is_used_verbatim() {
        let driver = Arc::new(MockDriver::new().with_version("4.7.0"));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        run_step(
            &driver,
            &fetcher,
            config(GuestAdditionsMode::Upload, "https://m/{{.Version}}/tools.iso", ""),
        )
        .await;

        let request = &fetcher.requests()[0];
        assert_eq!(request.urls, vec!["https://m/4.7.0/tools.iso".to_string()]);
        assert_eq!(request.checksum, Checksum::None);
    }

    #[tokio::test]
    async fn test_version_failure_halts() {
        let driver = Arc::new(MockDriver::new());
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let (action, state) =
            run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, "", "")).await;

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(state.error(), Some(UtmforgeError::Driver(_))));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_bad_template_halts_with_config_error() {
        let driver = Arc::new(MockDriver::new().with_version("4.7.0"));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let (action, state) = run_step(
            &driver,
            &fetcher,
            config(GuestAdditionsMode::Attach, "https://m/{{ .Arch }}.iso", ""),
        )
        .await;

        assert_eq!(action, StepAction::Halt);
        let err = state.error().unwrap();
        assert!(matches!(err, UtmforgeError::Config(_)));
        assert!(err.to_string().contains("error preparing guest additions url"));
    }

    #[tokio::test]
    async fn test_bundled_iso_skips_checksum() {
        let driver = Arc::new(
            MockDriver::new()
                .with_version("4.7.0")
                .with_tools_path("/Applications/UTM.app/Contents/Resources/utm-guest-tools.iso"),
        );
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, "", SHA)).await;

        let request = &fetcher.requests()[0];
        assert_eq!(
            request.urls,
            vec!["/Applications/UTM.app/Contents/Resources/utm-guest-tools.iso".to_string()]
        );
        assert_eq!(request.checksum, Checksum::None);
    }

    #[tokio::test]
    async fn test_falls_back_to_vendor_release() {
        let driver = Arc::new(MockDriver::new().with_version("4.7.0"));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, "", "")).await;

        let request = &fetcher.requests()[0];
        assert_eq!(
            request.urls,
            vec!["https://getutm.app/downloads/utm-guest-tools-latest.iso".to_string()]
        );
        assert_eq!(request.checksum, Checksum::None);
    }

    #[tokio::test]
    async fn test_empty_bundled_path_halts_without_fetching() {
        let driver = Arc::new(MockDriver::new().with_version("4.7.0").with_tools_path(""));
        let fetcher = Arc::new(MockFetcher::returning("/tmp/tools.iso"));

        let (action, state) =
            run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, "", "")).await;

        assert_eq!(action, StepAction::Halt);
        let err = state.error().unwrap();
        assert!(matches!(err, UtmforgeError::Config(_)));
        assert!(err.to_string().contains("couldn't detect guest additions URL"));
        assert!(fetcher.requests().is_empty());
        assert!(!state.contains(state_keys::GUEST_ADDITIONS_PATH));
    }

    #[tokio::test]
    async fn test_fetch_failure_halts() {
        let driver = Arc::new(MockDriver::new().with_version("4.7.0"));
        let fetcher = Arc::new(MockFetcher::failing("HTTP 404"));

        let (action, state) =
            run_step(&driver, &fetcher, config(GuestAdditionsMode::Attach, "", "")).await;

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(state.error(), Some(UtmforgeError::Fetch(_))));
        assert!(!state.contains(state_keys::GUEST_ADDITIONS_PATH));
    }

    #[test]
    fn test_render_url_template() {
        assert_eq!(render_url_template("", "1.0").unwrap(), "");
        assert_eq!(render_url_template(" https://x/a.iso ", "1.0").unwrap(), "https://x/a.iso");
        assert_eq!(
            render_url_template("https://x/{{ .Version }}/{{.Version}}.iso", "1.0").unwrap(),
            "https://x/1.0/1.0.iso"
        );
        assert!(render_url_template("https://x/{{ .Version", "1.0").is_err());
        assert!(render_url_template("https://x/{{ user `v` }}", "1.0").is_err());
    }

    #[test]
    fn test_remap_version() {
        assert_eq!(remap_version("4.6.4"), "0.229.2");
        assert_eq!(remap_version("4.6.5"), "4.6.5");
    }
}
