//! Headless-browser page source.
//!
//! Uses chromiumoxide (CDP) with stealth patches to render JavaScript-heavy
//! listings. Without the `browser` feature a stub is compiled that fails every
//! render as a network error.

mod config;
#[cfg(feature = "browser")]
mod fetch;
mod stealth;
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
mod tab;

pub use config::BrowserSettings;
pub use stealth::stealth_scripts;

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::{Context, Result};
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::info;

#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig};
#[cfg(feature = "browser")]
use futures::StreamExt;

/// Browser-backed [`PageSource`](super::fetcher::PageSource).
///
/// The browser is launched (or connected) lazily on the first render and
/// shared by all concurrent renders; each render uses its own tab.
#[cfg(feature = "browser")]
pub struct BrowserPageSource {
    pub(crate) settings: BrowserSettings,
    browser: Mutex<Option<Arc<Browser>>>,
}

#[cfg(feature = "browser")]
impl BrowserPageSource {
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            browser: Mutex::new(None),
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found; install it or set browser.remote_url"
        ))
    }

    /// Shared browser handle, launching or connecting on first use.
    pub(crate) async fn browser(&self) -> Result<Arc<Browser>> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }

        let browser = match self.settings.remote_url.clone() {
            Some(remote_url) => self.connect_remote(&remote_url).await?,
            None => self.launch().await?,
        };
        let browser = Arc::new(browser);
        *slot = Some(browser.clone());
        Ok(browser)
    }

    async fn launch(&self) -> Result<Browser> {
        info!("Launching browser (headless={})", self.settings.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1366, 768)
            .request_timeout(Duration::from_secs(self.settings.timeout));

        if !self.settings.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    async fn connect_remote(&self, url: &str) -> Result<Browser> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.settings.timeout
        );

        // The DevTools socket address is published on /json/version.
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        info!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.settings.timeout),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    /// Drop the shared browser; the next render relaunches it.
    pub async fn close(&self) {
        self.browser.lock().await.take();
    }
}

#[cfg(not(feature = "browser"))]
pub struct BrowserPageSource {
    pub(crate) settings: BrowserSettings,
}

#[cfg(not(feature = "browser"))]
impl BrowserPageSource {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    pub async fn close(&self) {}
}

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl super::fetcher::PageSource for BrowserPageSource {
    async fn render(
        &self,
        _url: &str,
        _plan: &super::session::SessionPlan,
    ) -> Result<super::fetcher::RenderedPage, super::fetcher::FetchError> {
        Err(super::fetcher::FetchError::Network(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }
}
