//! One shaped render per attempt: warm-up, navigate, settle, read.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::stealth::stealth_scripts;
use super::tab::TabGuard;
use super::BrowserPageSource;
use crate::scrapers::fetcher::{FetchError, PageSource, RenderedPage};
use crate::scrapers::session::SessionPlan;

const WAIT_FOR_READY: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

fn network<E: std::fmt::Display>(e: E) -> FetchError {
    FetchError::Network(e.to_string())
}

impl BrowserPageSource {
    /// Present the plan's identity on a fresh tab.
    async fn shape(&self, page: &Page, plan: &SessionPlan) -> Result<(), FetchError> {
        page.execute(SetUserAgentOverrideParams::new(plan.user_agent.clone()))
            .await
            .map_err(network)?;

        let headers: serde_json::Map<String, serde_json::Value> = plan
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(headers),
        )))
        .await
        .map_err(network)?;

        if let Some(ref tz) = self.settings.timezone {
            if let Err(e) = page.execute(SetTimezoneOverrideParams::new(tz.clone())).await {
                debug!("Timezone override skipped: {}", e);
            }
        }
        Ok(())
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<(), FetchError> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(FetchError::InvalidUrl)?;
        let resp = page.execute(params).await.map_err(network)?;
        if let Some(error_text) = resp.result.error_text.clone() {
            return Err(FetchError::Network(format!("{}: {}", url, error_text)));
        }

        let ready_timeout = Duration::from_secs(self.settings.timeout);
        match tokio::time::timeout(ready_timeout, page.evaluate(WAIT_FOR_READY.to_string())).await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state on {}", url),
        }
        Ok(())
    }

    async fn apply_stealth(&self, page: &Page, plan: &SessionPlan) {
        for script in stealth_scripts(&plan.languages) {
            if let Err(e) = page.evaluate(script).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }

    async fn render_on(
        &self,
        page: &Page,
        url: &str,
        plan: &SessionPlan,
    ) -> Result<RenderedPage, FetchError> {
        self.shape(page, plan).await?;

        if let Some(ref warmup) = plan.warmup_url {
            debug!("Warming up session on {}", warmup);
            // A failed warm-up is not fatal; the target load decides.
            if let Err(e) = self.navigate(page, warmup).await {
                warn!("Warm-up load failed: {}", e);
            }
            tokio::time::sleep(plan.warmup_pause).await;
        }

        info!("Navigating to {}", url);
        self.navigate(page, url).await?;
        self.apply_stealth(page, plan).await;
        tokio::time::sleep(plan.settle_delay).await;

        let final_url = page
            .url()
            .await
            .map_err(network)?
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());
        let content = page.content().await.map_err(network)?;

        Ok(RenderedPage {
            url: url.to_string(),
            final_url,
            // CDP does not surface the document status; classification relies on content.
            status: 200,
            content,
        })
    }
}

#[async_trait]
impl PageSource for BrowserPageSource {
    async fn render(&self, url: &str, plan: &SessionPlan) -> Result<RenderedPage, FetchError> {
        let browser = self
            .browser()
            .await
            .map_err(|e| FetchError::Network(format!("{:#}", e)))?;
        let page = browser.new_page("about:blank").await.map_err(network)?;
        let tab = TabGuard::new(page.clone());

        let result = self.render_on(&page, url, plan).await;

        tab.close().await;
        result
    }
}
