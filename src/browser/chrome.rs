use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Browser, BrowserError, WaitPolicy};
use crate::config::BrowserSettings;

const READY_POLL: Duration = Duration::from_millis(250);

/// One Chrome process with a single tab. The orchestrator owns it and must
/// call [`ChromeSession::close`] when its passes are done.
pub struct ChromeSession {
    browser: CdpBrowser,
    page: Page,
    handler: JoinHandle<()>,
    ready_timeout: Duration,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(settings.request_timeout_ms))
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &settings.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if let Some(exe) = &settings.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser config: {}", e))?;

        let (browser, mut events) = CdpBrowser::launch(config)
            .await
            .context("Failed to launch Chrome")?;

        // The CDP connection only makes progress while its event stream is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        info!(headless = settings.headless, "Browser session started");
        Ok(ChromeSession {
            browser,
            page,
            handler,
            ready_timeout: Duration::from_millis(settings.request_timeout_ms),
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
        info!("Browser session closed");
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let start = tokio::time::Instant::now();
        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await?
                .into_value()?;
            if state == "complete" {
                return Ok(());
            }
            if start.elapsed() >= self.ready_timeout {
                return Err(BrowserError::WaitTimeout {
                    selector: "document.readyState".to_string(),
                    timeout: self.ready_timeout,
                }
                .into());
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

#[async_trait(?Send)]
impl Browser for ChromeSession {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;
        if wait == WaitPolicy::DocumentComplete {
            self.wait_until_ready().await?;
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to click {}", selector))?;
        Ok(())
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector)?
        );
        let n: usize = self.page.evaluate(script).await?.into_value()?;
        Ok(n)
    }

    async fn snapshot(&mut self) -> Result<String> {
        Ok(self.page.content().await?)
    }
}
