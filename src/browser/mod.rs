pub mod chrome;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use chrome::ChromeSession;

const WAIT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return once the load event fires.
    Load,
    /// Additionally poll until `document.readyState == "complete"`.
    DocumentComplete,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("selector {selector:?} not visible after {timeout:?}")]
    WaitTimeout { selector: String, timeout: Duration },
    #[error("no element matches {0:?}")]
    NotFound(String),
}

/// The automation primitives the passes rely on. A page is a single
/// shared tab, so implementors take `&mut self`.
#[async_trait(?Send)]
pub trait Browser {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Number of elements matching `selector` right now.
    async fn count(&mut self, selector: &str) -> Result<usize>;

    /// Current DOM serialised as HTML.
    async fn snapshot(&mut self) -> Result<String>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let start = tokio::time::Instant::now();
        loop {
            if self.count(selector).await? > 0 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(BrowserError::WaitTimeout {
                    selector: selector.to_string(),
                    timeout,
                }
                .into());
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted in-memory page used by pass tests.

    use std::collections::HashMap;
    use std::time::Duration;

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use scraper::{Html, Selector};

    use super::{Browser, BrowserError, WaitPolicy};

    /// A site is a set of URLs, each a sequence of DOM states. Clicking a
    /// selector listed in `advance_on` moves the current URL to its next
    /// state.
    #[derive(Default)]
    pub struct FakeBrowser {
        pages: HashMap<String, Vec<String>>,
        advance_on: Vec<String>,
        hang_on: Vec<String>,
        fail_count_on: Vec<String>,
        fail_click_after: Option<usize>,
        navigate_delay: Duration,
        current: Option<(String, usize)>,
        pub clicks: usize,
        pub visited: Vec<String>,
    }

    impl FakeBrowser {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, states: &[&str]) -> Self {
            self.pages
                .insert(url.to_string(), states.iter().map(|s| s.to_string()).collect());
            self
        }

        pub fn advance_on(mut self, selector: &str) -> Self {
            self.advance_on.push(selector.to_string());
            self
        }

        /// Navigation to this URL never completes.
        pub fn hang_on(mut self, url: &str) -> Self {
            self.hang_on.push(url.to_string());
            self
        }

        /// Counting this selector reports a DOM error.
        pub fn fail_count_on(mut self, selector: &str) -> Self {
            self.fail_count_on.push(selector.to_string());
            self
        }

        pub fn fail_click_after(mut self, clicks: usize) -> Self {
            self.fail_click_after = Some(clicks);
            self
        }

        pub fn navigate_delay(mut self, delay: Duration) -> Self {
            self.navigate_delay = delay;
            self
        }

        fn html(&self) -> Result<&str> {
            let (url, state) = self.current.as_ref().ok_or_else(|| anyhow!("no page loaded"))?;
            let states = &self.pages[url];
            Ok(&states[(*state).min(states.len() - 1)])
        }
    }

    #[async_trait(?Send)]
    impl Browser for FakeBrowser {
        async fn navigate(&mut self, url: &str, _wait: WaitPolicy) -> Result<()> {
            self.visited.push(url.to_string());
            if self.hang_on.iter().any(|u| u == url) {
                std::future::pending::<()>().await;
            }
            if !self.navigate_delay.is_zero() {
                tokio::time::sleep(self.navigate_delay).await;
            }
            if !self.pages.contains_key(url) {
                bail!("net::ERR_NAME_NOT_RESOLVED at {}", url);
            }
            self.current = Some((url.to_string(), 0));
            Ok(())
        }

        async fn click(&mut self, selector: &str) -> Result<()> {
            if self.count(selector).await? == 0 {
                return Err(BrowserError::NotFound(selector.to_string()).into());
            }
            if let Some(limit) = self.fail_click_after {
                if self.clicks >= limit {
                    bail!("Node is detached from document");
                }
            }
            self.clicks += 1;
            if self.advance_on.iter().any(|s| s == selector) {
                if let Some((_, state)) = self.current.as_mut() {
                    *state += 1;
                }
            }
            Ok(())
        }

        async fn count(&mut self, selector: &str) -> Result<usize> {
            if self.fail_count_on.iter().any(|s| s == selector) {
                bail!("Execution context was destroyed");
            }
            let sel = Selector::parse(selector).map_err(|e| anyhow!("{:?}", e))?;
            let doc = Html::parse_document(self.html()?);
            let n = doc.select(&sel).count();
            Ok(n)
        }

        async fn snapshot(&mut self) -> Result<String> {
            Ok(self.html()?.to_string())
        }
    }
}
