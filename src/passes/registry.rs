use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserError, WaitPolicy};
use crate::config::Settings;
use crate::db::{self, PendingPage};
use crate::runner::{self, Attempt, DeadlinePolicy, EnrichTask, PassSummary};
use crate::selectors::{registry_id, RegistryText, ABOUT_INFO, ABOUT_TEXTS, DETAILS_BUTTON};

/// Opens a merchant page, expands its details modal and reads the CNPJ.
pub struct RegistryTask<'a, B: ?Sized> {
    browser: &'a mut B,
    conn: &'a Connection,
    element_timeout: Duration,
}

#[async_trait(?Send)]
impl<B: Browser + ?Sized> EnrichTask for RegistryTask<'_, B> {
    type Item = PendingPage;
    type Output = String;

    async fn attempt(&mut self, page: &PendingPage) -> Result<Attempt<String>> {
        self.browser.navigate(&page.url, WaitPolicy::DocumentComplete).await?;

        if let Err(e) = self.browser.wait_for_selector(DETAILS_BUTTON, self.element_timeout).await {
            return match e.downcast_ref::<BrowserError>() {
                Some(BrowserError::WaitTimeout { .. }) => {
                    Ok(Attempt::Skip("details button not found".to_string()))
                }
                _ => Err(e),
            };
        }
        self.browser.click(DETAILS_BUTTON).await?;
        self.browser.wait_for_selector(ABOUT_INFO, self.element_timeout).await?;

        let html = self.browser.snapshot().await?;
        let texts: Vec<String> = ABOUT_TEXTS.extract(&html).into_iter().map(|r| r.key).collect();
        debug!("Info texts for {}: {:?}", page, texts);

        Ok(match registry_id(&texts) {
            RegistryText::Found(id) => Attempt::Done(id),
            RegistryText::Missing => Attempt::Skip("no CNPJ text on page".to_string()),
            RegistryText::Malformed(line) => {
                Attempt::Skip(format!("unexpected CNPJ format: {:?}", line))
            }
        })
    }

    fn commit(&mut self, page: &PendingPage, id: String) -> Result<bool> {
        if db::set_registry_id(self.conn, page.id, &id)? == 0 {
            warn!("Registry id of {} was already set", page);
            return Ok(false);
        }
        info!("CNPJ found for {}: {}", page, id);
        Ok(true)
    }
}

pub async fn run<B: Browser + ?Sized>(
    browser: &mut B,
    conn: &Connection,
    settings: &Settings,
    limit: Option<usize>,
) -> Result<PassSummary> {
    let pending = db::fetch_missing_registry(conn, limit)?;
    info!("Found {} merchants without a registry id", pending.len());
    if pending.is_empty() {
        return Ok(PassSummary::default());
    }

    let policy = DeadlinePolicy::from(&settings.registry);
    let mut task = RegistryTask {
        browser,
        conn,
        element_timeout: policy.element_wait(settings.browser.element_timeout()),
    };
    Ok(runner::run_pass("registry", &mut task, pending, &policy).await)
}
