pub mod listing;
pub mod owners;
pub mod registry;
pub mod schedule;

use anyhow::Result;
use rusqlite::Connection;

use crate::browser::Browser;
use crate::config::Settings;
use crate::runner::PassSummary;

/// Handles shared by every pass of one run. The caller owns the store
/// connection and the browser and releases both when the run ends.
pub struct Pipeline<'a> {
    pub conn: &'a Connection,
    pub settings: &'a Settings,
    pub limit: Option<usize>,
}

impl Pipeline<'_> {
    pub async fn listing<B: Browser + ?Sized>(&self, browser: &mut B) -> Result<listing::ListingSummary> {
        let seeds = crate::seeds::load(&self.settings.seeds_path)?;
        let summary = listing::run(browser, self.conn, &seeds, self.settings).await?;
        summary.print();
        Ok(summary)
    }

    pub async fn registry<B: Browser + ?Sized>(&self, browser: &mut B) -> Result<PassSummary> {
        let summary = registry::run(browser, self.conn, self.settings, self.limit).await?;
        summary.print("Registry ids");
        Ok(summary)
    }

    pub async fn owners(&self) -> Result<owners::OwnersSummary> {
        let summary = owners::run_with_brasilapi(self.conn, self.settings, self.limit).await?;
        summary.print();
        Ok(summary)
    }

    pub async fn schedule<B: Browser + ?Sized>(&self, browser: &mut B) -> Result<PassSummary> {
        let summary = schedule::run(browser, self.conn, self.settings, self.limit).await?;
        summary.print("Schedules");
        Ok(summary)
    }
}
