use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::browser::{Browser, BrowserError, WaitPolicy};
use crate::config::Settings;
use crate::db::{self, PendingPage};
use crate::runner::{self, Attempt, DeadlinePolicy, EnrichTask, PassSummary};
use crate::schedule::Schedule;
use crate::selectors::{DETAILS_BUTTON, SCHEDULE_DAYS, SCHEDULE_PANEL, SCHEDULE_TAB};

pub struct ScheduleTask<'a, B: ?Sized> {
    browser: &'a mut B,
    conn: &'a Connection,
    element_timeout: Duration,
}

#[async_trait(?Send)]
impl<B: Browser + ?Sized> EnrichTask for ScheduleTask<'_, B> {
    type Item = PendingPage;
    type Output = Schedule;

    async fn attempt(&mut self, page: &PendingPage) -> Result<Attempt<Schedule>> {
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
        self.browser.wait_for_selector(SCHEDULE_TAB, self.element_timeout).await?;
        self.browser.click(SCHEDULE_TAB).await?;
        self.browser.wait_for_selector(SCHEDULE_PANEL, self.element_timeout).await?;

        let html = self.browser.snapshot().await?;
        let rows = SCHEDULE_DAYS.extract(&html);
        let schedule = Schedule::from_rows(
            rows.iter()
                .filter_map(|r| r.found("hours").map(|hours| (r.key.as_str(), hours))),
        );

        if schedule.is_empty() {
            return Ok(Attempt::Skip(format!("no weekday rows among {} entries", rows.len())));
        }
        Ok(Attempt::Done(schedule))
    }

    fn commit(&mut self, page: &PendingPage, schedule: Schedule) -> Result<bool> {
        if db::set_schedule(self.conn, page.id, &schedule)? == 0 {
            warn!("Schedule of {} was already set", page);
            return Ok(false);
        }
        info!("Schedule saved for {}", page);
        Ok(true)
    }
}

pub async fn run<B: Browser + ?Sized>(
    browser: &mut B,
    conn: &Connection,
    settings: &Settings,
    limit: Option<usize>,
) -> Result<PassSummary> {
    let pending = db::fetch_missing_schedule(conn, limit)?;
    info!("Found {} merchants without a schedule", pending.len());
    if pending.is_empty() {
        return Ok(PassSummary::default());
    }

    let policy = DeadlinePolicy::from(&settings.schedule);
    let mut task = ScheduleTask {
        browser,
        conn,
        element_timeout: policy.element_wait(settings.browser.element_timeout()),
    };
    Ok(runner::run_pass("schedule", &mut task, pending, &policy).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::schedule::Weekday;

    const CLOSED: &str = r#"<html><body>
        <button class="merchant-details__button">Ver mais</button>
    </body></html>"#;

    const MODAL: &str = r#"<html><body>
        <button class="merchant-details__button">Ver mais</button>
        <button id="marmita-tab1-1">Horário</button>
    </body></html>"#;

    fn panel(rows: &[(&str, &str)]) -> String {
        let mut html = String::from(
            r#"<html><body><button id="marmita-tab1-1">Horário</button>
            <div class="merchant-details-schedule">"#,
        );
        for (day, hours) in rows {
            html.push_str(&format!(
                r#"<div class="merchant-details-schedule__day">
                  <span class="merchant-details-schedule__day-title-text">{}</span>
                  <span class="merchant-details-schedule__day-schedule">{}</span>
                </div>"#,
                day, hours
            ));
        }
        html.push_str("</div></body></html>");
        html
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.browser.element_timeout_ms = 1_000;
        s
    }

    #[tokio::test(start_paused = true)]
    async fn known_days_stored_and_holidays_ignored() {
        let conn = db::memory();
        db::insert_merchant(&conn, "Pizza Place", "pizza place", "https://shop.test/pizza").unwrap();
        db::insert_merchant(&conn, "Holiday", "holiday", "https://shop.test/holiday").unwrap();

        let pizza = panel(&[("Sábado", "10:00 - 23:00"), ("Feriado", "Fechado")]);
        let holiday = panel(&[("Feriado", "Fechado")]);
        let mut browser = FakeBrowser::new()
            .page("https://shop.test/pizza", &[CLOSED, MODAL, &pizza])
            .page("https://shop.test/holiday", &[CLOSED, MODAL, &holiday])
            .advance_on(DETAILS_BUTTON)
            .advance_on(SCHEDULE_TAB);

        let summary = run(&mut browser, &conn, &settings(), None).await.unwrap();
        assert_eq!(summary.selected, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);

        let row = db::fetch_by_key(&conn, "pizza place").unwrap().unwrap();
        assert_eq!(row.schedule.get(Weekday::Sat), Some("10:00 - 23:00"));
        assert_eq!(row.schedule.slots().iter().filter(|s| s.is_some()).count(), 1);

        let holiday = db::fetch_by_key(&conn, "holiday").unwrap().unwrap();
        assert!(holiday.schedule.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_tab_is_deferred_then_failed() {
        let conn = db::memory();
        db::insert_merchant(&conn, "Closed", "closed", "https://shop.test/closed").unwrap();

        // The modal opens but the schedule tab never shows up.
        let mut browser = FakeBrowser::new()
            .page("https://shop.test/closed", &[CLOSED, CLOSED])
            .advance_on(DETAILS_BUTTON);

        let summary = run(&mut browser, &conn, &settings(), None).await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(browser.visited.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_details_button_is_skipped_with_default_settings() {
        let conn = db::memory();
        db::insert_merchant(&conn, "Bare", "bare", "https://shop.test/bare").unwrap();
        let mut browser =
            FakeBrowser::new().page("https://shop.test/bare", &["<html><body></body></html>"]);

        let summary = run(&mut browser, &conn, &Settings::default(), None).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.deferred, 0);
        assert_eq!(browser.visited.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stored_schedules_are_not_revisited() {
        let conn = db::memory();
        db::insert_merchant(&conn, "Pizza Place", "pizza place", "https://shop.test/pizza").unwrap();
        let pizza = panel(&[("Domingo", "11:00 - 15:00")]);

        for expected in [1, 0] {
            let mut browser = FakeBrowser::new()
                .page("https://shop.test/pizza", &[CLOSED, MODAL, &pizza])
                .advance_on(DETAILS_BUTTON)
                .advance_on(SCHEDULE_TAB);
            let summary = run(&mut browser, &conn, &settings(), None).await.unwrap();
            assert_eq!(summary.updated, expected);
            assert_eq!(browser.visited.len(), expected);
        }
    }
}
