//! Daily cooldown clear.
//!
//! Sleeps until the next occurrence of a fixed local wall-clock time in a fixed timezone, clears
//! every cooldown, and goes back to sleep. A failed clear is only logged: affected members stay on
//! cooldown until the next firing. Each local day fires at most once.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::ledger::Ledger;

#[derive(Debug)]
pub struct CooldownScheduler {
    ledger: Arc<Ledger>,
    tz: Tz,
    at: NaiveTime,
    shutdown: CancellationToken,
}

impl CooldownScheduler {
    pub fn new(ledger: Arc<Ledger>, tz: Tz, at: NaiveTime, shutdown: CancellationToken) -> Self {
        Self {
            ledger,
            tz,
            at,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn(self.run())
    }

    #[instrument(skip(self), fields(tz = %self.tz, at = %self.at))]
    pub async fn run(self) {
        tracing::info!("cooldown scheduler started");

        let mut previous = None;
        loop {
            let now = Utc::now();
            let next = self.next_after(now, previous);
            let sleep_for = (next - now).to_std().unwrap_or_default();

            tracing::info!(
                next = %next.with_timezone(&self.tz),
                minutes = sleep_for.as_secs() / 60,
                "next cooldown clear scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("cooldown scheduler received shutdown signal");
                    return;
                }
            }

            self.fire().await;
            previous = Some(next);
        }
    }

    /// Next firing after both `now` and the `previous` one.
    ///
    /// The sleep runs on the monotonic clock, so the wall clock may still read slightly before
    /// `previous` on wake-up.
    pub fn next_after(
        &self,
        now: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let from = previous.map_or(now, |prev| prev.max(now));
        next_fire(from, self.at, self.tz)
    }

    /// One firing of the hook. Never retries.
    pub async fn fire(&self) {
        match self.ledger.clear_all_cooldowns().await {
            Ok(cleared) => tracing::info!(cleared, "daily cooldown clear finished"),
            Err(e) => tracing::error!(error = ?e, "daily cooldown clear failed"),
        }
    }
}

/// First instant strictly after `now` whose local time in `tz` is `at`.
pub fn next_fire(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();

    (0..=2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .map(|date| local_instant(date, at, tz))
        .find(|instant| *instant > now)
        .unwrap_or(now + chrono::Duration::days(1))
}

/// `date` at `at` in `tz`.
///
/// A local time skipped by a DST jump resolves to the first minute that exists after the gap.
/// An ambiguous one resolves to its later reading.
fn local_instant(date: NaiveDate, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(at);
    (0..=MAX_GAP_MINUTES)
        .map(|minutes| naive + chrono::Duration::minutes(minutes))
        .find_map(|candidate| candidate.and_local_timezone(tz).latest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

const MAX_GAP_MINUTES: i64 = 24 * 60;
