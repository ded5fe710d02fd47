//! Cycle orchestrator: scrape → persist → score → gate → notify on a
//! jittered schedule. Per-deal units run concurrently under a bounded
//! semaphore; a soft deadline abandons queued work rather than letting a
//! slow cycle overlap the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::clock::Clock;
use crate::config::{
    Config, CYCLE_MAX_SECS, CYCLE_MIN_SECS, CYCLE_SOFT_DEADLINE_SECS, DEAL_CONCURRENCY,
    MAX_CONSECUTIVE_FAILURES,
};
use crate::error::Result;
use crate::gate::{self, Decision};
use crate::notify::{self, Message, Notifier};
use crate::params::{ParamStore, Params};
use crate::scorer;
use crate::scraper::Scraper;
use crate::store::Store;
use crate::subscribers::SubscriberRegistry;
use crate::types::{CycleStats, RawDeal};

/// A deal that passed the gate this cycle. `max_rating_notified` is raised
/// only after the fan-out reaches at least one recipient.
struct PendingNotification {
    deal_id: i64,
    rating: u8,
    url: String,
    message: Message,
}

pub struct Orchestrator<S, N, R> {
    scraper: S,
    notifier: Arc<N>,
    subscribers: R,
    store: Store,
    params: ParamStore,
    clock: Arc<dyn Clock>,
    health: Arc<HealthState>,
    admin_chat_ids: Vec<String>,
    notify_concurrency: usize,
    shutdown: watch::Receiver<bool>,
}

impl<S: Scraper, N: Notifier, R: SubscriberRegistry> Orchestrator<S, N, R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scraper: S,
        notifier: Arc<N>,
        subscribers: R,
        store: Store,
        params: ParamStore,
        clock: Arc<dyn Clock>,
        health: Arc<HealthState>,
        cfg: &Config,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scraper,
            notifier,
            subscribers,
            store,
            params,
            clock,
            health,
            admin_chat_ids: cfg.admin_chat_ids.clone(),
            notify_concurrency: cfg.notify_concurrency,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("orchestrator started");
        loop {
            let cycle_started = Instant::now();

            match self.run_cycle().await {
                Ok(stats) => {
                    self.health.record_cycle(self.clock.now_ts());
                    info!(
                        scraped = stats.scraped,
                        persisted = stats.persisted,
                        notified = stats.notified,
                        malformed = stats.skipped_malformed,
                        abandoned = stats.abandoned,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    let failures = self.health.record_failure();
                    error!(consecutive = failures, "cycle failed: {e}");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        error!(
                            consecutive = failures,
                            "OPERATOR ALERT: {failures} consecutive cycles failed, storage likely unavailable"
                        );
                    }
                }
            }

            // Next cycle starts a uniform-random 5–12 minutes after this one
            // *started*, so heavy cycles don't stretch the schedule.
            let spacing = rand::thread_rng().gen_range(CYCLE_MIN_SECS..=CYCLE_MAX_SECS);
            let wait = Duration::from_secs(spacing).saturating_sub(cycle_started.elapsed());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.changed() => {}
            }
            if *self.shutdown.borrow() {
                info!("shutdown requested, orchestrator exiting");
                break;
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        // Re-read tuning every cycle; also serves as the storage probe that
        // aborts the cycle early when the database is down.
        let params = self.params.load().await?;

        let deals = match self.scraper.fetch_newest().await {
            Ok(d) => d,
            Err(e) => {
                warn!("scrape failed, nothing to process this cycle: {e}");
                return Ok(stats);
            }
        };
        stats.scraped = deals.len();

        let deadline = Instant::now() + Duration::from_secs(CYCLE_SOFT_DEADLINE_SECS);
        let semaphore = Arc::new(Semaphore::new(DEAL_CONCURRENCY));
        let mut units: JoinSet<Result<Option<PendingNotification>>> = JoinSet::new();

        let mut queue = deals.into_iter();
        for deal in queue.by_ref() {
            if deal.url.is_empty() || !deal.temperature.is_finite() || deal.temperature < 0.0 {
                stats.skipped_malformed += 1;
                warn!(payload = ?deal, "skipping malformed deal record");
                continue;
            }
            if Instant::now() >= deadline {
                stats.abandoned = 1 + queue.len();
                warn!(
                    abandoned = stats.abandoned,
                    "cycle soft deadline reached, abandoning queued deals"
                );
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let store = self.store.clone();
            let now = self.clock.now();
            units.spawn(async move {
                let _permit = permit;
                process_deal(store, params, now, deal).await
            });
        }

        // In-flight units always complete, even past the deadline — a begun
        // transaction is never aborted.
        let mut pending = Vec::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(gated)) => {
                    stats.persisted += 1;
                    if let Some(notification) = gated {
                        pending.push(notification);
                    }
                }
                Ok(Err(e)) => warn!("per-deal unit failed, deal deferred to next cycle: {e}"),
                Err(e) => warn!("per-deal unit panicked: {e}"),
            }
        }

        if !pending.is_empty() {
            let recipients = self.recipient_set().await?;
            if recipients.is_empty() {
                warn!("no recipients configured, dropping {} notifications", pending.len());
            }
            for notification in pending {
                stats.notified += self.dispatch(notification, &recipients).await;
            }
        }

        Ok(stats)
    }

    /// Fan out one gated deal. The rating is only recorded once at least one
    /// recipient accepted the message, so a dead Telegram API means the deal
    /// is re-gated (and re-sent) next cycle instead of silently lost.
    async fn dispatch(&self, notification: PendingNotification, recipients: &[String]) -> usize {
        let accepted = notify::fan_out(
            Arc::clone(&self.notifier),
            recipients.to_vec(),
            Arc::new(notification.message),
            self.notify_concurrency,
        )
        .await;

        if accepted == 0 {
            warn!(url = %notification.url, "fan-out reached nobody, deal stays un-notified");
            return 0;
        }

        match self
            .store
            .confirm_notified(notification.deal_id, notification.rating)
            .await
        {
            Ok(()) => {
                info!(
                    url = %notification.url,
                    rating = notification.rating,
                    accepted,
                    "🔥 deal notified"
                );
                1
            }
            Err(e) => {
                error!(url = %notification.url, "notified but rating update failed: {e}");
                0
            }
        }
    }

    async fn recipient_set(&self) -> Result<Vec<String>> {
        let mut ids = self.subscribers.list_recipients().await?;
        for admin in &self.admin_chat_ids {
            if !ids.contains(admin) {
                ids.push(admin.clone());
            }
        }
        Ok(ids)
    }
}

/// One per-deal unit: prior lookup, scoring, transactional persist, gate.
async fn process_deal(
    store: Store,
    params: Params,
    now: DateTime<Utc>,
    deal: RawDeal,
) -> Result<Option<PendingNotification>> {
    let observed_at = now.timestamp();
    let prior = store.prior_snapshot(&deal.url, observed_at).await?;
    let hours_since_published = ((observed_at - deal.published_at) as f64 / 3600.0).max(0.0);

    let obs = scorer::score(deal.temperature, hours_since_published, prior.as_ref(), now, &params);
    let (deal_id, max_rating) = store.record_observation(&deal, &obs, observed_at).await?;

    match gate::evaluate(deal.expired, deal.temperature, obs.rating, max_rating, params.min_seed_temp) {
        Decision::Notify { rating } => {
            let message = notify::format::render(&deal, &obs);
            Ok(Some(PendingNotification { deal_id, rating, url: deal.url, message }))
        }
        Decision::Drop(reason) => {
            debug!(url = %deal.url, ?reason, rating = obs.rating, "deal gated");
            Ok(None)
        }
    }
}
