//! AutoTuner: periodically re-learns notification thresholds from historical
//! outcomes. Failures here are never fatal — the orchestrator keeps running
//! on the previous configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::TUNER_INTERVAL_SECS;
use crate::error::Result;
use crate::params::{ParamKey, ParamStore};
use crate::store::Store;

/// Temperature a deal must eventually reach to count as a winner.
const WINNER_TEMP: f64 = 200.0;
/// Minimum qualifying deals before the threshold is allowed to move.
const MIN_SAMPLE: usize = 10;
/// Safeguard clamp for the learned viral threshold.
const THRESHOLD_MIN: f64 = 10.0;
const THRESHOLD_MAX: f64 = 500.0;
/// Deals first observed more recently than this are still mid-flight and
/// excluded from every dataset.
const DATASET_MIN_AGE_SECS: i64 = 6 * 3600;

const CHECKPOINTS_MIN: [u32; 3] = [15, 30, 60];
const TEMP_FLOORS: [f64; 3] = [20.0, 30.0, 50.0];

/// One cell of the golden-ratio report: of the deals that had reached
/// `floor`° by `checkpoint_min`, how many eventually went big.
#[derive(Debug, Clone, Copy)]
pub struct GoldenCell {
    pub checkpoint_min: u32,
    pub floor: f64,
    pub candidates: usize,
    pub reached_200: usize,
    pub reached_500: usize,
}

impl GoldenCell {
    pub fn ratio_200(&self) -> f64 {
        ratio(self.reached_200, self.candidates)
    }

    pub fn ratio_500(&self) -> f64 {
        ratio(self.reached_500, self.candidates)
    }
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { hits as f64 / total as f64 }
}

/// What one optimization pass computed. Informational except for
/// `viral_threshold`, which is also written to config when present.
#[derive(Debug)]
pub struct TuneReport {
    pub winner_sample: usize,
    pub viral_threshold: Option<f64>,
    pub golden: Vec<GoldenCell>,
    pub velocity_percentiles: Option<[f64; 3]>,
}

pub struct AutoTuner {
    store: Store,
    params: ParamStore,
    clock: Arc<dyn Clock>,
}

impl AutoTuner {
    pub fn new(store: Store, params: ParamStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, params, clock }
    }

    /// Optimize once at startup, then every `TUNER_INTERVAL_SECS` until
    /// shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.tune().await {
                Ok(report) => info!(
                    winners = report.winner_sample,
                    threshold = report.viral_threshold,
                    "AutoTuner pass complete"
                ),
                Err(e) => error!("AutoTuner pass failed (config unchanged): {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(TUNER_INTERVAL_SECS)) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    pub async fn tune(&self) -> Result<TuneReport> {
        let older_than = self.clock.now_ts() - DATASET_MIN_AGE_SECS;

        // --- viral_threshold: 20th percentile of earliest scores on winners.
        // Taking P20 means the threshold still captures 80% of deals that
        // eventually went past 200°.
        let mut earliest = self.store.earliest_winner_scores(WINNER_TEMP, older_than).await?;
        let winner_sample = earliest.len();
        let viral_threshold = if winner_sample >= MIN_SAMPLE {
            earliest.sort_by(|a, b| a.total_cmp(b));
            let p20 = percentile(&earliest, 0.2);
            let clamped = p20.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
            self.params.set(ParamKey::ViralThreshold, clamped).await?;
            info!(
                sample = winner_sample,
                p20,
                threshold = clamped,
                "viral_threshold re-learned from winner history"
            );
            Some(clamped)
        } else {
            warn!(
                sample = winner_sample,
                required = MIN_SAMPLE,
                "not enough qualifying winners, keeping viral_threshold"
            );
            None
        };

        // --- Golden-ratio report: reported, never applied.
        let golden = self.golden_report(older_than).await?;
        for cell in &golden {
            info!(
                checkpoint_min = cell.checkpoint_min,
                floor = cell.floor,
                candidates = cell.candidates,
                reached_200 = cell.reached_200,
                reached_500 = cell.reached_500,
                p_200 = cell.ratio_200(),
                p_500 = cell.ratio_500(),
                "golden ratio"
            );
        }

        // --- Legacy velocity percentiles for external consumers.
        let mut velocities = self.store.winner_velocities(WINNER_TEMP, older_than).await?;
        let velocity_percentiles = if velocities.is_empty() {
            None
        } else {
            velocities.sort_by(|a, b| a.total_cmp(b));
            let ps = [
                percentile(&velocities, 0.50),
                percentile(&velocities, 0.80),
                percentile(&velocities, 0.95),
            ];
            self.params.set(ParamKey::VelocityP50, ps[0]).await?;
            self.params.set(ParamKey::VelocityP80, ps[1]).await?;
            self.params.set(ParamKey::VelocityP95, ps[2]).await?;
            Some(ps)
        };

        Ok(TuneReport { winner_sample, viral_threshold, golden, velocity_percentiles })
    }

    async fn golden_report(&self, older_than: i64) -> Result<Vec<GoldenCell>> {
        let aggs = self.store.checkpoint_aggregates(older_than).await?;
        let mut cells = Vec::with_capacity(CHECKPOINTS_MIN.len() * TEMP_FLOORS.len());

        for checkpoint_min in CHECKPOINTS_MIN {
            for floor in TEMP_FLOORS {
                let mut cell = GoldenCell {
                    checkpoint_min,
                    floor,
                    candidates: 0,
                    reached_200: 0,
                    reached_500: 0,
                };
                for agg in &aggs {
                    let at_checkpoint = match checkpoint_min {
                        15 => agg.temp_15m,
                        30 => agg.temp_30m,
                        _ => agg.temp_60m,
                    };
                    let Some(temp) = at_checkpoint else { continue };
                    if temp < floor {
                        continue;
                    }
                    cell.candidates += 1;
                    if agg.max_temp >= 200.0 {
                        cell.reached_200 += 1;
                    }
                    if agg.max_temp >= 500.0 {
                        cell.reached_500 += 1;
                    }
                }
                cells.push(cell);
            }
        }
        Ok(cells)
    }
}

/// Percentile over sorted data with linear interpolation between ranks.
/// `p` in [0, 1].
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{utc, FixedClock};
    use crate::store::test_support::{memory_pool, observation, raw_deal};

    #[test]
    fn percentile_interpolates_between_ranks() {
        let data: Vec<f64> = (1..=10).map(f64::from).collect();
        assert!((percentile(&data, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&data, 1.0) - 10.0).abs() < 1e-9);
        assert!((percentile(&data, 0.5) - 5.5).abs() < 1e-9);
        // rank 0.2 * 9 = 1.8 → between 2 and 3.
        assert!((percentile(&data, 0.2) - 2.8).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.0], 0.9), 7.0);
    }

    async fn tuner_fixture() -> (AutoTuner, ParamStore) {
        let pool = memory_pool().await;
        let store = Store::new(pool.clone());
        let params = ParamStore::new(pool);
        // "Now" is far enough ahead that every seeded row is > 6h old.
        let clock = std::sync::Arc::new(FixedClock(utc(100_000)));
        (AutoTuner::new(store.clone(), params.clone(), clock), params)
    }

    #[tokio::test]
    async fn threshold_is_p20_of_earliest_winner_scores() {
        let (tuner, params) = tuner_fixture().await;

        // 20 winners; earliest viral scores 10, 20, ..., 200.
        for i in 1..=20_i64 {
            let deal = raw_deal(&format!("https://promo.mx/ofertas/w-{i}"), 250.0, 0);
            let early = observation(30.0, (i * 10) as f64);
            tuner.store.record_observation(&deal, &early, i).await.unwrap();
            let late = observation(250.0, 80.0);
            tuner.store.record_observation(&deal, &late, 1_000 + i).await.unwrap();
        }

        let report = tuner.tune().await.unwrap();
        assert_eq!(report.winner_sample, 20);

        // sorted earliest scores: rank 0.2 * 19 = 3.8 → 40 + 0.8 * 10 = 48.
        let expected = 48.0;
        let got = report.viral_threshold.expect("threshold retuned");
        assert!((got - expected).abs() < 1e-6);
        let stored = params.get(ParamKey::ViralThreshold).await.unwrap();
        assert!((stored - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn too_few_winners_leaves_threshold_unchanged() {
        let (tuner, params) = tuner_fixture().await;

        for i in 1..=5_i64 {
            let deal = raw_deal(&format!("https://promo.mx/ofertas/few-{i}"), 250.0, 0);
            tuner.store.record_observation(&deal, &observation(250.0, 90.0), i).await.unwrap();
        }

        let report = tuner.tune().await.unwrap();
        assert!(report.viral_threshold.is_none());
        let stored = params.get(ParamKey::ViralThreshold).await.unwrap();
        assert_eq!(stored, ParamKey::ViralThreshold.seed_default());
    }

    #[tokio::test]
    async fn learned_threshold_is_clamped() {
        let (tuner, _params) = tuner_fixture().await;

        // Every earliest score tiny → raw P20 below the floor.
        for i in 1..=12_i64 {
            let deal = raw_deal(&format!("https://promo.mx/ofertas/tiny-{i}"), 250.0, 0);
            tuner.store.record_observation(&deal, &observation(30.0, 1.0), i).await.unwrap();
            tuner.store.record_observation(&deal, &observation(250.0, 80.0), 1_000 + i).await.unwrap();
        }

        let report = tuner.tune().await.unwrap();
        assert_eq!(report.viral_threshold, Some(THRESHOLD_MIN));
    }

    #[tokio::test]
    async fn golden_report_counts_checkpoint_cohorts() {
        let (tuner, _params) = tuner_fixture().await;

        // 4 deals hot at 30 min (observation helper stamps h = 0.5),
        // 2 of which finish past 200°.
        for i in 1..=4_i64 {
            let max = if i <= 2 { 250.0 } else { 90.0 };
            let deal = raw_deal(&format!("https://promo.mx/ofertas/g-{i}"), max, 0);
            tuner.store.record_observation(&deal, &observation(60.0, 10.0), i).await.unwrap();
            tuner.store.record_observation(&deal, &observation(max, 20.0), 1_000 + i).await.unwrap();
        }

        let report = tuner.tune().await.unwrap();
        assert_eq!(report.golden.len(), 9);

        let cell = report
            .golden
            .iter()
            .find(|c| c.checkpoint_min == 30 && c.floor == 50.0)
            .unwrap();
        assert_eq!(cell.candidates, 4);
        assert_eq!(cell.reached_200, 2);
        assert_eq!(cell.reached_500, 0);
        assert!((cell.ratio_200() - 0.5).abs() < 1e-9);

        // No deal has a row inside 15 minutes, so those cohorts are empty.
        let cell_15 = report
            .golden
            .iter()
            .find(|c| c.checkpoint_min == 15 && c.floor == 20.0)
            .unwrap();
        assert_eq!(cell_15.candidates, 0);
    }

    #[tokio::test]
    async fn velocity_percentiles_are_written_for_external_consumers() {
        let (tuner, params) = tuner_fixture().await;

        for i in 1..=10_i64 {
            let deal = raw_deal(&format!("https://promo.mx/ofertas/v-{i}"), 250.0, 0);
            let mut obs = observation(250.0, 50.0);
            obs.velocity = i as f64; // 1..=10 °/min
            tuner.store.record_observation(&deal, &obs, i).await.unwrap();
        }

        tuner.tune().await.unwrap();
        let p50 = params.get(ParamKey::VelocityP50).await.unwrap();
        let p95 = params.get(ParamKey::VelocityP95).await.unwrap();
        assert!((p50 - 5.5).abs() < 1e-6);
        assert!((p95 - 9.55).abs() < 1e-6);
    }
}
