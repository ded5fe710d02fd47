//! Viral Score engine: gravity-decayed temperature, acceleration detection,
//! and traffic-of-day shaping. Pure functions — no I/O, deterministic given
//! inputs, so every stage is testable in isolation.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::Mexico_City;

use crate::params::Params;
use crate::types::ScoredObservation;

/// The most recent history row strictly before the current observation.
#[derive(Debug, Clone, Copy)]
pub struct PriorSnapshot {
    pub temperature: f64,
    /// °/minute at the prior observation.
    pub velocity: f64,
    /// Unix seconds.
    pub observed_at: i64,
}

/// Score one observation. `observed_at` is the wall clock of the current
/// cycle; traffic bucketing always uses the Mexico City local hour, not the
/// host timezone.
pub fn score(
    temperature: f64,
    hours_since_published: f64,
    prior: Option<&PriorSnapshot>,
    observed_at: DateTime<Utc>,
    params: &Params,
) -> ScoredObservation {
    let viral_score = gravity_score(temperature, hours_since_published, params.gravity);
    let velocity = linear_velocity(temperature, hours_since_published, prior, observed_at);
    let acceleration = acceleration_multiplier(velocity, prior);
    let traffic = traffic_multiplier(local_hour(observed_at));
    let final_score = viral_score * acceleration * traffic;
    let rating = rating_tier(final_score, params);

    ScoredObservation {
        temperature,
        hours_since_published,
        velocity,
        viral_score,
        final_score,
        rating,
    }
}

/// Stage 1 — Hacker-News-style gravity decay: `(t - 1) / (h + 0.1)^g`.
/// The `-1` zeroes out fresh single-vote items; the `+0.1` hours (~6 min)
/// damps division near zero so the first observation cannot dominate.
fn gravity_score(temperature: f64, hours: f64, gravity: f64) -> f64 {
    if temperature < 1.0 {
        return 0.0;
    }
    (temperature - 1.0) / (hours + 0.1).powf(gravity)
}

/// Stage 2 — linear velocity in °/minute. Without a prior snapshot the whole
/// lifetime is the window, floored at one minute.
fn linear_velocity(
    temperature: f64,
    hours_since_published: f64,
    prior: Option<&PriorSnapshot>,
    observed_at: DateTime<Utc>,
) -> f64 {
    match prior {
        Some(p) => {
            let minutes_between = (observed_at.timestamp() - p.observed_at) as f64 / 60.0;
            (temperature - p.temperature) / minutes_between.max(1.0)
        }
        None => temperature / (hours_since_published * 60.0).max(1.0),
    }
}

/// Stage 3 — second-derivative proxy. Rewards sustained acceleration,
/// ignores small wiggles, penalizes clear loss of traction.
fn acceleration_multiplier(velocity_now: f64, prior: Option<&PriorSnapshot>) -> f64 {
    let velocity_prior = match prior {
        Some(p) if p.velocity > 0.0 => p.velocity,
        _ => return 1.0,
    };
    let r = velocity_now / velocity_prior;
    if r >= 2.0 {
        2.0
    } else if r >= 1.0 {
        r
    } else if r >= 0.5 {
        1.0
    } else {
        0.5
    }
}

/// Stage 4 — traffic-of-day multiplier by Mexico City local hour.
/// Night owls (00–07) see deals hours before the morning crowd.
fn traffic_multiplier(local_hour: u32) -> f64 {
    match local_hour {
        0..=6 => 1.5,
        7..=8 => 1.2,
        9..=21 => 1.0,
        _ => 1.3,
    }
}

fn local_hour(now: DateTime<Utc>) -> u32 {
    now.with_timezone(&Mexico_City).hour()
}

/// Stage 6 — discrete tier from the configured thresholds.
fn rating_tier(final_score: f64, params: &Params) -> u8 {
    if final_score >= params.score_tier_4 {
        4
    } else if final_score >= params.score_tier_3 {
        3
    } else if final_score >= params.score_tier_2 {
        2
    } else if final_score >= params.viral_threshold {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPS: f64 = 1e-6;

    /// 2025-01-15 20:00 UTC = 14:00 in Mexico City (UTC-6, no DST since 2022).
    fn at_local_hour(hour_cdmx: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, (hour_cdmx + 6) % 24, 0, 0).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4 * b.abs().max(1.0)
    }

    #[test]
    fn early_winner_scores_tier_3() {
        // t=50 ten minutes after publication, afternoon traffic, no prior.
        let params = Params::default();
        let h = 10.0 / 60.0;
        let out = score(50.0, h, None, at_local_hour(14), &params);

        let expected_viral = 49.0 / (h + 0.1f64).powf(1.2);
        assert!(approx(out.viral_score, expected_viral));
        assert!(approx(out.final_score, expected_viral)); // acc=1.0, traffic=1.0
        assert_eq!(out.rating, 3);
    }

    #[test]
    fn late_normal_scores_tier_2() {
        let params = Params::default();
        let h = 50.0 / 60.0;
        let out = score(100.0, h, None, at_local_hour(14), &params);

        let expected_viral = 99.0 / (h + 0.1f64).powf(1.2);
        assert!(approx(out.viral_score, expected_viral));
        assert!(expected_viral >= 100.0 && expected_viral < 200.0);
        assert_eq!(out.rating, 2);
    }

    #[test]
    fn night_bonus_lifts_tier() {
        let params = Params::default();
        let h = 5.0 / 60.0;
        let out = score(30.0, h, None, at_local_hour(4), &params);

        let expected_viral = 29.0 / (h + 0.1f64).powf(1.2);
        assert!(approx(out.viral_score, expected_viral));
        assert!(approx(out.final_score, expected_viral * 1.5));
        assert_eq!(out.rating, 3);
    }

    #[test]
    fn acceleration_doubles_final_score() {
        // Prior 15 minutes ago at 20°, now 50°: velocity 2.0 vs prior 1.0.
        let params = Params::default();
        let now = at_local_hour(14);
        let prior = PriorSnapshot {
            temperature: 20.0,
            velocity: 1.0,
            observed_at: now.timestamp() - 15 * 60,
        };
        let h = 0.5;
        let out = score(50.0, h, Some(&prior), now, &params);

        assert!(approx(out.velocity, 2.0));
        let expected_viral = 49.0 / (h + 0.1f64).powf(1.2);
        assert!(approx(out.final_score, expected_viral * 2.0));
    }

    #[test]
    fn single_vote_at_birth_scores_zero() {
        let params = Params::default();
        let out = score(1.0, 0.0, None, at_local_hour(14), &params);
        assert!(out.viral_score.abs() < EPS);
        assert_eq!(out.rating, 0);
    }

    #[test]
    fn sub_one_temperature_clamps_to_zero() {
        let params = Params::default();
        let out = score(0.5, 0.2, None, at_local_hour(14), &params);
        assert!(out.viral_score.abs() < EPS);
        assert!(out.final_score.abs() < EPS);
    }

    #[test]
    fn scoring_is_deterministic() {
        let params = Params::default();
        let now = at_local_hour(10);
        let prior = PriorSnapshot { temperature: 12.0, velocity: 0.4, observed_at: now.timestamp() - 600 };
        let a = score(42.0, 0.7, Some(&prior), now, &params);
        let b = score(42.0, 0.7, Some(&prior), now, &params);
        assert_eq!(a.final_score.to_bits(), b.final_score.to_bits());
        assert_eq!(a.rating, b.rating);
    }

    #[test]
    fn velocity_without_prior_uses_lifetime_window() {
        let params = Params::default();
        // 30° after 15 minutes → 2 °/min.
        let out = score(30.0, 0.25, None, at_local_hour(14), &params);
        assert!(approx(out.velocity, 2.0));
        // Under one minute of lifetime the denominator floors at 1.
        let out = score(30.0, 0.0, None, at_local_hour(14), &params);
        assert!(approx(out.velocity, 30.0));
    }

    #[test]
    fn acceleration_piecewise_bands() {
        let prior = |v: f64| PriorSnapshot { temperature: 10.0, velocity: v, observed_at: 0 };

        // No prior, or prior with non-positive velocity → neutral.
        assert!(approx(acceleration_multiplier(3.0, None), 1.0));
        assert!(approx(acceleration_multiplier(3.0, Some(&prior(0.0))), 1.0));
        assert!(approx(acceleration_multiplier(3.0, Some(&prior(-1.0))), 1.0));

        // r >= 2 caps at 2.0.
        assert!(approx(acceleration_multiplier(2.0, Some(&prior(1.0))), 2.0));
        assert!(approx(acceleration_multiplier(5.0, Some(&prior(1.0))), 2.0));
        // 1 <= r < 2 interpolates linearly (multiplier == r).
        assert!(approx(acceleration_multiplier(1.5, Some(&prior(1.0))), 1.5));
        assert!(approx(acceleration_multiplier(1.0, Some(&prior(1.0))), 1.0));
        // Small wiggles ignored.
        assert!(approx(acceleration_multiplier(0.7, Some(&prior(1.0))), 1.0));
        assert!(approx(acceleration_multiplier(0.5, Some(&prior(1.0))), 1.0));
        // Clear loss of traction penalized.
        assert!(approx(acceleration_multiplier(0.49, Some(&prior(1.0))), 0.5));
    }

    #[test]
    fn traffic_transitions_exactly_at_hour_boundaries() {
        // 06:59:59 local is still the night band; 07:00:00 is morning.
        let before = Utc.with_ymd_and_hms(2025, 1, 15, 12, 59, 59).unwrap(); // 06:59:59 CDMX
        let after = Utc.with_ymd_and_hms(2025, 1, 15, 13, 0, 0).unwrap(); // 07:00:00 CDMX
        assert!(approx(traffic_multiplier(local_hour(before)), 1.5));
        assert!(approx(traffic_multiplier(local_hour(after)), 1.2));

        assert!(approx(traffic_multiplier(0), 1.5));
        assert!(approx(traffic_multiplier(6), 1.5));
        assert!(approx(traffic_multiplier(8), 1.2));
        assert!(approx(traffic_multiplier(9), 1.0));
        assert!(approx(traffic_multiplier(21), 1.0));
        assert!(approx(traffic_multiplier(22), 1.3));
        assert!(approx(traffic_multiplier(23), 1.3));
    }

    #[test]
    fn rating_tier_thresholds() {
        let params = Params::default();
        assert_eq!(rating_tier(49.9, &params), 0);
        assert_eq!(rating_tier(50.0, &params), 1);
        assert_eq!(rating_tier(100.0, &params), 2);
        assert_eq!(rating_tier(200.0, &params), 3);
        assert_eq!(rating_tier(500.0, &params), 4);
        assert_eq!(rating_tier(5000.0, &params), 4);
    }
}
