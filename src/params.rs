use sqlx::SqlitePool;

use crate::error::Result;

/// Tunable parameters stored in `system_config`. Every key has a seed
/// default, so a missing row never fails a read. Keys the AutoTuner writes
/// for external consumers (`velocity_p*`) live here too; the scorer never
/// reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    ViralThreshold,
    MinSeedTemp,
    Gravity,
    ScoreTier4,
    ScoreTier3,
    ScoreTier2,
    VelocityP50,
    VelocityP80,
    VelocityP95,
}

impl ParamKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::ViralThreshold => "viral_threshold",
            ParamKey::MinSeedTemp => "min_seed_temp",
            ParamKey::Gravity => "gravity",
            ParamKey::ScoreTier4 => "score_tier_4",
            ParamKey::ScoreTier3 => "score_tier_3",
            ParamKey::ScoreTier2 => "score_tier_2",
            ParamKey::VelocityP50 => "velocity_p50",
            ParamKey::VelocityP80 => "velocity_p80",
            ParamKey::VelocityP95 => "velocity_p95",
        }
    }

    pub fn seed_default(self) -> f64 {
        match self {
            ParamKey::ViralThreshold => 50.0,
            ParamKey::MinSeedTemp => 15.0,
            ParamKey::Gravity => 1.2,
            ParamKey::ScoreTier4 => 500.0,
            ParamKey::ScoreTier3 => 200.0,
            ParamKey::ScoreTier2 => 100.0,
            ParamKey::VelocityP50 => 0.0,
            ParamKey::VelocityP80 => 0.0,
            ParamKey::VelocityP95 => 0.0,
        }
    }
}

/// One cycle's worth of scoring/gating parameters. Re-loaded at the start of
/// every cycle — never cached longer than that.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub viral_threshold: f64,
    pub min_seed_temp: f64,
    pub gravity: f64,
    pub score_tier_4: f64,
    pub score_tier_3: f64,
    pub score_tier_2: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            viral_threshold: ParamKey::ViralThreshold.seed_default(),
            min_seed_temp: ParamKey::MinSeedTemp.seed_default(),
            gravity: ParamKey::Gravity.seed_default(),
            score_tier_4: ParamKey::ScoreTier4.seed_default(),
            score_tier_3: ParamKey::ScoreTier3.seed_default(),
            score_tier_2: ParamKey::ScoreTier2.seed_default(),
        }
    }
}

/// Typed read-through accessor over the `system_config` table. Unknown keys
/// written by other tools are left alone — this store only ever upserts the
/// keys it knows about.
#[derive(Clone)]
pub struct ParamStore {
    pool: SqlitePool,
}

impl ParamStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: ParamKey) -> Result<f64> {
        let stored = sqlx::query_scalar::<_, f64>("SELECT value FROM system_config WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(stored.unwrap_or_else(|| key.seed_default()))
    }

    pub async fn set(&self, key: ParamKey, value: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_config (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Params> {
        Ok(Params {
            viral_threshold: self.get(ParamKey::ViralThreshold).await?,
            min_seed_temp: self.get(ParamKey::MinSeedTemp).await?,
            gravity: self.get(ParamKey::Gravity).await?,
            score_tier_4: self.get(ParamKey::ScoreTier4).await?,
            score_tier_3: self.get(ParamKey::ScoreTier3).await?,
            score_tier_2: self.get(ParamKey::ScoreTier2).await?,
        })
    }
}
