//! Snapshot store: deals, their append-only temperature history, and the
//! queries the AutoTuner and read API run over them. All per-deal mutations
//! carry their transaction boundary explicitly.

pub mod models;

use sqlx::SqlitePool;

use crate::error::Result;
use crate::scorer::PriorSnapshot;
use crate::types::{RawDeal, ScoredObservation};
use models::{CheckpointAggRow, HistoryRow, HotDealRow};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert the deal and append its history row in one transaction: either
    /// both land or neither does. Returns the deal id and the
    /// `max_rating_notified` as of this cycle (read inside the same
    /// transaction, so the gate sees a consistent value).
    pub async fn record_observation(
        &self,
        raw: &RawDeal,
        obs: &ScoredObservation,
        observed_at: i64,
    ) -> Result<(i64, u8)> {
        let mut tx = self.pool.begin().await?;

        let (deal_id, max_rating) = sqlx::query_as::<_, (i64, i64)>(
            "INSERT INTO deals \
               (url, title, merchant, image_url, price, discount, coupon, description, \
                published_at, expired, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(url) DO UPDATE SET \
               title = excluded.title, \
               merchant = excluded.merchant, \
               image_url = excluded.image_url, \
               price = excluded.price, \
               discount = excluded.discount, \
               coupon = excluded.coupon, \
               description = excluded.description, \
               expired = excluded.expired, \
               updated_at = excluded.updated_at \
             RETURNING id, max_rating_notified",
        )
        .bind(&raw.url)
        .bind(&raw.title)
        .bind(&raw.merchant)
        .bind(&raw.image_url)
        .bind(&raw.price)
        .bind(&raw.discount)
        .bind(&raw.coupon)
        .bind(&raw.description)
        .bind(raw.published_at)
        .bind(i64::from(raw.expired))
        .bind(observed_at)
        .bind(observed_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO deal_history \
               (deal_id, observed_at, temperature, hours_since_published, velocity, \
                viral_score, final_score) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(deal_id)
        .bind(observed_at)
        .bind(obs.temperature)
        .bind(obs.hours_since_published)
        .bind(obs.velocity)
        .bind(obs.viral_score)
        .bind(obs.final_score)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((deal_id, max_rating.clamp(0, 4) as u8))
    }

    /// Most recent history row strictly before `before`, by deal URL.
    pub async fn prior_snapshot(&self, url: &str, before: i64) -> Result<Option<PriorSnapshot>> {
        let row = sqlx::query_as::<_, (f64, f64, i64)>(
            "SELECT h.temperature, h.velocity, h.observed_at \
             FROM deal_history h \
             JOIN deals d ON d.id = h.deal_id \
             WHERE d.url = ? AND h.observed_at < ? \
             ORDER BY h.observed_at DESC \
             LIMIT 1",
        )
        .bind(url)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(temperature, velocity, observed_at)| PriorSnapshot {
            temperature,
            velocity,
            observed_at,
        }))
    }

    /// Raise `max_rating_notified` to `rating`. The guard makes the value
    /// monotone: concurrent or replayed calls can never lower it.
    pub async fn confirm_notified(&self, deal_id: i64, rating: u8) -> Result<()> {
        sqlx::query(
            "UPDATE deals SET max_rating_notified = ? \
             WHERE id = ? AND max_rating_notified < ?",
        )
        .bind(i64::from(rating))
        .bind(deal_id)
        .bind(i64::from(rating))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // AutoTuner datasets. All restrict to deals first observed at or before
    // `older_than` so a half-tracked lifetime never skews the percentiles.
    // -----------------------------------------------------------------------

    /// Earliest viral_score observed on each deal whose temperature ever
    /// reached `min_temp`.
    pub async fn earliest_winner_scores(&self, min_temp: f64, older_than: i64) -> Result<Vec<f64>> {
        let rows = sqlx::query_scalar::<_, f64>(
            "SELECT viral_score FROM ( \
               SELECT h.viral_score, \
                      ROW_NUMBER() OVER (PARTITION BY h.deal_id ORDER BY h.observed_at ASC) AS rn \
               FROM deal_history h \
               WHERE h.deal_id IN ( \
                 SELECT deal_id FROM deal_history \
                 GROUP BY deal_id \
                 HAVING MAX(temperature) >= ? AND MIN(observed_at) <= ? \
               ) \
             ) WHERE rn = 1",
        )
        .bind(min_temp)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All positive linear velocities recorded on winner deals.
    pub async fn winner_velocities(&self, min_temp: f64, older_than: i64) -> Result<Vec<f64>> {
        let rows = sqlx::query_scalar::<_, f64>(
            "SELECT velocity FROM deal_history \
             WHERE velocity > 0 AND deal_id IN ( \
               SELECT deal_id FROM deal_history \
               GROUP BY deal_id \
               HAVING MAX(temperature) >= ? AND MIN(observed_at) <= ? \
             )",
        )
        .bind(min_temp)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Per-deal peak temperatures overall and inside each early checkpoint.
    pub async fn checkpoint_aggregates(&self, older_than: i64) -> Result<Vec<CheckpointAggRow>> {
        let rows = sqlx::query_as::<_, CheckpointAggRow>(
            "SELECT deal_id, \
                    MAX(temperature) AS max_temp, \
                    MAX(CASE WHEN hours_since_published <= 0.25 THEN temperature END) AS temp_15m, \
                    MAX(CASE WHEN hours_since_published <= 0.5  THEN temperature END) AS temp_30m, \
                    MAX(CASE WHEN hours_since_published <= 1.0  THEN temperature END) AS temp_60m \
             FROM deal_history \
             GROUP BY deal_id \
             HAVING MIN(observed_at) <= ?",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Read API
    // -----------------------------------------------------------------------

    /// Deals that have been notified at least once, with their latest
    /// snapshot, hottest first.
    pub async fn hot_deals(&self, limit: i64) -> Result<Vec<HotDealRow>> {
        let rows = sqlx::query_as::<_, HotDealRow>(
            "SELECT d.url, d.title, d.merchant, d.max_rating_notified, \
                    h.temperature, h.final_score, h.observed_at \
             FROM deals d \
             JOIN deal_history h ON h.deal_id = d.id \
             WHERE d.max_rating_notified >= 1 \
               AND h.id = (SELECT id FROM deal_history \
                           WHERE deal_id = d.id ORDER BY observed_at DESC LIMIT 1) \
             ORDER BY h.final_score DESC \
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Full history for one deal, oldest first. Used by tests and the API.
    pub async fn history(&self, deal_id: i64) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, deal_id, observed_at, temperature, hours_since_published, \
                    velocity, viral_score, final_score \
             FROM deal_history WHERE deal_id = ? ORDER BY observed_at ASC",
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    /// Single-connection in-memory database; more connections would each get
    /// their own empty :memory: instance.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        pool
    }

    pub fn raw_deal(url: &str, temperature: f64, published_at: i64) -> crate::types::RawDeal {
        crate::types::RawDeal {
            url: url.to_string(),
            title: format!("deal {url}"),
            merchant: Some("Amazon".to_string()),
            image_url: None,
            price: Some("$999.00".to_string()),
            discount: None,
            coupon: None,
            description: Some("descripcion".to_string()),
            temperature,
            published_at,
            expired: false,
        }
    }

    pub fn observation(temperature: f64, viral_score: f64) -> crate::types::ScoredObservation {
        crate::types::ScoredObservation {
            temperature,
            hours_since_published: 0.5,
            velocity: temperature / 30.0,
            viral_score,
            final_score: viral_score,
            rating: 0,
        }
    }
}
