//! Row types for sqlx typed queries.

#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub deal_id: i64,
    pub observed_at: i64,
    pub temperature: f64,
    pub hours_since_published: f64,
    pub velocity: f64,
    pub viral_score: f64,
    pub final_score: f64,
}

/// Per-deal aggregate for the golden-ratio report: peak temperature overall
/// and at each early checkpoint (NULL when no row fell inside the window).
#[derive(Debug, sqlx::FromRow)]
pub struct CheckpointAggRow {
    pub deal_id: i64,
    pub max_temp: f64,
    pub temp_15m: Option<f64>,
    pub temp_30m: Option<f64>,
    pub temp_60m: Option<f64>,
}

/// Read-model row for the `/deals/hot` endpoint.
#[derive(Debug, sqlx::FromRow)]
pub struct HotDealRow {
    pub url: String,
    pub title: String,
    pub merchant: Option<String>,
    pub max_rating_notified: i64,
    pub temperature: f64,
    pub final_score: f64,
    pub observed_at: i64,
}
