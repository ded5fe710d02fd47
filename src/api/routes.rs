use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::config::HEALTH_STALE_SECS;
use crate::error::AppError;
use crate::store::Store;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/deals/hot", get(get_hot_deals))
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_cycle_at: i64,
    pub cycles_completed: u64,
    pub consecutive_failures: u32,
}

#[derive(Deserialize)]
pub struct HotDealsQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HotDealResponse {
    pub url: String,
    pub title: String,
    pub merchant: Option<String>,
    pub rating: i64,
    pub temperature: f64,
    pub final_score: f64,
    pub observed_at: i64,
}

/// Alive as long as the orchestrator produced a cycle within the staleness
/// window; 503 otherwise so the platform restarts us.
async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    let last = state.health.last_cycle_at();
    let now = chrono::Utc::now().timestamp();
    let fresh = last > 0 && now - last < HEALTH_STALE_SECS as i64;

    let body = Json(HealthResponse {
        status: if fresh { "ok" } else { "stale" },
        last_cycle_at: last,
        cycles_completed: state.health.cycles_completed(),
        consecutive_failures: state.health.consecutive_failures(),
    });

    let code = if fresh { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, body)
}

async fn get_hot_deals(
    State(state): State<ApiState>,
    Query(params): Query<HotDealsQuery>,
) -> Result<Json<Vec<HotDealResponse>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let rows = state.store.hot_deals(limit).await?;

    let deals = rows
        .into_iter()
        .map(|r| HotDealResponse {
            url: r.url,
            title: r.title,
            merchant: r.merchant,
            rating: r.max_rating_notified,
            temperature: r.temperature,
            final_score: r.final_score,
            observed_at: r.observed_at,
        })
        .collect();

    Ok(Json(deals))
}
