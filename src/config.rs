use crate::error::{AppError, Result};

pub const NEWEST_PAGE_URL: &str = "https://www.promodescuentos.com/nuevas";

/// Cycle spacing: uniform random wait in [MIN, MAX] since the last cycle's start.
pub const CYCLE_MIN_SECS: u64 = 5 * 60;
pub const CYCLE_MAX_SECS: u64 = 12 * 60;

/// Soft deadline for a single cycle. Work not yet started when it expires is
/// abandoned with a warning; in-flight per-deal units always complete.
pub const CYCLE_SOFT_DEADLINE_SECS: u64 = 4 * 60;

/// AutoTuner re-optimization interval.
pub const TUNER_INTERVAL_SECS: u64 = 6 * 3600;

/// Max concurrent per-deal persistence/scoring units within a cycle.
pub const DEAL_CONCURRENCY: usize = 8;

/// Per-call deadline for outbound HTTP (scrape page, Telegram send).
pub const OUTBOUND_TIMEOUT_SECS: u64 = 20;

/// Liveness window: /health fails once the last cycle is older than this.
pub const HEALTH_STALE_SECS: u64 = 20 * 60;

/// Consecutive failed cycles before the operator alert fires.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub api_port: u16,
    pub newest_url: String,
    pub telegram_bot_token: String,
    /// Chat IDs always included in fan-out, on top of subscribers (ADMIN_CHAT_IDS, comma-separated).
    pub admin_chat_ids: Vec<String>,
    /// Max concurrent Telegram sends during fan-out (NOTIFY_CONCURRENCY).
    pub notify_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| AppError::Config("TELEGRAM_BOT_TOKEN must be set".to_string()))?;

        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "promoradar.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            newest_url: std::env::var("NEWEST_URL").unwrap_or_else(|_| NEWEST_PAGE_URL.to_string()),
            telegram_bot_token,
            admin_chat_ids: std::env::var("ADMIN_CHAT_IDS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            notify_concurrency: std::env::var("NOTIFY_CONCURRENCY")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<usize>()
                .unwrap_or(10),
        })
    }
}
