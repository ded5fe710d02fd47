use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scraper contract
// ---------------------------------------------------------------------------

/// One listing as observed on the source site's "newest" page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeal {
    /// Canonical deal URL — the identity of the listing.
    pub url: String,
    pub title: String,
    pub merchant: Option<String>,
    pub image_url: Option<String>,
    /// Display price as published (e.g. "$1,299.00" or "Gratis").
    pub price: Option<String>,
    /// Display discount as published (e.g. "-35%").
    pub discount: Option<String>,
    pub coupon: Option<String>,
    pub description: Option<String>,
    /// Popularity signal in degrees at observation time.
    pub temperature: f64,
    /// Unix seconds.
    pub published_at: i64,
    pub expired: bool,
}

// ---------------------------------------------------------------------------
// Scoring output
// ---------------------------------------------------------------------------

/// Everything the scorer derives from one observation. Persisted as one
/// history row regardless of the gate's decision.
#[derive(Debug, Clone, Copy)]
pub struct ScoredObservation {
    pub temperature: f64,
    pub hours_since_published: f64,
    /// Linear velocity in °/minute.
    pub velocity: f64,
    pub viral_score: f64,
    pub final_score: f64,
    /// Discrete tier 0–4.
    pub rating: u8,
}

// ---------------------------------------------------------------------------
// Cycle accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub scraped: usize,
    pub persisted: usize,
    pub skipped_malformed: usize,
    /// Units queued but never started because the soft deadline expired.
    pub abandoned: usize,
    pub notified: usize,
}
