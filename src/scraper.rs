//! Scraper port and the promodescuentos HTTP adapter. The pipeline only
//! depends on the `Scraper` trait; everything below it is replaceable.
//!
//! The listing page embeds each card's data as JSON in `data-vue3`
//! attributes, so extraction is regex + serde_json over the raw HTML rather
//! than DOM traversal.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::types::RawDeal;

#[async_trait]
pub trait Scraper: Send + Sync + 'static {
    /// Current listings on the "newest" page, malformed records already
    /// dropped. Transient fetch failures are retried internally once.
    async fn fetch_newest(&self) -> Result<Vec<RawDeal>>;
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

const DEAL_BASE_URL: &str = "https://www.promodescuentos.com/ofertas";
const IMAGE_BASE_URL: &str = "https://static.promodescuentos.com";

/// Fallback age when a card carries no publish timestamp: old enough that
/// gravity decay buries it instead of letting it spike as brand new.
const UNKNOWN_AGE_SECS: i64 = 999 * 3600;

pub struct HttpScraper {
    http: reqwest::Client,
    newest_url: String,
}

impl HttpScraper {
    pub fn new(newest_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(crate::config::OUTBOUND_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { http, newest_url })
    }

    /// One attempt plus one jittered retry on network/server errors. Client
    /// errors (blocked, page gone) are final — retrying won't change them.
    async fn fetch_page(&self) -> Result<String> {
        for attempt in 0..2 {
            let ua = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0]);

            let result = self
                .http
                .get(&self.newest_url)
                .header("User-Agent", ua)
                .header("Accept-Language", "es-MX,es;q=0.9,en;q=0.7")
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(AppError::Scrape(format!(
                        "{} returned {}",
                        self.newest_url,
                        resp.status()
                    )));
                }
                Ok(resp) => warn!(status = %resp.status(), "server error fetching newest page"),
                Err(e) => warn!("network error fetching newest page: {e}"),
            }

            if attempt == 0 {
                let backoff_ms = 1_000 + (rand::random::<f64>() * 1_000.0) as u64;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
        Err(AppError::Scrape(format!("{} unreachable after retry", self.newest_url)))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch_newest(&self) -> Result<Vec<RawDeal>> {
        let html = self.fetch_page().await?;
        let now_ts = chrono::Utc::now().timestamp();
        let (deals, skipped) = parse_newest_page(&html, now_ts);
        info!(parsed = deals.len(), skipped, "newest page scraped");
        Ok(deals)
    }
}

/// Extract every deal card from the listing HTML. Returns the parsed deals
/// (deduplicated by URL, page order preserved) and the count of skipped
/// malformed cards.
pub fn parse_newest_page(html: &str, now_ts: i64) -> (Vec<RawDeal>, usize) {
    // Attribute values are entity-escaped, so `"` cannot occur inside.
    let attr_re = Regex::new(r#"data-vue3="([^"]*)""#).expect("valid data-vue3 regex");

    let mut deals = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut skipped = 0;

    for cap in attr_re.captures_iter(html) {
        let raw = unescape_attr(cap.get(1).map_or("", |m| m.as_str()));
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if value.get("name").and_then(Value::as_str) != Some("ThreadMainListItemNormalizer") {
            continue;
        }
        let Some(thread) = value.pointer("/props/thread") else {
            continue;
        };

        match parse_thread(thread, now_ts) {
            Some(deal) => {
                if seen.insert(deal.url.clone()) {
                    deals.push(deal);
                }
            }
            None => {
                skipped += 1;
                let excerpt: String = raw.chars().take(200).collect();
                warn!(payload = %excerpt, "skipping malformed deal card");
            }
        }
    }

    (deals, skipped)
}

/// A card without a URL or temperature is unusable; anything else degrades
/// gracefully to None fields.
fn parse_thread(thread: &Value, now_ts: i64) -> Option<RawDeal> {
    let url = thread_url(thread)?;
    let temperature = number_field(thread, "temperature")?;
    if !temperature.is_finite() || temperature < 0.0 {
        return None;
    }
    let title = thread.get("title").and_then(Value::as_str)?.trim().to_string();

    let published_at = thread
        .get("publishedAt")
        .and_then(value_as_i64)
        .unwrap_or(now_ts - UNKNOWN_AGE_SECS);

    Some(RawDeal {
        url,
        title,
        merchant: merchant_name(thread),
        image_url: image_url(thread),
        price: price_display(thread),
        discount: discount_display(thread),
        coupon: thread
            .get("voucherCode")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        description: thread
            .get("description")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        temperature,
        published_at,
        expired: thread.get("isExpired").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn thread_url(thread: &Value) -> Option<String> {
    let slug = thread.get("titleSlug").and_then(Value::as_str);
    let id = thread.get("threadId").and_then(value_as_i64);
    if let (Some(slug), Some(id)) = (slug, id) {
        return Some(format!("{DEAL_BASE_URL}/{slug}-{id}"));
    }
    thread
        .get("shareableLink")
        .or_else(|| thread.get("link"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn merchant_name(thread: &Value) -> Option<String> {
    if let Some(m) = thread.get("merchant") {
        if let Some(name) = m.get("merchantName").or_else(|| m.get("name")).and_then(Value::as_str) {
            return Some(name.to_string());
        }
        if let Some(name) = m.as_str() {
            return Some(name.to_string());
        }
    }
    thread
        .get("merchantName")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn price_display(thread: &Value) -> Option<String> {
    if let Some(price) = number_field(thread, "price") {
        if price > 0.0 {
            return Some(format!("${price:.2}"));
        }
        return Some("Gratis".to_string());
    }
    thread
        .get("priceDisplay")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn discount_display(thread: &Value) -> Option<String> {
    let v = thread.get("discountPercentage")?;
    if let Some(s) = v.as_str() {
        return Some(if s.contains('%') { s.to_string() } else { format!("{s}%") });
    }
    v.as_f64().map(|n| format!("-{:.0}%", n.abs()))
}

fn image_url(thread: &Value) -> Option<String> {
    let image = thread.get("mainImage")?;
    let path = image.get("path").and_then(Value::as_str)?;
    let name = image.get("name").and_then(Value::as_str)?;
    Some(format!("{IMAGE_BASE_URL}/{path}/{name}.jpg"))
}

fn number_field(thread: &Value, key: &str) -> Option<f64> {
    let v = thread.get(key)?;
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn value_as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Minimal HTML attribute unescaping — the handful of entities the site
/// actually emits inside `data-vue3`.
fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(props: &str) -> String {
        let json = format!(
            r#"{{"name":"ThreadMainListItemNormalizer","props":{{"thread":{props}}}}}"#
        );
        let escaped = json.replace('&', "&amp;").replace('"', "&quot;");
        format!(r#"<div class="js-vue3" data-vue3="{escaped}"></div>"#)
    }

    #[test]
    fn parses_a_complete_card() {
        let html = card(
            r#"{"threadId":987654,"titleSlug":"audifonos-sony","title":"Audífonos Sony",
                "temperature":82.5,"publishedAt":1700000000,
                "merchant":{"merchantName":"Amazon"},
                "price":1299.0,"discountPercentage":35,
                "mainImage":{"path":"threads/raw","name":"abc123"},
                "voucherCode":"HOT35","isExpired":false}"#,
        );
        let (deals, skipped) = parse_newest_page(&html, 1700003600);
        assert_eq!(skipped, 0);
        assert_eq!(deals.len(), 1);

        let d = &deals[0];
        assert_eq!(d.url, "https://www.promodescuentos.com/ofertas/audifonos-sony-987654");
        assert_eq!(d.title, "Audífonos Sony");
        assert_eq!(d.temperature, 82.5);
        assert_eq!(d.published_at, 1_700_000_000);
        assert_eq!(d.merchant.as_deref(), Some("Amazon"));
        assert_eq!(d.price.as_deref(), Some("$1299.00"));
        assert_eq!(d.discount.as_deref(), Some("-35%"));
        assert_eq!(d.coupon.as_deref(), Some("HOT35"));
        assert_eq!(
            d.image_url.as_deref(),
            Some("https://static.promodescuentos.com/threads/raw/abc123.jpg")
        );
        assert!(!d.expired);
    }

    #[test]
    fn missing_temperature_is_malformed() {
        let html = card(r#"{"threadId":1,"titleSlug":"x","title":"X","publishedAt":100}"#);
        let (deals, skipped) = parse_newest_page(&html, 1_000);
        assert!(deals.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn missing_url_parts_fall_back_to_link_then_malformed() {
        let with_link = card(
            r#"{"title":"Y","temperature":20.0,"publishedAt":100,
                "shareableLink":"https://www.promodescuentos.com/share/55"}"#,
        );
        let (deals, _) = parse_newest_page(&with_link, 1_000);
        assert_eq!(deals[0].url, "https://www.promodescuentos.com/share/55");

        let without = card(r#"{"title":"Z","temperature":20.0,"publishedAt":100}"#);
        let (deals, skipped) = parse_newest_page(&without, 1_000);
        assert!(deals.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn duplicate_urls_keep_first_occurrence() {
        let a = card(r#"{"threadId":7,"titleSlug":"dup","title":"A","temperature":30.0,"publishedAt":100}"#);
        let b = card(r#"{"threadId":7,"titleSlug":"dup","title":"B","temperature":40.0,"publishedAt":100}"#);
        let (deals, _) = parse_newest_page(&format!("{a}{b}"), 1_000);
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].title, "A");
    }

    #[test]
    fn unknown_publish_time_defaults_to_cold() {
        let html = card(r#"{"threadId":9,"titleSlug":"old","title":"O","temperature":50.0}"#);
        let now = 10_000_000;
        let (deals, _) = parse_newest_page(&html, now);
        assert_eq!(deals[0].published_at, now - UNKNOWN_AGE_SECS);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let html = card(
            r#"{"threadId":"11","titleSlug":"s","title":"S","temperature":"66.5","publishedAt":"1700000000"}"#,
        );
        let (deals, _) = parse_newest_page(&html, 1_700_000_600);
        assert_eq!(deals[0].temperature, 66.5);
        assert_eq!(deals[0].published_at, 1_700_000_000);
    }

    #[test]
    fn non_deal_vue_components_are_ignored() {
        let html = r#"<div data-vue3="{&quot;name&quot;:&quot;NavBar&quot;,&quot;props&quot;:{}}"></div>"#;
        let (deals, skipped) = parse_newest_page(html, 1_000);
        assert!(deals.is_empty());
        assert_eq!(skipped, 0);
    }
}
