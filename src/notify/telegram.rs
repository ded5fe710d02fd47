//! Telegram transport for the notifier port.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::OUTBOUND_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::notify::{Message, Notifier};

/// Telegram caps captions at 1024 chars and plain messages at 4096.
const CAPTION_MAX: usize = 1024;
const TEXT_MAX: usize = 4096;

pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    reply_markup: serde_json::Value,
}

#[derive(Serialize)]
struct SendPhotoRequest<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: String,
    parse_mode: &'static str,
    reply_markup: serde_json::Value,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(OUTBOUND_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    fn action_button(url: &str) -> serde_json::Value {
        serde_json::json!({
            "inline_keyboard": [[{ "text": "Ver Oferta", "url": url }]]
        })
    }

    async fn post<T: Serialize>(&self, method: &str, payload: &T) -> Result<()> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self.http.post(&url).json(payload).send().await?;

        if resp.status().is_client_error() {
            // Blocked bot, unknown chat, bad markup: retrying won't help.
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Notify(format!("{method} returned {status}: {body}")));
        }
        resp.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient_id: &str, message: &Message) -> Result<()> {
        match message.image_url.as_deref().filter(|u| u.starts_with("http")) {
            Some(photo) => {
                let payload = SendPhotoRequest {
                    chat_id: recipient_id,
                    photo,
                    caption: clip(&message.text, CAPTION_MAX),
                    parse_mode: "HTML",
                    reply_markup: Self::action_button(&message.action_url),
                };
                self.post("sendPhoto", &payload).await?;
            }
            None => {
                let payload = SendMessageRequest {
                    chat_id: recipient_id,
                    text: clip(&message.text, TEXT_MAX),
                    parse_mode: "HTML",
                    disable_web_page_preview: true,
                    reply_markup: Self::action_button(&message.action_url),
                };
                self.post("sendMessage", &payload).await?;
            }
        }
        debug!(recipient_id, "telegram message delivered");
        Ok(())
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max - 3).collect();
    format!("{cut}...")
}
