//! Renders a gated deal into the Telegram message body. Pure transform — the
//! gate decides *whether*, this module only decides *how it looks*.

use crate::types::{RawDeal, ScoredObservation};

const DESCRIPTION_MAX_CHARS: usize = 280;

/// A rendered notification, ready for any transport.
#[derive(Debug, Clone)]
pub struct Message {
    /// HTML-formatted body.
    pub text: String,
    pub image_url: Option<String>,
    /// Target for the "Ver Oferta" action button.
    pub action_url: String,
}

pub fn render(deal: &RawDeal, obs: &ScoredObservation) -> Message {
    let emoji = "🔥".repeat(usize::from(obs.rating));
    let title = escape_html(&deal.title);
    let merchant = escape_html(deal.merchant.as_deref().unwrap_or("N/D"));
    let age = age_text(obs.hours_since_published);

    let mut optional_lines = Vec::new();
    if let Some(price) = deal.price.as_deref().filter(|p| !p.is_empty() && *p != "N/D") {
        optional_lines.push(format!("<b>Precio:</b> {}", escape_html(price)));
    }
    if let Some(discount) = deal.discount.as_deref().filter(|d| !d.is_empty()) {
        optional_lines.push(format!("<b>Descuento:</b> {}", escape_html(discount)));
    }
    if let Some(coupon) = deal.coupon.as_deref().filter(|c| !c.is_empty()) {
        optional_lines.push(format!("<b>Cupón:</b> <code>{}</code>", escape_html(coupon)));
    }
    let optional_block = if optional_lines.is_empty() {
        String::new()
    } else {
        format!("\n{}", optional_lines.join("\n"))
    };

    let description = truncate_chars(
        deal.description.as_deref().unwrap_or("No disponible"),
        DESCRIPTION_MAX_CHARS,
    );

    let text = format!(
        "<b>{title}</b>\n\n\
         <b>Calificación:</b> {temp:.0}° {emoji}\n\
         <b>Publicado hace:</b> {age}\n\
         <b>Comercio:</b> {merchant}{optional_block}\n\n\
         <b>Descripción:</b>\n{description}",
        temp = obs.temperature,
        description = escape_html(&description),
    );

    Message {
        text,
        image_url: deal.image_url.clone(),
        action_url: deal.url.clone(),
    }
}

fn age_text(hours: f64) -> String {
    if hours >= 1.0 {
        if hours >= 1.5 {
            format!("{} horas", hours.round() as i64)
        } else {
            "1 hora".to_string()
        }
    } else {
        let minutes = (hours * 60.0).round() as i64;
        if minutes > 1 {
            format!("{minutes} minutos")
        } else {
            "1 minuto".to_string()
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
