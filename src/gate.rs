//! Notification gate: decides whether a freshly scored observation is worth
//! pushing. History is persisted regardless of the outcome here.

/// Why an observation was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The listing is marked expired on the source site.
    Expired,
    /// Temperature below the anti-noise seed floor.
    UnderSeed,
    /// Final score did not reach the lowest tier.
    BelowThreshold,
    /// Already notified at this tier or higher.
    AlreadyNotified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit a notification at this tier, then raise `max_rating_notified`.
    Notify { rating: u8 },
    Drop(DropReason),
}

/// Filter order matters: expiry and the seed floor are cheap structural
/// checks; the progressive check comes last so a deal climbing tiers
/// (🔥 → 🔥🔥 → 🔥🔥🔥) re-notifies exactly once per upgrade.
pub fn evaluate(
    expired: bool,
    temperature: f64,
    rating: u8,
    max_rating_notified: u8,
    min_seed_temp: f64,
) -> Decision {
    if expired {
        return Decision::Drop(DropReason::Expired);
    }
    if temperature < min_seed_temp {
        return Decision::Drop(DropReason::UnderSeed);
    }
    if rating == 0 {
        return Decision::Drop(DropReason::BelowThreshold);
    }
    if rating <= max_rating_notified {
        return Decision::Drop(DropReason::AlreadyNotified);
    }
    Decision::Notify { rating }
}
