//! Record enrichment applied after classification.
//!
//! Enrichers only see accepted records (Valid or NeedsReview) and may only add
//! attributes. They never change a row's outcome.

use serde_json::json;

use crate::validation::cleaners::round2;
use crate::validation::rules::Record;

/// Pluggable post-validation enrichment step.
///
/// Implementations must be cheap and deterministic: they run inside the chunk
/// worker pool and their output becomes part of the chunk result.
pub trait RecordEnricher: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Adds attributes to `record`.
    fn enrich(&self, record: &mut Record);
}

/// Derives listing attributes from the cleaned numeric fields.
///
/// Adds `price_tier`, `rank_tier`, `stock_status`, `popularity_score` and
/// `health_score` (0-100).
#[derive(Debug, Default, Clone, Copy)]
pub struct ListingEnricher;

impl RecordEnricher for ListingEnricher {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn enrich(&self, record: &mut Record) {
        let health = health_score(record);
        let popularity = popularity_score(record.rating, record.review_count, record.rank);

        let attrs = &mut record.attributes;
        attrs.insert("price_tier".into(), json!(price_tier(record.price)));
        if let Some(rank) = record.rank {
            attrs.insert("rank_tier".into(), json!(rank_tier(rank)));
        }
        if let Some(stock) = record.stock {
            attrs.insert("stock_status".into(), json!(stock_status(stock)));
        }
        attrs.insert("popularity_score".into(), json!(popularity));
        attrs.insert("health_score".into(), json!(health));
    }
}

pub fn price_tier(price: f64) -> &'static str {
    match price {
        p if p < 10.0 => "budget",
        p if p < 30.0 => "economy",
        p if p < 100.0 => "standard",
        p if p < 500.0 => "premium",
        _ => "luxury",
    }
}

pub fn rank_tier(rank: u64) -> &'static str {
    match rank {
        0..=10 => "excellent",
        11..=100 => "very_good",
        101..=1000 => "good",
        1001..=5000 => "average",
        _ => "low",
    }
}

pub fn stock_status(stock: u64) -> &'static str {
    match stock {
        0 => "out_of_stock",
        1..=5 => "critical",
        6..=20 => "low",
        21..=100 => "normal",
        _ => "high",
    }
}

fn popularity_score(rating: Option<f64>, reviews: Option<u64>, rank: Option<u64>) -> f64 {
    let rating = rating.unwrap_or(0.0);
    let reviews = reviews.unwrap_or(0) as f64;
    let mut score = rating * 20.0 + reviews.ln_1p() * 10.0;
    if let Some(rank) = rank.filter(|r| *r < 1000) {
        score += (1000 - rank) as f64 / 10.0;
    }
    round2(score)
}

fn health_score(record: &Record) -> u8 {
    let mut health: i32 = 50;

    match record.rating {
        Some(r) if r >= 4.0 => health += 15,
        Some(r) if r >= 3.5 => health += 10,
        Some(r) if r > 0.0 && r < 3.0 => health -= 15,
        _ => {}
    }

    match record.review_count.unwrap_or(0) {
        n if n >= 100 => health += 10,
        n if n >= 50 => health += 5,
        _ => {}
    }

    match record.rank {
        Some(r) if r <= 1000 => health += 15,
        Some(r) if r <= 5000 => health += 10,
        Some(r) if r > 50_000 => health -= 10,
        _ => {}
    }

    match record.stock {
        Some(s) if s > 10 => health += 10,
        Some(0) => health -= 20,
        _ => {}
    }

    health.clamp(0, 100) as u8
}
