//! Field-level parsing for raw catalog values.
//!
//! Cleaners only normalize and parse. Range checks and repair decisions
//! belong to the rule engine.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Result of parsing one optional raw value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parsed<T> {
    /// Column absent or value blank.
    Missing,
    Value(T),
    /// Present but not parseable.
    Invalid,
}

/// Currency symbols, currency codes and whitespace stripped from prices.
fn price_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(usd|eur|gbp|mad|dhs?)|[$€£\s]").expect("static price regex")
    })
}

/// `4.5`, `4,5`, `4.5/5`, `8 / 10`, `4.5 stars`.
fn rating_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(-?\d+(?:[.,]\d+)?)\s*(?:/\s*(\d+(?:[.,]\d+)?))?\s*(?:stars?)?$")
            .expect("static rating regex")
    })
}

/// Collapses whitespace runs; `None` when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Parses a price such as `$1,234.56`, `1.234,56 EUR` or `12,50`, rounded to cents.
pub fn parse_price(raw: &str) -> Parsed<f64> {
    if raw.trim().is_empty() {
        return Parsed::Missing;
    }
    let cleaned = price_noise().replace_all(raw, "");
    match normalize_decimal(&cleaned).and_then(|s| s.parse::<f64>().ok()) {
        Some(v) if v.is_finite() => Parsed::Value(round2(v)),
        _ => Parsed::Invalid,
    }
}

/// Parses a rating. Fractions are rescaled onto 0..5 (`8/10` → `4.0`);
/// plain numbers are returned as written so out-of-range values stay visible.
pub fn parse_rating(raw: &str) -> Parsed<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Parsed::Missing;
    }
    let Some(caps) = rating_shape().captures(trimmed) else {
        return Parsed::Invalid;
    };

    let Some(value) = caps.get(1).and_then(|m| parse_decimal_comma(m.as_str())) else {
        return Parsed::Invalid;
    };

    match caps.get(2) {
        None => Parsed::Value(round2(value)),
        Some(scale) => match parse_decimal_comma(scale.as_str()) {
            Some(s) if s > 0.0 => Parsed::Value(round2(value / s * 5.0)),
            _ => Parsed::Invalid,
        },
    }
}

/// Parses a whole number, tolerating thousands separators (`1,234`, `1 234`).
/// Sign is preserved so negative counts can be reported.
pub fn parse_count(raw: &str) -> Parsed<i64> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    if compact.is_empty() {
        return Parsed::Missing;
    }
    if let Ok(v) = compact.parse::<i64>() {
        return Parsed::Value(v);
    }
    match compact.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Parsed::Value(v as i64)
        }
        _ => Parsed::Invalid,
    }
}

/// Parses a sales rank such as `#1,204`.
pub fn parse_rank(raw: &str) -> Parsed<i64> {
    parse_count(raw.trim().trim_start_matches('#'))
}

/// Returns the URL if it is an absolute http(s) URL with a host.
pub fn http_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).ok()?;
    let web = matches!(url.scheme(), "http" | "https") && url.host_str().is_some();
    web.then(|| trimmed.to_string())
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn parse_decimal_comma(s: &str) -> Option<f64> {
    s.replace(',', ".").parse::<f64>().ok()
}

/// Rewrites a number using `,` and/or `.` separators into `f64::from_str` form.
///
/// When both separators appear, the last one is the decimal mark. A lone
/// separator is a thousands mark only if it groups digits by three.
fn normalize_decimal(s: &str) -> Option<String> {
    let body = s.strip_prefix('-').unwrap_or(s);
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }
    let sign = if body.len() < s.len() { "-" } else { "" };

    let normalized = match (body.rfind(','), body.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => body.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => body.replace(',', ""),
        (Some(_), None) if is_thousands_grouped(body, ',') => body.replace(',', ""),
        (Some(_), None) if body.matches(',').count() == 1 => body.replace(',', "."),
        (None, Some(_)) if body.matches('.').count() > 1 => {
            if is_thousands_grouped(body, '.') {
                body.replace('.', "")
            } else {
                return None;
            }
        }
        (Some(_), None) => return None,
        _ => body.to_string(),
    };

    Some(format!("{sign}{normalized}"))
}

fn is_thousands_grouped(s: &str, sep: char) -> bool {
    let groups: Vec<&str> = s.split(sep).collect();
    groups.len() >= 2
        && (1..=3).contains(&groups[0].len())
        && groups[1..].iter().all(|g| g.len() == 3)
}
