//! Row classification: the validation and auto-fix rule engine.
//!
//! [`classify`] is a pure function of its inputs. The taxonomy and policy are
//! passed in by the caller; nothing here reads shared state.
//!
//! Checks run in severity order:
//!
//! 1. Structural malformation (field count, encoding). Always rejected.
//! 2. Missing required fields. The title can be defaulted, the identifier cannot.
//! 3. Invalid numeric values. Clamped to the nearest bound or dropped.
//! 4. Unknown category. Corrected to a close label or replaced with `"Other"`.
//!
//! Every detected error is recorded. Repairs are applied only when the policy
//! allows them and every error of the row is repairable; otherwise the row is
//! rejected and carries no repaired record.
//!
//! Warnings flag suspicious but usable values. They are reported alongside
//! the errors and never change the outcome.

use std::collections::BTreeMap;

use csv::ByteRecord;
use serde::{Deserialize, Serialize};

use crate::validation::cleaners::{
    http_url, normalize_text, parse_count, parse_price, parse_rank, parse_rating, Parsed,
};
use crate::validation::schema::{Field, Schema};
use crate::validation::taxonomy::{CategoryMatch, Taxonomy, FALLBACK_CATEGORY};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Title given to rows whose title is missing, when repair is allowed.
pub const PLACEHOLDER_TITLE: &str = "Untitled Product";

/// Prices above this are clamped.
pub const MAX_PRICE: f64 = 100_000.0;

/// Upper bound of the rating scale.
pub const MAX_RATING: f64 = 5.0;

/// Titles are cut to this many characters.
pub const MAX_TITLE_CHARS: usize = 500;

/// Titles shorter than this are flagged.
pub const MIN_TITLE_CHARS: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Row-level error kinds, as they appear in error breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedRow,
    MissingRequiredField,
    InvalidNumericValue,
    UnknownCategory,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedRow => "MalformedRow",
            ErrorKind::MissingRequiredField => "MissingRequiredField",
            ErrorKind::InvalidNumericValue => "InvalidNumericValue",
            ErrorKind::UnknownCategory => "UnknownCategory",
        }
    }
}

/// Repairs the engine can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    DefaultedTitle,
    DefaultedPrice,
    ClampedPrice,
    ClampedRating,
    DroppedRating,
    DroppedReviewCount,
    DroppedRank,
    DroppedStock,
    CorrectedCategory,
    FallbackCategory,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixKind::DefaultedTitle => "defaulted_title",
            FixKind::DefaultedPrice => "defaulted_price",
            FixKind::ClampedPrice => "clamped_price",
            FixKind::ClampedRating => "clamped_rating",
            FixKind::DroppedRating => "dropped_rating",
            FixKind::DroppedReviewCount => "dropped_review_count",
            FixKind::DroppedRank => "dropped_rank",
            FixKind::DroppedStock => "dropped_stock",
            FixKind::CorrectedCategory => "corrected_category",
            FixKind::FallbackCategory => "fallback_category",
        }
    }
}

/// Non-blocking findings about an otherwise classified row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ShortTitle,
    TruncatedTitle,
    InvalidImageUrl,
    /// Rating of 4.8 or more backed by fewer than 10 reviews.
    RatingWithFewReviews,
    /// Top-100 rank with a rating under 3.5.
    TopRankLowRating,
    /// Price of 0 while stock is available.
    ZeroPriceInStock,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::ShortTitle => "short_title",
            WarningKind::TruncatedTitle => "truncated_title",
            WarningKind::InvalidImageUrl => "invalid_image_url",
            WarningKind::RatingWithFewReviews => "rating_with_few_reviews",
            WarningKind::TopRankLowRating => "top_rank_low_rating",
            WarningKind::ZeroPriceInStock => "zero_price_in_stock",
        }
    }
}

/// Final bucket of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Valid,
    NeedsReview,
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Valid => "Valid",
            Outcome::NeedsReview => "NeedsReview",
            Outcome::Rejected => "Rejected",
        }
    }
}

/// Repair policy flags for one job or one synchronous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_auto_fix")]
    pub auto_fix: bool,
    #[serde(default)]
    pub strict_mode: bool,
}

fn default_auto_fix() -> bool {
    true
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auto_fix: true,
            strict_mode: false,
        }
    }
}

impl Policy {
    pub fn new(auto_fix: bool, strict_mode: bool) -> Self {
        Self { auto_fix, strict_mode }
    }

    /// Strict mode wins over auto-fix.
    pub fn allows_repair(&self) -> bool {
        self.auto_fix && !self.strict_mode
    }
}

/// One detected problem in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
    pub message: String,
}

impl RowError {
    pub fn new(kind: ErrorKind, field: Option<Field>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarning {
    pub kind: WarningKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
    pub message: String,
}

impl RowWarning {
    pub fn new(kind: WarningKind, field: Option<Field>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field,
            message: message.into(),
        }
    }
}

/// A data row as read from the file, before any interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based line in the source file; the first data row is line 2.
    pub line: u64,
    pub fields: Vec<String>,
    /// Set when a field was not valid UTF-8 (fields hold a lossy copy).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encoding_error: bool,
}

impl RawRecord {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self {
            line,
            fields,
            encoding_error: false,
        }
    }

    pub fn from_byte_record(line: u64, record: &ByteRecord) -> Self {
        let mut encoding_error = false;
        let fields = record
            .iter()
            .map(|raw| match std::str::from_utf8(raw) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    encoding_error = true;
                    String::from_utf8_lossy(raw).into_owned()
                }
            })
            .collect();

        Self {
            line,
            fields,
            encoding_error,
        }
    }

    fn value(&self, schema: &Schema, field: Field) -> Option<&str> {
        self.fields.get(schema.column(field)?).map(String::as_str)
    }
}

/// A cleaned (and possibly repaired) catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub line: u64,
    pub identifier: String,
    pub title: String,
    pub price: f64,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub rank: Option<u64>,
    pub stock: Option<u64>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RowWarning>,
    /// Values attached by record enrichers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Result of classifying one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub line: u64,
    pub outcome: Outcome,
    /// Present unless the row is rejected.
    pub record: Option<Record>,
    pub errors: Vec<RowError>,
    pub fixes: Vec<FixKind>,
    /// Reported for every outcome; also copied onto the record.
    pub warnings: Vec<RowWarning>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Classifies one raw row against a schema, a taxonomy and a policy.
///
/// An empty taxonomy disables the category check; the label is kept as written.
pub fn classify(
    raw: &RawRecord,
    schema: &Schema,
    taxonomy: &Taxonomy,
    policy: Policy,
) -> Classification {
    if let Some(problem) = structural_problem(raw, schema) {
        return Classification {
            line: raw.line,
            outcome: Outcome::Rejected,
            record: None,
            errors: vec![RowError::new(ErrorKind::MalformedRow, None, problem)],
            fixes: Vec::new(),
            warnings: Vec::new(),
        };
    }

    let value = move |field: Field| raw.value(schema, field);
    let mut findings = Findings::default();
    let mut warnings = Vec::new();

    // Required fields
    let identifier = value(Field::Identifier)
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty());
    if identifier.is_none() {
        findings.unfixable(
            ErrorKind::MissingRequiredField,
            Field::Identifier,
            "identifier is missing",
        );
    }

    let title = match value(Field::Title).and_then(normalize_text) {
        Some(title) => checked_title(title, &mut warnings),
        None => {
            findings.fixable(
                ErrorKind::MissingRequiredField,
                Field::Title,
                "title is missing",
                FixKind::DefaultedTitle,
            );
            PLACEHOLDER_TITLE.to_string()
        }
    };

    // Numeric fields
    let raw_price = value(Field::Price).unwrap_or_default();
    let price = match parse_price(raw_price) {
        Parsed::Value(p) if p < 0.0 => {
            findings.numeric(Field::Price, format!("price {p} is negative"), FixKind::ClampedPrice);
            0.0
        }
        Parsed::Value(p) if p > MAX_PRICE => {
            findings.numeric(
                Field::Price,
                format!("price {p} exceeds {MAX_PRICE}"),
                FixKind::ClampedPrice,
            );
            MAX_PRICE
        }
        Parsed::Value(p) => p,
        Parsed::Missing => {
            findings.numeric(Field::Price, "price is missing", FixKind::DefaultedPrice);
            0.0
        }
        Parsed::Invalid => {
            findings.numeric(
                Field::Price,
                format!("price {raw_price:?} is not a number"),
                FixKind::DefaultedPrice,
            );
            0.0
        }
    };

    let raw_rating = value(Field::Rating).unwrap_or_default();
    let rating = match parse_rating(raw_rating) {
        Parsed::Value(r) if !(0.0..=MAX_RATING).contains(&r) => {
            findings.numeric(
                Field::Rating,
                format!("rating {r} is outside [0, {MAX_RATING}]"),
                FixKind::ClampedRating,
            );
            Some(r.clamp(0.0, MAX_RATING))
        }
        Parsed::Value(r) => Some(r),
        Parsed::Missing => None,
        Parsed::Invalid => {
            findings.numeric(
                Field::Rating,
                format!("rating {raw_rating:?} is not a number"),
                FixKind::DroppedRating,
            );
            None
        }
    };

    let review_count = non_negative(
        &mut findings,
        Field::ReviewCount,
        value(Field::ReviewCount).unwrap_or_default(),
        FixKind::DroppedReviewCount,
    );
    let stock = non_negative(
        &mut findings,
        Field::Stock,
        value(Field::Stock).unwrap_or_default(),
        FixKind::DroppedStock,
    );

    let raw_rank = value(Field::Rank).unwrap_or_default();
    let rank = match parse_rank(raw_rank) {
        Parsed::Value(r) if r > 0 => Some(r as u64),
        Parsed::Missing => None,
        _ => {
            findings.numeric(
                Field::Rank,
                format!("rank {raw_rank:?} is not a positive integer"),
                FixKind::DroppedRank,
            );
            None
        }
    };

    let raw_image_url = value(Field::ImageUrl).unwrap_or_default().trim();
    let image_url = http_url(raw_image_url);
    if image_url.is_none() && !raw_image_url.is_empty() {
        warnings.push(RowWarning::new(
            WarningKind::InvalidImageUrl,
            Some(Field::ImageUrl),
            format!("image URL {raw_image_url:?} is not an http(s) URL; dropped"),
        ));
    }

    warnings.extend(cross_field_warnings(price, rating, review_count, rank, stock));

    // Category
    let label = value(Field::Category).and_then(normalize_text);
    let category = if taxonomy.is_empty() {
        label
    } else {
        let described = label.as_deref().unwrap_or("<missing>");
        match taxonomy.resolve(label.as_deref()) {
            CategoryMatch::Known(known) => Some(known),
            CategoryMatch::Corrected(corrected) => {
                findings.fixable(
                    ErrorKind::UnknownCategory,
                    Field::Category,
                    format!("category {described:?} is not in the taxonomy; closest is {corrected:?}"),
                    FixKind::CorrectedCategory,
                );
                Some(corrected)
            }
            CategoryMatch::Unknown => {
                findings.fixable(
                    ErrorKind::UnknownCategory,
                    Field::Category,
                    format!("category {described:?} is not in the taxonomy"),
                    FixKind::FallbackCategory,
                );
                Some(FALLBACK_CATEGORY.to_string())
            }
        }
    };

    let Findings {
        errors,
        fixes,
        unfixable,
    } = findings;

    let outcome = if errors.is_empty() {
        Outcome::Valid
    } else if unfixable || !policy.allows_repair() {
        Outcome::Rejected
    } else {
        Outcome::NeedsReview
    };

    let record = match (outcome, identifier) {
        (Outcome::Rejected, _) | (_, None) => None,
        (_, Some(identifier)) => Some(Record {
            line: raw.line,
            identifier,
            title,
            price,
            rating,
            review_count,
            rank,
            stock,
            category,
            image_url,
            warnings: warnings.clone(),
            attributes: BTreeMap::new(),
        }),
    };

    Classification {
        line: raw.line,
        outcome,
        fixes: if record.is_some() { fixes } else { Vec::new() },
        record,
        errors,
        warnings,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Findings {
    errors: Vec<RowError>,
    fixes: Vec<FixKind>,
    unfixable: bool,
}

impl Findings {
    fn fixable(&mut self, kind: ErrorKind, field: Field, message: impl Into<String>, fix: FixKind) {
        self.errors.push(RowError::new(kind, Some(field), message));
        self.fixes.push(fix);
    }

    fn unfixable(&mut self, kind: ErrorKind, field: Field, message: impl Into<String>) {
        self.errors.push(RowError::new(kind, Some(field), message));
        self.unfixable = true;
    }

    fn numeric(&mut self, field: Field, message: impl Into<String>, fix: FixKind) {
        self.fixable(ErrorKind::InvalidNumericValue, field, message, fix);
    }
}

fn structural_problem(raw: &RawRecord, schema: &Schema) -> Option<String> {
    if raw.encoding_error {
        return Some("row is not valid UTF-8".to_string());
    }
    if raw.fields.len() != schema.width() {
        return Some(format!(
            "expected {} fields, found {}",
            schema.width(),
            raw.fields.len()
        ));
    }
    None
}

/// Cuts an over-long title and flags titles that are too long or too short.
fn checked_title(title: String, warnings: &mut Vec<RowWarning>) -> String {
    let length = title.chars().count();
    let title = if length > MAX_TITLE_CHARS {
        warnings.push(RowWarning::new(
            WarningKind::TruncatedTitle,
            Some(Field::Title),
            format!("title of {length} characters cut to {MAX_TITLE_CHARS}"),
        ));
        title.chars().take(MAX_TITLE_CHARS).collect()
    } else {
        title
    };

    if length < MIN_TITLE_CHARS {
        warnings.push(RowWarning::new(
            WarningKind::ShortTitle,
            Some(Field::Title),
            format!("title {title:?} is shorter than {MIN_TITLE_CHARS} characters"),
        ));
    }
    title
}

/// Flags value combinations that are individually valid but implausible
/// together. Runs on cleaned values.
fn cross_field_warnings(
    price: f64,
    rating: Option<f64>,
    review_count: Option<u64>,
    rank: Option<u64>,
    stock: Option<u64>,
) -> Vec<RowWarning> {
    let mut warnings = Vec::new();
    let reviews = review_count.unwrap_or(0);

    if let Some(rating) = rating {
        if rating >= 4.8 && reviews < 10 {
            warnings.push(RowWarning::new(
                WarningKind::RatingWithFewReviews,
                Some(Field::Rating),
                format!("rating {rating} backed by only {reviews} reviews"),
            ));
        }
        if let Some(rank) = rank.filter(|r| *r < 100) {
            if rating < 3.5 {
                warnings.push(RowWarning::new(
                    WarningKind::TopRankLowRating,
                    Some(Field::Rank),
                    format!("rank {rank} with a rating of {rating}"),
                ));
            }
        }
    }

    if let Some(stock) = stock.filter(|s| *s > 0) {
        if price == 0.0 {
            warnings.push(RowWarning::new(
                WarningKind::ZeroPriceInStock,
                Some(Field::Price),
                format!("price is 0 with {stock} in stock"),
            ));
        }
    }

    warnings
}

fn non_negative(findings: &mut Findings, field: Field, raw: &str, fix: FixKind) -> Option<u64> {
    match parse_count(raw) {
        Parsed::Value(v) if v >= 0 => Some(v as u64),
        Parsed::Missing => None,
        Parsed::Value(v) => {
            findings.numeric(field, format!("{} {v} is negative", field.as_str()), fix);
            None
        }
        Parsed::Invalid => {
            findings.numeric(
                field,
                format!("{} {raw:?} is not an integer", field.as_str()),
                fix,
            );
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
