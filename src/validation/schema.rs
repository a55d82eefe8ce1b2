//! Column-to-field mapping for catalog files.
//!
//! Catalog exports use inconsistent header names (`asin`, `sku`, `product_id`,
//! `prix`, ...). A [`Schema`] resolves each known field to the first column
//! whose header matches one of its aliases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A catalog field understood by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Identifier,
    Title,
    Price,
    Rating,
    ReviewCount,
    Rank,
    Stock,
    Category,
    ImageUrl,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Identifier,
        Field::Title,
        Field::Price,
        Field::Rating,
        Field::ReviewCount,
        Field::Rank,
        Field::Stock,
        Field::Category,
        Field::ImageUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Identifier => "identifier",
            Field::Title => "title",
            Field::Price => "price",
            Field::Rating => "rating",
            Field::ReviewCount => "review_count",
            Field::Rank => "rank",
            Field::Stock => "stock",
            Field::Category => "category",
            Field::ImageUrl => "image_url",
        }
    }

    /// Lowercase header names recognized for this field.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::Identifier => &["asin", "product_id", "sku", "id"],
            Field::Title => &["title", "name", "product_name", "product_title"],
            Field::Price => &["price", "prix", "cost"],
            Field::Rating => &["rating", "note", "review_rating", "stars"],
            Field::ReviewCount => &[
                "review_count",
                "reviews",
                "review_number",
                "nb_reviews",
                "reviewcount",
            ],
            Field::Rank => &["rank", "ranking", "best_seller_rank", "sales_rank"],
            Field::Stock => &["stock", "inventory", "quantity", "qty"],
            Field::Category => &["category", "categorie", "cat", "product_category"],
            Field::ImageUrl => &["image_url", "imgurl", "image", "img", "picture_url"],
        }
    }

    /// Fields without which no row can be identified.
    pub fn is_required(&self) -> bool {
        matches!(self, Field::Identifier | Field::Title)
    }
}

/// Header layout of one input file.
#[derive(Debug, Clone)]
pub struct Schema {
    headers: Vec<String>,
    columns: HashMap<Field, usize>,
}

impl Schema {
    /// Builds a schema from the header row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputUnreadable` if the header row is empty or no
    /// column maps to a required field.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Result<Self, AppError> {
        if headers.is_empty() {
            return Err(AppError::InputUnreadable("CSV file has no header row".into()));
        }

        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .collect();

        let mut columns = HashMap::new();
        for field in Field::ALL {
            let aliases = field.aliases();
            if let Some(idx) = normalized.iter().position(|h| aliases.contains(&h.as_str())) {
                columns.insert(field, idx);
            }
        }

        let missing: Vec<&str> = Field::ALL
            .iter()
            .filter(|f| f.is_required() && !columns.contains_key(f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::InputUnreadable(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            columns,
        })
    }

    /// Original header names, in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of columns every well-formed row must have.
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Column index of a field, if the file carries it.
    pub fn column(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Headers that no field claimed. Their values are ignored.
    pub fn unmapped_columns(&self) -> Vec<String> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.columns.values().any(|c| c == idx))
            .map(|(_, h)| h.clone())
            .collect()
    }
}
