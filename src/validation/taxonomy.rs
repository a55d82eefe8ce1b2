//! Category taxonomy and label resolution.
//!
//! A taxonomy is an immutable set of labels matched by their normalized form
//! and reported in the form they were first given. Replacing the set is done
//! by building a new `Taxonomy`; the rule engine only ever borrows one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label assigned to rows whose category cannot be matched.
pub const FALLBACK_CATEGORY: &str = "Other";

/// Minimum similarity for an unknown label to be corrected to a known one.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

/// Set of recognized category labels.
///
/// Serialized as the list of display labels; normalized keys are rebuilt on
/// load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Taxonomy {
    /// Normalized label (trimmed, whitespace-collapsed, lowercase) to the
    /// display form it was first given in.
    labels: BTreeMap<String, String>,
}

/// Outcome of matching a row's category label against the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryMatch {
    /// The label is in the taxonomy (its display form).
    Known(String),
    /// The label is close enough to a known label to be corrected to it.
    Corrected(String),
    /// No acceptable match.
    Unknown,
}

impl Taxonomy {
    /// Builds a taxonomy from raw labels. Blank labels are dropped and
    /// duplicates (after normalization) collapse into the first one given.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_key = BTreeMap::new();
        for label in labels {
            let display = collapse_whitespace(label.as_ref());
            if display.is_empty() {
                continue;
            }
            by_key.entry(display.to_lowercase()).or_insert(display);
        }
        Self { labels: by_key }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains_key(&normalize_label(label))
    }

    /// Display labels, ordered by normalized form.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    /// Resolves a row's label. A missing or blank label is `Unknown`.
    ///
    /// Ties between equally similar candidates go to the first label in
    /// sorted order, so resolution is deterministic.
    pub fn resolve(&self, label: Option<&str>) -> CategoryMatch {
        let normalized = match label.map(normalize_label) {
            Some(l) if !l.is_empty() => l,
            _ => return CategoryMatch::Unknown,
        };

        if let Some(display) = self.labels.get(&normalized) {
            return CategoryMatch::Known(display.clone());
        }

        let mut best: Option<(&str, f64)> = None;
        for (candidate, display) in &self.labels {
            let score = similarity(&normalized, candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((display, score));
            }
        }

        match best {
            Some((display, score)) if score >= FUZZY_MATCH_THRESHOLD => {
                CategoryMatch::Corrected(display.to_string())
            }
            _ => CategoryMatch::Unknown,
        }
    }
}

impl From<Vec<String>> for Taxonomy {
    fn from(labels: Vec<String>) -> Self {
        Self::new(labels)
    }
}

impl From<Taxonomy> for Vec<String> {
    fn from(taxonomy: Taxonomy) -> Self {
        taxonomy.labels.into_values().collect()
    }
}

/// Trims, collapses inner whitespace and lowercases a label.
pub fn normalize_label(label: &str) -> String {
    collapse_whitespace(label).to_lowercase()
}

fn collapse_whitespace(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity in [0, 1]: one minus edit distance over the longer length.
fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}

/// Edit distance between two strings, two-row dynamic programming.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(["Electronics", "Books", "home & kitchen"])
    }

    #[test]
    fn labels_are_normalized_and_deduplicated() {
        let t = Taxonomy::new(["  Books ", "books", "Home   &  Kitchen", "", "   "]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.labels().collect::<Vec<_>>(), vec!["Books", "Home & Kitchen"]);
    }

    #[test]
    fn first_display_form_survives_serialization() {
        let t = Taxonomy::new(["TV & Audio", "tv &  audio", "Books"]);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!(["Books", "TV & Audio"]));

        let back: Taxonomy = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
        assert!(back.contains("tv & audio"));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert_eq!(
            taxonomy().resolve(Some("ELECTRONICS")),
            CategoryMatch::Known("Electronics".into())
        );
        assert!(taxonomy().contains("Home & Kitchen"));
    }

    #[test]
    fn near_miss_is_corrected() {
        assert_eq!(
            taxonomy().resolve(Some("Electronic")),
            CategoryMatch::Corrected("Electronics".into())
        );
    }

    #[test]
    fn distant_label_is_unknown() {
        assert_eq!(taxonomy().resolve(Some("Gardening Tools")), CategoryMatch::Unknown);
        assert_eq!(taxonomy().resolve(Some("   ")), CategoryMatch::Unknown);
        assert_eq!(taxonomy().resolve(None), CategoryMatch::Unknown);
    }

    #[test]
    fn empty_taxonomy_knows_nothing() {
        let t = Taxonomy::default();
        assert!(t.is_empty());
        assert_eq!(t.resolve(Some("Books")), CategoryMatch::Unknown);
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
        assert_eq!(levenshtein_distance("hell", "hello"), 1);
        assert_eq!(levenshtein_distance("hello", "hallo"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
