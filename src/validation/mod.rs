//! Catalog row validation.
//!
//! Preflight checks reject unreadable files up front. Every remaining row is
//! classified by the rule engine into Valid, NeedsReview or Rejected, and
//! accepted rows are passed through the configured enrichers.

pub mod cleaners;
pub mod enrich;
pub mod preflight;
pub mod rules;
pub mod schema;
pub mod taxonomy;

pub use enrich::{ListingEnricher, RecordEnricher};
pub use preflight::{inspect, read_input_file, InputProfile, InputWarning, LineEndings};
pub use rules::{
    classify, Classification, ErrorKind, FixKind, Outcome, Policy, RawRecord, Record, RowError,
    RowWarning, WarningKind,
};
pub use schema::{Field, Schema};
pub use taxonomy::{CategoryMatch, Taxonomy, FALLBACK_CATEGORY};
