use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for API responses.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "password",
    "secret",
    "access_token",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for API display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Client-facing error presentation returned in HTTP error bodies.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Job creation ──────────────────────────────────────────────────────────
    #[error("Input unreadable: {0}")]
    InputUnreadable(String),

    #[error("Manifest write failed for job {job_id}: {message}")]
    ManifestWriteFailed { job_id: String, message: String },

    // ── Chunk execution ───────────────────────────────────────────────────────
    #[error("Dispatch of chunk {chunk_id} failed: {message}")]
    ChunkDispatchFailed { chunk_id: String, message: String },

    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("CSV output error: {0}")]
    CsvOutput(String),

    // ── Request ───────────────────────────────────────────────────────────────
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a presentation suitable for API responses.
    /// Never leaks credentials embedded in upstream error messages.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Job creation ──────────────────────────────────────────────────
            AppError::InputUnreadable(msg) => ErrorPresentation {
                title: "Input Unreadable".into(),
                message: sanitize_message(msg, "The uploaded file could not be read."),
                action: Some("Upload a UTF-8 CSV file with identifier and title columns".into()),
            },

            AppError::ManifestWriteFailed { .. } => ErrorPresentation {
                title: "Job Not Created".into(),
                message: "The job manifest could not be stored. No job was started.".into(),
                action: Some("Retry the upload".into()),
            },

            // ── Chunk execution ───────────────────────────────────────────────
            AppError::ChunkDispatchFailed { chunk_id, .. } => ErrorPresentation {
                title: "Chunk Dispatch Failed".into(),
                message: format!("Chunk {} could not be dispatched to a worker.", chunk_id),
                action: Some("Check worker availability and resubmit the job".into()),
            },

            // ── Storage ───────────────────────────────────────────────────────
            AppError::Storage(_) => ErrorPresentation {
                title: "Storage Error".into(),
                message: "The object store could not complete the request.".into(),
                action: Some("Try again".into()),
            },

            AppError::AlreadyExists(key) => ErrorPresentation {
                title: "Already Exists".into(),
                message: format!("The object {} already exists and cannot be replaced.", key),
                action: None,
            },

            AppError::NotFound(what) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(what, "The requested resource was not found."),
                action: None,
            },

            // ── File / CSV ────────────────────────────────────────────────────
            AppError::CsvOutput(msg) => ErrorPresentation {
                title: "Output Error".into(),
                message: format!("Error while writing CSV output: {}", msg),
                action: Some("Check the output directory permissions".into()),
            },

            // ── Request ───────────────────────────────────────────────────────
            AppError::InvalidRequest(msg) => ErrorPresentation {
                title: "Invalid Request".into(),
                message: sanitize_message(msg, "The request was malformed."),
                action: Some("Fix the request and try again".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the chunk worker.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }

    /// HTTP status code used when this error crosses the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InputUnreadable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::ConnectionFailed(_) | AppError::ChunkDispatchFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::ManifestWriteFailed { .. }
            | AppError::Storage(_)
            | AppError::CsvOutput(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

// Allow AppError to be returned from axum handlers
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!("[API] {}", self);
        }
        (self.status_code(), Json(self.to_presentation())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            // Job creation
            AppError::InputUnreadable("missing title column".into()),
            AppError::ManifestWriteFailed {
                job_id: "job-1".into(),
                message: "disk full".into(),
            },
            // Chunk execution
            AppError::ChunkDispatchFailed {
                chunk_id: "chunk-00003".into(),
                message: "worker down".into(),
            },
            // Storage
            AppError::Storage("database locked".into()),
            AppError::AlreadyExists("jobs/x/manifest".into()),
            AppError::NotFound("job x".into()),
            // File/CSV
            AppError::CsvOutput("permission denied".into()),
            // Request
            AppError::InvalidRequest("bad json".into()),
            // Network
            AppError::ConnectionFailed("timeout".into()),
            // Generic
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn creation_failures_map_to_client_and_server_codes() {
        assert_eq!(
            AppError::InputUnreadable("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::ManifestWriteFailed {
                job_id: "j".into(),
                message: "m".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn manifest_failure_does_not_expose_internal_message() {
        let presentation = AppError::ManifestWriteFailed {
            job_id: "job-1".into(),
            message: "/var/lib/catalog/objects.db: disk I/O error".into(),
        }
        .to_presentation();

        assert!(!presentation.message.contains("/var/lib"));
        assert!(presentation.action.is_some());
    }

    #[test]
    fn serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));

            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("title").is_some(), "Serialized {:?} missing 'title'", variant);
            assert!(parsed.get("message").is_some(), "Serialized {:?} missing 'message'", variant);
            // action can be null, but field should exist
            assert!(parsed.get("action").is_some(), "Serialized {:?} missing 'action'", variant);
        }
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, AppError)> = vec![
            ("InputUnreadable", AppError::InputUnreadable("password=hunter2 in header".into())),
            ("InvalidRequest", AppError::InvalidRequest("Authorization: Bearer abc".into())),
            ("ConnectionFailed", AppError::ConnectionFailed("access_token=xyz".into())),
            ("Internal", AppError::Internal("client secret leaked".into())),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output_lower = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} presentation contains sensitive pattern",
                    label
                );
            }
        }
    }
}
