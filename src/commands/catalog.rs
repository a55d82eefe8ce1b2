//! Taxonomy, synchronous processing and health endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::pipeline::BatchReport;
use crate::state::AppState;
use crate::validation::Policy;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/categories", post(replace_categories).get(list_categories))
        .route("/process", post(process_file))
        .route("/health", get(health))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoriesRequest {
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplaceCategoriesResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub file_path: PathBuf,
    #[serde(default = "default_true")]
    pub auto_fix: bool,
    #[serde(default)]
    pub strict_mode: bool,
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /categories`: replaces the taxonomy wholesale.
async fn replace_categories(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CategoriesRequest>, JsonRejection>,
) -> Result<Json<ReplaceCategoriesResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let count = state.replace_taxonomy(&request.categories).await?;

    Ok(Json(ReplaceCategoriesResponse {
        success: true,
        count,
    }))
}

async fn list_categories(State(state): State<Arc<AppState>>) -> Json<CategoriesResponse> {
    let taxonomy = state.taxonomy_snapshot().await;
    let categories: Vec<String> = taxonomy.labels().map(str::to_string).collect();

    Json(CategoriesResponse {
        count: categories.len(),
        categories,
    })
}

/// `POST /process`: classifies a server-side file synchronously.
async fn process_file(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<BatchReport>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    if request.file_path.as_os_str().is_empty() {
        return Err(AppError::InvalidRequest("file_path is empty".to_string()));
    }

    let policy = Policy::new(request.auto_fix, request.strict_mode);
    let taxonomy = state.taxonomy_snapshot().await;
    let report = state
        .batch
        .process_file(&request.file_path, policy, taxonomy)
        .await?;

    Ok(Json(report))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(db) = &state.database {
        db.health_check().await?;
    }
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::spawn_app;
    use std::fs;

    #[tokio::test]
    async fn test_categories_replace_wholesale() {
        let app = spawn_app(|_| {}).await;

        let response: ReplaceCategoriesResponse = app
            .client
            .post(app.url("/categories"))
            .json(&serde_json::json!({ "categories": ["Books", "books ", "Toys"] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.count, 2);

        app.client
            .post(app.url("/categories"))
            .json(&serde_json::json!({ "categories": ["Garden"] }))
            .send()
            .await
            .unwrap();

        let listed: CategoriesResponse = app
            .client
            .get(app.url("/categories"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.categories, vec!["Garden"]);
        assert_eq!(listed.count, 1);
    }

    #[tokio::test]
    async fn test_malformed_categories_body_is_400() {
        let app = spawn_app(|_| {}).await;

        let response = app
            .client
            .post(app.url("/categories"))
            .header("content-type", "application/json")
            .body("{\"categories\": 7}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["title"], "Invalid Request");
    }

    #[tokio::test]
    async fn test_process_writes_reports() {
        let app = spawn_app(|_| {}).await;
        app.state
            .replace_taxonomy(&["Electronics".to_string()])
            .await
            .unwrap();

        let input = app.dir.path().join("catalog.csv");
        fs::write(
            &input,
            "asin,title,price,category\nB001,Mouse,19.99,Electronics\nB002,Lamp,,Electronics\n,Orphan,3,Electronics\n",
        )
        .unwrap();

        let response = app
            .client
            .post(app.url("/process"))
            .json(&serde_json::json!({ "file_path": input }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let report: serde_json::Value = response.json().await.unwrap();
        assert_eq!(report["success"], true);
        assert_eq!(report["total_lines"], 3);
        assert_eq!(report["valid_count"], 1);
        assert_eq!(report["needs_review_count"], 1);
        assert_eq!(report["rejected_count"], 1);
        assert_eq!(report["summary"]["auto_fixed_count"], 1);
        assert_eq!(report["summary"]["error_breakdown"]["MissingRequiredField"], 1);

        let valid_ref = report["valid_output_ref"].as_str().unwrap();
        assert!(std::path::Path::new(valid_ref).exists());
    }

    #[tokio::test]
    async fn test_process_missing_file_is_404() {
        let app = spawn_app(|_| {}).await;

        let response = app
            .client
            .post(app.url("/process"))
            .json(&serde_json::json!({ "file_path": "/nonexistent/catalog.csv" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let app = spawn_app(|_| {}).await;

        let body: serde_json::Value = app
            .client
            .get(app.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
