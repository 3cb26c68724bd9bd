//! Health HTTP endpoints served alongside the scheduled-backup process:
//! `/__health`, `/__gtg`, and `/__build-info`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use backup_core::{CollectionHealth, HealthEvaluator, StatusStore};
use serde::Serialize;
use std::sync::Arc;

pub fn router<T>(health: HealthEvaluator<T>) -> Router
where
    T: StatusStore + 'static,
{
    let state = Arc::new(health);

    Router::new()
        .route("/__health", get(health_handler::<T>))
        .route("/__gtg", get(gtg_handler::<T>))
        .route("/__build-info", get(build_info_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthCheck {
    name: String,
    ok: bool,
    severity: u8,
    business_impact: &'static str,
    technical_summary: &'static str,
    panic_guide: &'static str,
    check_output: String,
}

#[derive(Serialize)]
struct HealthReport {
    schema_version: u8,
    name: &'static str,
    description: &'static str,
    checks: Vec<HealthCheck>,
}

fn to_check(health: &CollectionHealth) -> HealthCheck {
    HealthCheck {
        name: health.collection.canonical_key(),
        ok: health.healthy,
        severity: if health.healthy { 0 } else { 1 },
        business_impact: "backups for this collection may be out of date or missing",
        technical_summary: "periodic MongoDB collection backup to object storage",
        panic_guide: "check mongobackup logs and object store connectivity",
        check_output: health.message.clone(),
    }
}

async fn health_handler<T: StatusStore + 'static>(
    State(health): State<Arc<HealthEvaluator<T>>>,
) -> Json<HealthReport> {
    let checks = health.check_all().iter().map(to_check).collect();
    Json(HealthReport {
        schema_version: 1,
        name: "mongobackup",
        description: "Streaming MongoDB backup and restore",
        checks,
    })
}

async fn gtg_handler<T: StatusStore + 'static>(
    State(health): State<Arc<HealthEvaluator<T>>>,
) -> Response {
    match health.good_to_go().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(health) => (StatusCode::SERVICE_UNAVAILABLE, health.message).into_response(),
    }
}

#[derive(Serialize)]
struct BuildInfo {
    version: &'static str,
    repository: &'static str,
}

async fn build_info_handler() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        repository: env!("CARGO_PKG_REPOSITORY"),
    })
}
