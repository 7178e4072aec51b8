//! API route definitions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiError;
use super::state::AppState;
use crate::plans::{NewTestPlan, TestPlan, TestPlanPatch};
use crate::report::{self, CaseFilter, ReportExport};
use crate::runner::TestSpec;
use crate::telemetry::{DailySummary, ExecutionRecord, HistoricalBuild};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/test-plans", get(list_plans).post(create_plan))
        .route(
            "/test-plans/{id}",
            get(get_plan).put(update_plan).delete(delete_plan),
        )
        .route("/executions", get(list_executions).post(upsert_execution))
        .route("/executions/batch", post(upsert_executions))
        .route("/executions/{id}", delete(delete_execution))
        .route("/reports/daily", get(daily_report))
        .route("/reports/history", get(history_report))
        .route("/reports/export", get(export_report))
        .route("/runs", post(start_run))
        .route("/runs/batch", post(start_runs))
}

/// Unwrap a JSON body, turning extractor failures into a 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "testops API is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Test plans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlanQuery {
    keyword: Option<String>,
}

async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Json<Vec<TestPlan>> {
    Json(state.plans.list(query.keyword.as_deref()).await)
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestPlan>, ApiError> {
    state
        .plans
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Test plan not found".into()))
}

async fn create_plan(
    State(state): State<AppState>,
    payload: Result<Json<NewTestPlan>, JsonRejection>,
) -> Result<(StatusCode, Json<TestPlan>), ApiError> {
    let plan = state.plans.create(body(payload)?).await;
    info!(id = %plan.id, title = %plan.title, "test plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn update_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TestPlanPatch>, JsonRejection>,
) -> Result<Json<TestPlan>, ApiError> {
    let patch = body(payload)?;
    state
        .plans
        .update(&id, patch)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Test plan not found".into()))
}

async fn delete_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.plans.delete(&id).await {
        info!(%id, "test plan deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Test plan not found".into()))
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

async fn list_executions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let records = state
        .executions
        .try_load()?
        .map(|envelope| envelope.executions)
        .unwrap_or_default();
    Ok(Json(records))
}

async fn upsert_execution(
    State(state): State<AppState>,
    payload: Result<Json<ExecutionRecord>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let record = body(payload)?;
    let id = record.id.clone();
    state.executions.try_upsert_batch(vec![record])?;
    Ok(Json(json!({ "id": id })))
}

async fn upsert_executions(
    State(state): State<AppState>,
    payload: Result<Json<Vec<ExecutionRecord>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let records = body(payload)?;
    let count = records.len();
    state.executions.try_upsert_batch(records)?;
    Ok(Json(json!({ "count": count })))
}

/// Always 204; deleting an unknown id is not an error.
async fn delete_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.executions.try_delete_by_id(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

async fn daily_report(State(state): State<AppState>) -> Json<DailySummary> {
    Json(state.report.refresh().statistics.clone())
}

async fn history_report(State(state): State<AppState>) -> Json<Vec<HistoricalBuild>> {
    Json(state.report.refresh().historical_builds.clone())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    module: Option<String>,
    result: Option<String>,
    test_type: Option<String>,
}

impl ExportQuery {
    fn into_filter(self) -> Result<CaseFilter, ApiError> {
        let result = self
            .result
            .map(|s| s.parse())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let test_type = self
            .test_type
            .map(|s| s.parse())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        Ok(CaseFilter {
            module: self.module.filter(|m| !m.is_empty()),
            result,
            test_type,
        })
    }
}

async fn export_report(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ReportExport>, ApiError> {
    let filter = query.into_filter()?;
    let snapshot = state.report.refresh();
    Ok(Json(report::export(&snapshot, &filter)))
}

// ---------------------------------------------------------------------------
// Simulated runs
// ---------------------------------------------------------------------------

async fn start_run(
    State(state): State<AppState>,
    payload: Result<Json<TestSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state.simulator.start(body(payload)?);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "recordId": handle.record_id })),
    ))
}

async fn start_runs(
    State(state): State<AppState>,
    payload: Result<Json<Vec<TestSpec>>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let specs = body(payload)?;
    let count = specs.len();
    state.simulator.start_batch(specs);
    Ok((StatusCode::ACCEPTED, Json(json!({ "count": count }))))
}
