use super::{ApiError, AppState};
use crate::{
    aggregate::{self, BuildSummary, BuildView},
    evaluator, ledger,
    models::{Build, NewBuild},
};
use axum::extract::{Json, Query, State};
use chrono::Utc;
use common::WebhookEvent;
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Deserialize)]
pub struct BuildListRequest {
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn build_list(
    Query(query): Query<BuildListRequest>,
    State(AppState { store, .. }): State<AppState>,
) -> Result<Json<Vec<BuildSummary>>, ApiError> {
    Ok(Json(aggregate::get_builds(
        &*store,
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        query.offset.unwrap_or(0),
    )?))
}

#[derive(Deserialize)]
pub struct BuildIdRequest {
    build_id: i32,
}

pub async fn build_info(
    Query(query): Query<BuildIdRequest>,
    State(AppState { store, .. }): State<AppState>,
) -> Result<Json<BuildView>, ApiError> {
    Ok(Json(aggregate::get_build(&*store, query.build_id)?))
}

#[derive(Serialize)]
pub struct BuildStatusResponse {
    build_id: i32,
    passed: bool,
}

pub async fn build_status(
    Query(query): Query<BuildIdRequest>,
    State(AppState { store, .. }): State<AppState>,
) -> Result<Json<BuildStatusResponse>, ApiError> {
    Ok(Json(BuildStatusResponse {
        build_id: query.build_id,
        passed: evaluator::evaluate(&*store, query.build_id)?,
    }))
}

#[derive(Serialize)]
pub struct BuildLastRunResponse {
    build_id: i32,
    build_run_id: Option<i32>,
}

pub async fn build_last_run(
    Query(query): Query<BuildIdRequest>,
    State(AppState { store, .. }): State<AppState>,
) -> Result<Json<BuildLastRunResponse>, ApiError> {
    Ok(Json(BuildLastRunResponse {
        build_id: query.build_id,
        build_run_id: aggregate::get_last_run_id(&*store, query.build_id)?,
    }))
}

#[derive(Serialize)]
pub struct BuildNewResponse {
    build_id: i32,
    job_ids: Vec<i32>,
}

/// Manual build creation, bypassing delivery deduplication.
pub async fn build_new(
    State(AppState { store, .. }): State<AppState>,
    Json(payload): Json<WebhookEvent>,
) -> Result<Json<BuildNewResponse>, ApiError> {
    let new = NewBuild {
        repository_id: payload.repository_id,
        head: payload.head,
        provider: payload.provider,
        provider_event_id: payload.provider_event_id,
        creation_time: Utc::now(),
    };
    let (build, jobs) = aggregate::insert_build(&*store, new, &payload.job_definitions)?;
    Ok(Json(BuildNewResponse {
        build_id: build.id,
        job_ids: jobs.iter().map(|job| job.id).collect(),
    }))
}

pub async fn build_update(
    State(AppState { store, .. }): State<AppState>,
    Json(patch): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<Build>, ApiError> {
    Ok(Json(aggregate::update_build(&*store, patch)?))
}

#[derive(Deserialize)]
pub struct BuildCancelRequest {
    build_id: i32,
}

#[derive(Serialize)]
pub struct BuildCancelResponse {
    build_id: i32,
    closed_job_runs: usize,
}

pub async fn build_cancel(
    State(AppState { store, .. }): State<AppState>,
    Json(payload): Json<BuildCancelRequest>,
) -> Result<Json<BuildCancelResponse>, ApiError> {
    Ok(Json(BuildCancelResponse {
        build_id: payload.build_id,
        closed_job_runs: ledger::cancel_build(&*store, payload.build_id)?,
    }))
}
