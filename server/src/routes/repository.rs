use super::{ApiError, AppState};
use crate::{models::Repository, repository};
use axum::extract::{Json, Query, State};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RepositoryNewRequest {
    provider: String,
    name: String,
    url: String,
}

pub async fn repository_new(
    State(AppState { store, .. }): State<AppState>,
    Json(payload): Json<RepositoryNewRequest>,
) -> Result<Json<Repository>, ApiError> {
    Ok(Json(repository::register_repository(
        &*store,
        &payload.provider,
        &payload.name,
        &payload.url,
    )?))
}

#[derive(Deserialize)]
pub struct RepositoryRefreshRequest {
    repository_id: i32,
    name: String,
    url: String,
}

pub async fn repository_refresh(
    State(AppState { store, .. }): State<AppState>,
    Json(payload): Json<RepositoryRefreshRequest>,
) -> Result<Json<Repository>, ApiError> {
    Ok(Json(repository::refresh_repository(
        &*store,
        payload.repository_id,
        &payload.name,
        &payload.url,
    )?))
}

#[derive(Deserialize)]
pub struct RepositoryInfoRequest {
    repository_id: i32,
}

pub async fn repository_info(
    Query(query): Query<RepositoryInfoRequest>,
    State(AppState { store, .. }): State<AppState>,
) -> Result<Json<Repository>, ApiError> {
    Ok(Json(repository::get_repository(
        &*store,
        query.repository_id,
    )?))
}
