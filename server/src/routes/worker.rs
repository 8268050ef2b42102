use super::{ApiError, AppState};
use crate::{
    ledger::{self, JobRunUpdate, UpdateOutcome},
    models::BuildRun,
};
use axum::extract::{Json, State};
use chrono::Utc;
use common::{
    WorkerBuildRunNewRequest, WorkerBuildRunNewResponse, WorkerBuildRunUpdateRequest,
    WorkerJobRunItem, WorkerJobRunUpdateRequest,
};
use tracing::info;

pub async fn worker_build_run_new(
    State(state): State<AppState>,
    Json(payload): Json<WorkerBuildRunNewRequest>,
) -> Result<Json<WorkerBuildRunNewResponse>, ApiError> {
    state.check_worker_secret(&payload.worker_secret)?;

    let (run, job_runs) =
        ledger::start_build_run(&*state.store, payload.build_id, payload.job_ids.as_deref())?;
    Ok(Json(WorkerBuildRunNewResponse {
        build_run_id: run.id,
        job_runs: job_runs
            .into_iter()
            .map(|job_run| WorkerJobRunItem {
                job_run_id: job_run.id,
                job_id: job_run.job_id,
            })
            .collect(),
    }))
}

pub async fn worker_build_run_update(
    State(state): State<AppState>,
    Json(payload): Json<WorkerBuildRunUpdateRequest>,
) -> Result<Json<BuildRun>, ApiError> {
    state.check_worker_secret(&payload.worker_secret)?;

    info!(
        "Worker reported build run {}: start {:?}, end {:?}",
        payload.build_run_id, payload.start_time, payload.end_time
    );
    Ok(Json(ledger::record_build_run_update(
        &*state.store,
        payload.build_run_id,
        payload.start_time,
        payload.end_time,
    )?))
}

pub async fn worker_job_run_update(
    State(state): State<AppState>,
    Json(payload): Json<WorkerJobRunUpdateRequest>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    state.check_worker_secret(&payload.worker_secret)?;

    // reports without their own timestamp are ordered by arrival
    let update = JobRunUpdate {
        start_time: payload.start_time,
        end_time: payload.end_time,
        ..JobRunUpdate::new(payload.status, payload.reported_at.unwrap_or_else(Utc::now))
    };
    Ok(Json(ledger::record_job_run_update(
        &*state.store,
        payload.job_run_id,
        update,
    )?))
}
