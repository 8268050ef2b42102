//! Append-only record of build runs and job runs.
//!
//! The ledger only persists. Derived statuses are recomputed by readers.

use crate::{
    error::{Error, Result},
    models::{BuildRun, JobRun},
    status,
    store::Store,
};
use chrono::{DateTime, Utc};
use common::JobStatus;
use serde::Serialize;
use tracing::{debug, info, warn};

/// A status report for one job run.
#[derive(Debug, Clone)]
pub struct JobRunUpdate {
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// When the transition happened, orders concurrent reports
    pub reported_at: DateTime<Utc>,
}

impl JobRunUpdate {
    pub fn new(status: JobStatus, reported_at: DateTime<Utc>) -> Self {
        Self {
            status,
            start_time: None,
            end_time: None,
            reported_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "job_run", rename_all = "lowercase")]
pub enum UpdateOutcome {
    Applied(JobRun),
    /// A newer report was already recorded, the row is unchanged
    Stale(JobRun),
}

impl UpdateOutcome {
    pub fn job_run(&self) -> &JobRun {
        match self {
            UpdateOutcome::Applied(run) | UpdateOutcome::Stale(run) => run,
        }
    }
}

/// Validates `update` against the stored row and computes the new row.
///
/// Returns `Ok(None)` when the update is older than the last accepted one.
/// Terminal statuses are final: reporting any other status for a `failed` or
/// `success` run is an `InvalidTransition`, repeating the same one leaves the
/// row untouched and also yields `Ok(None)`.
pub fn apply_update(current: &JobRun, update: &JobRunUpdate) -> Result<Option<JobRun>> {
    if current.status.is_terminal() {
        if update.status != current.status {
            return Err(Error::InvalidTransition {
                job_run_id: current.id,
                from: current.status,
                to: update.status,
            });
        }
        return Ok(None);
    }

    if update.reported_at < current.updated_time {
        return Ok(None);
    }

    let mut start_time = update.start_time.or(current.start_time);
    let mut end_time = update.end_time.or(current.end_time);
    if update.status != JobStatus::Queued && start_time.is_none() {
        start_time = Some(update.reported_at);
    }
    if update.status.is_terminal() && end_time.is_none() {
        end_time = Some(update.reported_at);
    }

    Ok(Some(JobRun {
        status: update.status,
        start_time,
        end_time,
        updated_time: update.reported_at,
        ..current.clone()
    }))
}

/// Begins a new attempt of a build: one build run plus a queued job run for
/// every selected job, all jobs of the build when `job_ids` is `None`.
pub fn start_build_run(
    store: &dyn Store,
    build_id: i32,
    job_ids: Option<&[i32]>,
) -> Result<(BuildRun, Vec<JobRun>)> {
    if store.build(build_id)?.is_none() {
        return Err(Error::not_found("build", build_id));
    }

    let jobs = store.jobs_for_builds(&[build_id])?;
    let selected: Vec<i32> = match job_ids {
        Some(ids) => {
            if let Some(foreign) = ids.iter().find(|id| !jobs.iter().any(|job| job.id == **id)) {
                return Err(Error::InvalidInput(format!(
                    "job {} does not belong to build {}",
                    foreign, build_id
                )));
            }
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            ids
        }
        None => jobs.iter().map(|job| job.id).collect(),
    };

    if selected.is_empty() {
        return Err(Error::InvalidInput(format!(
            "attempt of build {} would run no job",
            build_id
        )));
    }

    let (run, job_runs) = store.insert_build_run(build_id, &selected, Utc::now())?;
    info!(
        build_id,
        build_run_id = run.id,
        job_runs = job_runs.len(),
        "Started build run"
    );
    Ok((run, job_runs))
}

/// Records a worker report for one job run.
pub fn record_job_run_update(
    store: &dyn Store,
    job_run_id: i32,
    update: JobRunUpdate,
) -> Result<UpdateOutcome> {
    let outcome = store.update_job_run(job_run_id, &update)?;
    match &outcome {
        UpdateOutcome::Applied(run) => {
            debug!(job_run_id, status = %run.status, "Recorded job run update")
        }
        UpdateOutcome::Stale(run) => info!(
            job_run_id,
            status = %update.status,
            current = %run.status,
            "Discarded stale job run update"
        ),
    }
    Ok(outcome)
}

/// Stamps the start and end time of a whole attempt.
pub fn record_build_run_update(
    store: &dyn Store,
    build_run_id: i32,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
) -> Result<BuildRun> {
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end < start {
            return Err(Error::InvalidInput(format!(
                "build run {} ends before it starts",
                build_run_id
            )));
        }
    }
    store.update_build_run(build_run_id, start_time, end_time)
}

pub fn job_runs_for_build_run(store: &dyn Store, build_run_id: i32) -> Result<Vec<JobRun>> {
    if store.build_run(build_run_id)?.is_none() {
        return Err(Error::not_found("build run", build_run_id));
    }
    store.job_runs_for_build_run(build_run_id)
}

pub fn job_runs_for_job(store: &dyn Store, job_id: i32) -> Result<Vec<JobRun>> {
    if store.job(job_id)?.is_none() {
        return Err(Error::not_found("job", job_id));
    }
    store.job_runs_for_jobs(&[job_id])
}

pub fn latest_build_run(store: &dyn Store, build_id: i32) -> Result<Option<BuildRun>> {
    if store.build(build_id)?.is_none() {
        return Err(Error::not_found("build", build_id));
    }
    let runs = store.build_runs_for_build(build_id)?;
    Ok(status::latest_of(&runs, |run| run.id).cloned())
}

/// Fails every job run of the build that is still queued or running.
/// Returns how many job runs were closed.
pub fn cancel_build(store: &dyn Store, build_id: i32) -> Result<usize> {
    if store.build(build_id)?.is_none() {
        return Err(Error::not_found("build", build_id));
    }

    let mut closed = 0;
    for run in store.build_runs_for_build(build_id)? {
        for job_run in store.job_runs_for_build_run(run.id)? {
            if job_run.status.is_terminal() {
                continue;
            }
            // ordered after whatever the worker reported last
            let now = Utc::now().max(job_run.updated_time);
            let update = JobRunUpdate {
                end_time: Some(now),
                ..JobRunUpdate::new(JobStatus::Failed, now)
            };
            match record_job_run_update(store, job_run.id, update) {
                Ok(UpdateOutcome::Applied(_)) => closed += 1,
                Ok(UpdateOutcome::Stale(_)) => {}
                // finished by its worker in the meantime
                Err(Error::InvalidTransition { .. }) => {
                    warn!(job_run_id = job_run.id, "Job run finished while cancelling")
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(build_id, closed, "Cancelled build");
    Ok(closed)
}
