use crate::{
    error::{Error, Result},
    status,
    store::Store,
};
use common::JobStatus;
use tracing::{debug, error};

/// Pass/fail verdict of a build: true when the latest run of every job
/// succeeded. A job that never ran has not succeeded. A build without jobs
/// has no verdict and yields `NoJobs`.
pub fn evaluate(store: &dyn Store, build_id: i32) -> Result<bool> {
    if store.build(build_id)?.is_none() {
        return Err(Error::not_found("build", build_id));
    }

    let jobs = store.jobs_for_builds(&[build_id])?;
    if jobs.is_empty() {
        error!(build_id, "Cannot evaluate a build without jobs");
        return Err(Error::NoJobs(build_id));
    }

    let job_ids: Vec<i32> = jobs.iter().map(|job| job.id).collect();
    let job_runs = store.job_runs_for_jobs(&job_ids)?;

    let passed = jobs.iter().all(|job| {
        let own: Vec<_> = job_runs.iter().filter(|run| run.job_id == job.id).collect();
        status::latest_of(&own, |run| run.id).map(|run| run.status) == Some(JobStatus::Success)
    });

    debug!(build_id, passed, "Evaluated build");
    Ok(passed)
}
