//! Finds the previous completed build of the same commit, for trend reports.

use crate::{
    error::Result,
    models::Build,
    status,
    store::Store,
};
use chrono::{DateTime, Utc};
use common::JobStatus;
use serde::Serialize;

/// The nearest earlier build of the same head that ran to completion.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LastBuild {
    pub build_id: i32,
    pub head: String,
    pub build_run_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    /// Rollup of the completed attempt's job runs
    pub status: Option<JobStatus>,
}

/// Walks builds with the same repository and head below `build.id`, newest
/// first, and returns the first one owning a build run that was both started
/// and ended. Queued-only attempts never count.
///
/// Lineage order is build id order, which is ingestion order, not wall-clock
/// time of the triggering events.
pub fn last_build(store: &dyn Store, build: &Build) -> Result<Option<LastBuild>> {
    for candidate in store.builds_for_head(build.repository_id, &build.head, Some(build.id))? {
        let mut runs = store.build_runs_for_build(candidate.id)?;
        runs.sort_by_key(|run| std::cmp::Reverse(run.id));

        let completed = runs
            .into_iter()
            .find_map(|run| Some((run.id, run.start_time?, run.end_time?)));
        if let Some((build_run_id, start_time, end_time)) = completed {
            let job_runs = store.job_runs_for_build_run(build_run_id)?;
            return Ok(Some(LastBuild {
                build_id: candidate.id,
                head: candidate.head,
                build_run_id,
                start_time,
                end_time,
                duration_secs: (end_time - start_time).num_seconds(),
                status: status::rollup(job_runs.iter().map(|job_run| job_run.status)),
            }));
        }
    }

    Ok(None)
}
