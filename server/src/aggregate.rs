//! Fully derived views of builds.
//!
//! Every status in these views is recomputed from job runs on each read and
//! never written back.

use crate::{
    dispatcher,
    error::{Error, Result},
    ledger,
    lineage::{self, LastBuild},
    models::{Build, BuildRun, Job, JobRun, NewBuild, Repository},
    status,
    store::Store,
};
use chrono::{DateTime, Utc};
use common::{JobDefinition, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct JobView {
    pub id: i32,
    pub build_id: i32,
    pub name: String,
    pub ordering: i32,
    /// From the latest job run, `None` before the first attempt
    pub status: Option<JobStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BuildRunView {
    pub id: i32,
    pub build_id: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<JobStatus>,
    pub job_runs: Vec<JobRun>,
}

/// Listing view: no attempt detail, no lineage.
#[derive(Serialize, Debug, Clone)]
pub struct BuildSummary {
    #[serde(flatten)]
    pub build: Build,
    pub repository: Repository,
    pub jobs: Vec<JobView>,
}

#[derive(Serialize, Debug, Clone)]
pub struct BuildView {
    #[serde(flatten)]
    pub build: Build,
    pub repository: Repository,
    pub jobs: Vec<JobView>,
    pub runs: Vec<BuildRunView>,
    pub last_build: Option<LastBuild>,
}

/// Build-level fields a caller may change.
#[derive(Deserialize, Debug, Clone)]
pub struct BuildPatch {
    pub id: i32,
    pub head: Option<String>,
}

/// Keys of derived or nested data, never persisted through a build update.
const NESTED_KEYS: &[&str] = &["jobs", "repository", "runs", "last_build", "lastBuild"];

/// Derives a job's status and times from the job run with the greatest id.
pub fn derive_job(job: &Job, job_runs: &[JobRun]) -> JobView {
    let own: Vec<&JobRun> = job_runs.iter().filter(|run| run.job_id == job.id).collect();
    let latest = status::latest_of(&own, |run| run.id);

    JobView {
        id: job.id,
        build_id: job.build_id,
        name: job.name.clone(),
        ordering: job.ordering,
        status: latest.map(|run| run.status),
        start_time: latest.and_then(|run| run.start_time),
        end_time: latest.and_then(|run| run.end_time),
    }
}

pub fn derive_build_run(run: &BuildRun, job_runs: Vec<JobRun>) -> BuildRunView {
    BuildRunView {
        id: run.id,
        build_id: run.build_id,
        start_time: run.start_time,
        end_time: run.end_time,
        status: status::rollup(job_runs.iter().map(|job_run| job_run.status)),
        job_runs,
    }
}

fn repository_of(store: &dyn Store, build: &Build) -> Result<Repository> {
    store
        .repository(build.repository_id)?
        .ok_or(Error::not_found("repository", build.repository_id))
}

fn job_views(store: &dyn Store, build_ids: &[i32]) -> Result<Vec<JobView>> {
    let jobs = store.jobs_for_builds(build_ids)?;
    let job_ids: Vec<i32> = jobs.iter().map(|job| job.id).collect();
    let job_runs = store.job_runs_for_jobs(&job_ids)?;
    Ok(jobs.iter().map(|job| derive_job(job, &job_runs)).collect())
}

pub fn get_build(store: &dyn Store, id: i32) -> Result<BuildView> {
    let build = store.build(id)?.ok_or(Error::not_found("build", id))?;
    let repository = repository_of(store, &build)?;
    let jobs = job_views(store, &[build.id])?;

    let mut runs = Vec::new();
    for run in store.build_runs_for_build(build.id)? {
        let job_runs = store.job_runs_for_build_run(run.id)?;
        runs.push(derive_build_run(&run, job_runs));
    }

    let last_build = lineage::last_build(store, &build)?;

    Ok(BuildView {
        build,
        repository,
        jobs,
        runs,
        last_build,
    })
}

/// A page of builds, most recent first.
pub fn get_builds(store: &dyn Store, limit: i64, offset: i64) -> Result<Vec<BuildSummary>> {
    if limit < 0 || offset < 0 {
        return Err(Error::InvalidInput(format!(
            "invalid page limit={} offset={}",
            limit, offset
        )));
    }

    let builds = store.builds_page(limit, offset)?;
    let build_ids: Vec<i32> = builds.iter().map(|build| build.id).collect();
    let mut jobs_by_build: HashMap<i32, Vec<JobView>> = HashMap::new();
    for job in job_views(store, &build_ids)? {
        jobs_by_build.entry(job.build_id).or_default().push(job);
    }

    let mut repositories: HashMap<i32, Repository> = HashMap::new();
    let mut items = Vec::with_capacity(builds.len());
    for build in builds {
        let repository = match repositories.get(&build.repository_id) {
            Some(repository) => repository.clone(),
            None => {
                let repository = repository_of(store, &build)?;
                repositories.insert(repository.id, repository.clone());
                repository
            }
        };
        items.push(BuildSummary {
            jobs: jobs_by_build.remove(&build.id).unwrap_or_default(),
            repository,
            build,
        });
    }

    Ok(items)
}

/// Id of the latest attempt of a build, `None` before the first one.
pub fn get_last_run_id(store: &dyn Store, build_id: i32) -> Result<Option<i32>> {
    Ok(ledger::latest_build_run(store, build_id)?.map(|run| run.id))
}

/// Applies a partial update to a build's own fields.
///
/// Nested or derived data present in the patch (jobs, repository, runs,
/// lineage) is dropped before anything is persisted. Identity fields
/// (repository, provider, delivery id, creation time) are immutable and
/// ignored.
pub fn update_build(
    store: &dyn Store,
    mut patch: serde_json::Map<String, serde_json::Value>,
) -> Result<Build> {
    for key in NESTED_KEYS {
        if patch.remove(*key).is_some() {
            debug!("Discarding nested field {} from build update", key);
        }
    }

    let patch: BuildPatch = serde_json::from_value(serde_json::Value::Object(patch))
        .map_err(|e| Error::InvalidInput(format!("bad build patch: {}", e)))?;

    match patch.head {
        Some(head) if head.trim().is_empty() => {
            Err(Error::InvalidInput("head must not be empty".to_string()))
        }
        Some(head) => store.update_build_head(patch.id, &head),
        None => store.build(patch.id)?.ok_or(Error::not_found("build", patch.id)),
    }
}

/// A build is incomplete until its latest attempt both started and ended.
pub fn is_incomplete(store: &dyn Store, build: &Build) -> Result<bool> {
    let runs = store.build_runs_for_build(build.id)?;
    Ok(!status::latest_of(&runs, |run| run.id)
        .map(BuildRun::is_completed)
        .unwrap_or(false))
}

/// Creates a build and its jobs outside the ingestion path.
///
/// Refuses with `Conflict` while another build of the same repository and
/// head is still incomplete.
pub fn insert_build(
    store: &dyn Store,
    new: NewBuild,
    job_definitions: &[JobDefinition],
) -> Result<(Build, Vec<Job>)> {
    dispatcher::validate_build(
        &new.head,
        &new.provider,
        &new.provider_event_id,
        job_definitions,
    )?;

    for existing in store.builds_for_head(new.repository_id, &new.head, None)? {
        if is_incomplete(store, &existing)? {
            return Err(Error::Conflict(format!(
                "build {} for {} is still incomplete",
                existing.id, existing.head
            )));
        }
    }

    let names: Vec<String> = job_definitions.iter().map(|def| def.name.clone()).collect();
    store.insert_build_with_jobs(new, &names)
}
