//! Storage port of the build engine.
//!
//! Every method is a single atomic unit: implementations either run it in one
//! database transaction or under one lock. Nothing here computes derived
//! state, that is left to the engine modules.

use crate::{
    error::Result,
    ledger::{JobRunUpdate, UpdateOutcome},
    models::{Build, BuildRun, Job, JobRun, NewBuild, NewRepository, Repository},
};
use chrono::{DateTime, Utc};
use common::JobStatus;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub trait Store: Send + Sync {
    fn insert_repository(&self, new: NewRepository) -> Result<Repository>;

    /// Metadata refresh, the only mutation a repository accepts.
    fn update_repository(&self, id: i32, name: &str, url: &str) -> Result<Repository>;

    fn repository(&self, id: i32) -> Result<Option<Repository>>;

    fn build(&self, id: i32) -> Result<Option<Build>>;

    /// Builds ordered by id descending.
    fn builds_page(&self, limit: i64, offset: i64) -> Result<Vec<Build>>;

    /// Builds of one repository and head ordered by id descending, optionally
    /// restricted to ids strictly below `before`.
    fn builds_for_head(
        &self,
        repository_id: i32,
        head: &str,
        before: Option<i32>,
    ) -> Result<Vec<Build>>;

    fn build_by_delivery(
        &self,
        repository_id: i32,
        head: &str,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<Build>>;

    /// Inserts a build together with its jobs, in the given order. Fails with
    /// `Conflict` if the delivery key is already taken.
    fn insert_build_with_jobs(
        &self,
        new: NewBuild,
        job_names: &[String],
    ) -> Result<(Build, Vec<Job>)>;

    fn update_build_head(&self, id: i32, head: &str) -> Result<Build>;

    fn job(&self, id: i32) -> Result<Option<Job>>;

    /// Jobs of the given builds ordered by build id, ordering and id.
    fn jobs_for_builds(&self, build_ids: &[i32]) -> Result<Vec<Job>>;

    fn build_run(&self, id: i32) -> Result<Option<BuildRun>>;

    /// Build runs of a build ordered by id ascending.
    fn build_runs_for_build(&self, build_id: i32) -> Result<Vec<BuildRun>>;

    /// Appends a build run and one queued job run per job.
    fn insert_build_run(
        &self,
        build_id: i32,
        job_ids: &[i32],
        now: DateTime<Utc>,
    ) -> Result<(BuildRun, Vec<JobRun>)>;

    /// Overwrites the timestamps that are provided, keeps the others.
    fn update_build_run(
        &self,
        id: i32,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BuildRun>;

    fn job_run(&self, id: i32) -> Result<Option<JobRun>>;

    /// Job runs of one build run ordered by id ascending.
    fn job_runs_for_build_run(&self, build_run_id: i32) -> Result<Vec<JobRun>>;

    /// Job runs of the given jobs across all attempts, ordered by id ascending.
    fn job_runs_for_jobs(&self, job_ids: &[i32]) -> Result<Vec<JobRun>>;

    fn job_runs_with_status(&self, status: JobStatus) -> Result<Vec<JobRun>>;

    /// Reads the job run, validates the update with
    /// [`crate::ledger::apply_update`] and writes it back, all while holding
    /// the row.
    fn update_job_run(&self, id: i32, update: &JobRunUpdate) -> Result<UpdateOutcome>;
}
