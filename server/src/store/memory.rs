//! In-process store, used by tests and by `BUILDIT_IN_MEMORY` development runs.

use super::Store;
use crate::{
    error::{Error, Result},
    ledger::{self, JobRunUpdate, UpdateOutcome},
    models::{Build, BuildRun, Job, JobRun, NewBuild, NewRepository, Repository},
};
use chrono::{DateTime, Utc};
use common::JobStatus;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    repositories: Vec<Repository>,
    builds: Vec<Build>,
    jobs: Vec<Job>,
    build_runs: Vec<BuildRun>,
    job_runs: Vec<JobRun>,
}

// ids are assigned in insertion order, starting at 1 like a SERIAL column
fn next_id(len: usize) -> i32 {
    len as i32 + 1
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn insert_repository(&self, new: NewRepository) -> Result<Repository> {
        let mut tables = self.tables();
        let repository = Repository {
            id: next_id(tables.repositories.len()),
            provider: new.provider,
            name: new.name,
            url: new.url,
            creation_time: new.creation_time,
        };
        tables.repositories.push(repository.clone());
        Ok(repository)
    }

    fn update_repository(&self, id: i32, name: &str, url: &str) -> Result<Repository> {
        let mut tables = self.tables();
        let repository = tables
            .repositories
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::not_found("repository", id))?;
        repository.name = name.to_string();
        repository.url = url.to_string();
        Ok(repository.clone())
    }

    fn repository(&self, id: i32) -> Result<Option<Repository>> {
        Ok(self
            .tables()
            .repositories
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    fn build(&self, id: i32) -> Result<Option<Build>> {
        Ok(self.tables().builds.iter().find(|b| b.id == id).cloned())
    }

    fn builds_page(&self, limit: i64, offset: i64) -> Result<Vec<Build>> {
        Ok(self
            .tables()
            .builds
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    fn builds_for_head(
        &self,
        repository_id: i32,
        head: &str,
        before: Option<i32>,
    ) -> Result<Vec<Build>> {
        Ok(self
            .tables()
            .builds
            .iter()
            .rev()
            .filter(|b| b.repository_id == repository_id && b.head == head)
            .filter(|b| before.map(|id| b.id < id).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn build_by_delivery(
        &self,
        repository_id: i32,
        head: &str,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<Build>> {
        Ok(self
            .tables()
            .builds
            .iter()
            .find(|b| {
                b.repository_id == repository_id
                    && b.head == head
                    && b.provider == provider
                    && b.provider_event_id == provider_event_id
            })
            .cloned())
    }

    fn insert_build_with_jobs(
        &self,
        new: NewBuild,
        job_names: &[String],
    ) -> Result<(Build, Vec<Job>)> {
        let mut tables = self.tables();
        if tables.builds.iter().any(|b| {
            b.repository_id == new.repository_id
                && b.head == new.head
                && b.provider == new.provider
                && b.provider_event_id == new.provider_event_id
        }) {
            return Err(Error::Conflict(format!(
                "event {}/{} was already ingested",
                new.provider, new.provider_event_id
            )));
        }
        if !tables.repositories.iter().any(|r| r.id == new.repository_id) {
            return Err(Error::not_found("repository", new.repository_id));
        }

        let build = Build {
            id: next_id(tables.builds.len()),
            repository_id: new.repository_id,
            head: new.head,
            provider: new.provider,
            provider_event_id: new.provider_event_id,
            creation_time: new.creation_time,
        };
        tables.builds.push(build.clone());

        let mut jobs = Vec::with_capacity(job_names.len());
        for (ordering, name) in job_names.iter().enumerate() {
            let job = Job {
                id: next_id(tables.jobs.len()),
                build_id: build.id,
                name: name.clone(),
                ordering: ordering as i32,
            };
            tables.jobs.push(job.clone());
            jobs.push(job);
        }

        Ok((build, jobs))
    }

    fn update_build_head(&self, id: i32, head: &str) -> Result<Build> {
        let mut tables = self.tables();
        let current = tables
            .builds
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(Error::not_found("build", id))?;
        if tables.builds.iter().any(|b| {
            b.id != id
                && b.repository_id == current.repository_id
                && b.head == head
                && b.provider == current.provider
                && b.provider_event_id == current.provider_event_id
        }) {
            return Err(Error::Conflict(format!(
                "build {} would duplicate the delivery of another build on {}",
                id, head
            )));
        }
        let build = tables
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(Error::not_found("build", id))?;
        build.head = head.to_string();
        Ok(build.clone())
    }

    fn job(&self, id: i32) -> Result<Option<Job>> {
        Ok(self.tables().jobs.iter().find(|j| j.id == id).cloned())
    }

    fn jobs_for_builds(&self, build_ids: &[i32]) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .tables()
            .jobs
            .iter()
            .filter(|j| build_ids.contains(&j.build_id))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.build_id, j.ordering, j.id));
        Ok(jobs)
    }

    fn build_run(&self, id: i32) -> Result<Option<BuildRun>> {
        Ok(self
            .tables()
            .build_runs
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    fn build_runs_for_build(&self, build_id: i32) -> Result<Vec<BuildRun>> {
        Ok(self
            .tables()
            .build_runs
            .iter()
            .filter(|r| r.build_id == build_id)
            .cloned()
            .collect())
    }

    fn insert_build_run(
        &self,
        build_id: i32,
        job_ids: &[i32],
        now: DateTime<Utc>,
    ) -> Result<(BuildRun, Vec<JobRun>)> {
        let mut tables = self.tables();
        if !tables.builds.iter().any(|b| b.id == build_id) {
            return Err(Error::not_found("build", build_id));
        }

        let run = BuildRun {
            id: next_id(tables.build_runs.len()),
            build_id,
            start_time: None,
            end_time: None,
        };
        tables.build_runs.push(run.clone());

        let mut job_runs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let job_run = JobRun {
                id: next_id(tables.job_runs.len()),
                job_id: *job_id,
                build_run_id: run.id,
                status: JobStatus::Queued,
                start_time: None,
                end_time: None,
                updated_time: now,
            };
            tables.job_runs.push(job_run.clone());
            job_runs.push(job_run);
        }

        Ok((run, job_runs))
    }

    fn update_build_run(
        &self,
        id: i32,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BuildRun> {
        let mut tables = self.tables();
        let run = tables
            .build_runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::not_found("build run", id))?;
        run.start_time = start_time.or(run.start_time);
        run.end_time = end_time.or(run.end_time);
        Ok(run.clone())
    }

    fn job_run(&self, id: i32) -> Result<Option<JobRun>> {
        Ok(self.tables().job_runs.iter().find(|r| r.id == id).cloned())
    }

    fn job_runs_for_build_run(&self, build_run_id: i32) -> Result<Vec<JobRun>> {
        Ok(self
            .tables()
            .job_runs
            .iter()
            .filter(|r| r.build_run_id == build_run_id)
            .cloned()
            .collect())
    }

    fn job_runs_for_jobs(&self, job_ids: &[i32]) -> Result<Vec<JobRun>> {
        Ok(self
            .tables()
            .job_runs
            .iter()
            .filter(|r| job_ids.contains(&r.job_id))
            .cloned()
            .collect())
    }

    fn job_runs_with_status(&self, status: JobStatus) -> Result<Vec<JobRun>> {
        Ok(self
            .tables()
            .job_runs
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    fn update_job_run(&self, id: i32, update: &JobRunUpdate) -> Result<UpdateOutcome> {
        let mut tables = self.tables();
        let current = tables
            .job_runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::not_found("job run", id))?;

        match ledger::apply_update(current, update)? {
            Some(next) => {
                *current = next.clone();
                Ok(UpdateOutcome::Applied(next))
            }
            None => Ok(UpdateOutcome::Stale(current.clone())),
        }
    }
}
