#![allow(dead_code)]

use chrono::{Duration, Utc};
use common::{JobDefinition, JobStatus, WebhookEvent};
use server::{
    dispatcher::{self, IngestOutcome},
    ledger::{self, JobRunUpdate},
    models::{BuildRun, JobRun, Repository},
    repository::register_repository,
    store::{MemoryStore, Store},
};

pub fn store_with_repository() -> (MemoryStore, Repository) {
    let store = MemoryStore::new();
    let repository = register_repository(
        &store,
        "github",
        "AOSC-Dev/aosc-os-abbs",
        "https://github.com/AOSC-Dev/aosc-os-abbs",
    )
    .unwrap();
    (store, repository)
}

pub fn event(repository_id: i32, head: &str, event_id: &str, jobs: &[&str]) -> WebhookEvent {
    WebhookEvent {
        repository_id,
        head: head.to_string(),
        provider: "github".to_string(),
        provider_event_id: event_id.to_string(),
        job_definitions: jobs
            .iter()
            .map(|name| JobDefinition {
                name: name.to_string(),
            })
            .collect(),
    }
}

pub fn ingest_build(
    store: &dyn Store,
    repository_id: i32,
    head: &str,
    event_id: &str,
    jobs: &[&str],
) -> i32 {
    match dispatcher::ingest(store, &event(repository_id, head, event_id, jobs)).unwrap() {
        IngestOutcome::Created(id) => id,
        IngestOutcome::Duplicate(id) => {
            panic!("event {} was already ingested as {}", event_id, id)
        }
    }
}

/// Reports `status` now, but never before the last accepted report, so
/// successive calls are always ordered.
pub fn report(store: &dyn Store, job_run_id: i32, status: JobStatus) -> JobRun {
    let current = store.job_run(job_run_id).unwrap().unwrap();
    let reported_at = Utc::now().max(current.updated_time + Duration::milliseconds(1));
    ledger::record_job_run_update(store, job_run_id, JobRunUpdate::new(status, reported_at))
    .unwrap()
    .job_run()
    .clone()
}

/// Runs one attempt of the whole build to completion, the n-th job run ending
/// in `statuses[n]`.
pub fn complete_build_run(store: &dyn Store, build_id: i32, statuses: &[JobStatus]) -> BuildRun {
    let (run, job_runs) = ledger::start_build_run(store, build_id, None).unwrap();
    assert_eq!(job_runs.len(), statuses.len());

    let start = job_runs[0].updated_time;
    let mut end = start;
    for (job_run, status) in job_runs.iter().zip(statuses) {
        report(store, job_run.id, JobStatus::Running);
        let done = report(store, job_run.id, *status);
        end = end.max(done.updated_time);
    }

    ledger::record_build_run_update(store, run.id, Some(start), Some(end)).unwrap()
}
