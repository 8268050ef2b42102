mod support;

use chrono::{Duration, Utc};
use common::JobStatus;
use proptest::prelude::*;
use serde_json::json;
use server::{
    aggregate, dispatcher,
    dispatcher::IngestOutcome,
    error::Error,
    evaluator,
    ledger::{self, JobRunUpdate},
    lineage,
    models::{JobRun, NewBuild},
    repository,
    status,
    store::Store,
};
use support::{complete_build_run, event, ingest_build, report, store_with_repository};

fn status_strategy() -> impl Strategy<Value = JobStatus> {
    prop::sample::select(JobStatus::ALL.to_vec())
}

proptest! {
    /// The rollup is the highest-precedence status present, in any order.
    #[test]
    fn prop_rollup_permutation_invariant(
        (statuses, shuffled) in prop::collection::vec(status_strategy(), 1..16)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let expected = statuses
            .iter()
            .copied()
            .max_by_key(|s| status::precedence(*s));
        prop_assert_eq!(status::rollup(statuses.clone()), expected);
        prop_assert_eq!(status::rollup(shuffled), expected);
        prop_assert!(statuses.contains(&status::rollup(statuses.clone()).unwrap()));
    }

    /// A job shows exactly what its max-id job run shows.
    #[test]
    fn prop_job_derivation_follows_max_id(
        runs in prop::collection::vec((status_strategy(), 0i64..1000), 1..12)
            .prop_flat_map(|v| Just(v).prop_shuffle())
    ) {
        let t0 = Utc::now();
        let job_runs: Vec<JobRun> = runs
            .iter()
            .enumerate()
            .map(|(i, (status, offset))| JobRun {
                // ids stay unique, the shuffle decides their order in the slice
                id: (*offset as i32) * 100 + i as i32,
                job_id: 1,
                build_run_id: 1,
                status: *status,
                start_time: Some(t0 + Duration::seconds(*offset)),
                end_time: None,
                updated_time: t0,
            })
            .collect();
        let job = server::models::Job {
            id: 1,
            build_id: 1,
            name: "amd64".to_string(),
            ordering: 0,
        };

        let latest = job_runs.iter().max_by_key(|run| run.id).unwrap();
        let view = aggregate::derive_job(&job, &job_runs);
        prop_assert_eq!(view.status, Some(latest.status));
        prop_assert_eq!(view.start_time, latest.start_time);
        prop_assert_eq!(view.end_time, latest.end_time);
    }
}

#[test]
fn test_empty_rollup_is_not_success() {
    assert_eq!(status::rollup(std::iter::empty()), None);
}

#[test]
fn test_ingest_is_idempotent() {
    let (store, repo) = store_with_repository();
    let ev = event(repo.id, "deadbeef", "delivery-1", &["amd64", "arm64"]);

    let first = dispatcher::ingest(&store, &ev).unwrap();
    let second = dispatcher::ingest(&store, &ev).unwrap();
    assert!(matches!(first, IngestOutcome::Created(_)));
    assert_eq!(second, IngestOutcome::Duplicate(first.build_id()));
    assert_eq!(store.builds_page(100, 0).unwrap().len(), 1);
    assert_eq!(store.jobs_for_builds(&[first.build_id()]).unwrap().len(), 2);

    // same commit, new delivery
    let third = dispatcher::ingest(&store, &event(repo.id, "deadbeef", "delivery-2", &["amd64"]))
        .unwrap();
    assert!(matches!(third, IngestOutcome::Created(id) if id != first.build_id()));
}

#[test]
fn test_ingest_rejects_bad_events() {
    let (store, repo) = store_with_repository();

    for ev in [
        event(repo.id, "deadbeef", "delivery-1", &[]),
        event(repo.id, "", "delivery-1", &["amd64"]),
        event(repo.id, "deadbeef", " ", &["amd64"]),
    ] {
        assert!(matches!(
            dispatcher::ingest(&store, &ev),
            Err(Error::InvalidInput(_))
        ));
    }

    assert!(matches!(
        dispatcher::ingest(&store, &event(repo.id + 1, "deadbeef", "delivery-1", &["amd64"])),
        Err(Error::NotFound {
            entity: "repository",
            ..
        })
    ));
    assert!(store.builds_page(100, 0).unwrap().is_empty());
}

#[test]
fn test_jobs_keep_definition_order() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["riscv64", "amd64", "arm64"]);
    let view = aggregate::get_build(&store, build_id).unwrap();
    let names: Vec<&str> = view.jobs.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(names, ["riscv64", "amd64", "arm64"]);
    assert!(view.jobs.iter().all(|job| job.status.is_none()));
}

#[test]
fn test_job_run_transitions() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    let (_, job_runs) = ledger::start_build_run(&store, build_id, None).unwrap();
    let id = job_runs[0].id;
    assert_eq!(job_runs[0].status, JobStatus::Queued);

    assert_eq!(report(&store, id, JobStatus::Running).status, JobStatus::Running);
    let done = report(&store, id, JobStatus::Success);
    assert_eq!(done.status, JobStatus::Success);
    assert!(done.start_time.is_some());
    assert!(done.end_time.is_some());

    let err = ledger::record_job_run_update(
        &store,
        id,
        JobRunUpdate::new(JobStatus::Running, done.updated_time + Duration::seconds(1)),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: JobStatus::Success,
            to: JobStatus::Running,
            ..
        }
    ));

    assert!(matches!(
        ledger::record_job_run_update(&store, 9999, JobRunUpdate::new(JobStatus::Running, Utc::now())),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_out_of_order_reports() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    let (_, job_runs) = ledger::start_build_run(&store, build_id, None).unwrap();
    let id = job_runs[0].id;
    let t0 = job_runs[0].updated_time;

    // the queued report was sent first but arrives last
    ledger::record_job_run_update(
        &store,
        id,
        JobRunUpdate::new(JobStatus::Running, t0 + Duration::seconds(10)),
    )
    .unwrap();
    let outcome = ledger::record_job_run_update(
        &store,
        id,
        JobRunUpdate::new(JobStatus::Queued, t0 + Duration::seconds(5)),
    )
    .unwrap();
    assert!(matches!(outcome, ledger::UpdateOutcome::Stale(_)));
    assert_eq!(outcome.job_run().status, JobStatus::Running);
    assert_eq!(outcome.job_run().updated_time, t0 + Duration::seconds(10));
}

#[test]
fn test_start_build_run_selection() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64", "arm64"]);
    let other_id = ingest_build(&store, repo.id, "abc", "2", &["amd64"]);
    let jobs = store.jobs_for_builds(&[build_id]).unwrap();
    let other_jobs = store.jobs_for_builds(&[other_id]).unwrap();

    let (run, job_runs) = ledger::start_build_run(&store, build_id, Some(&[jobs[1].id])).unwrap();
    assert_eq!(job_runs.len(), 1);
    assert_eq!(job_runs[0].job_id, jobs[1].id);
    assert_eq!(job_runs[0].build_run_id, run.id);

    assert!(matches!(
        ledger::start_build_run(&store, build_id, Some(&[other_jobs[0].id])),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        ledger::start_build_run(&store, build_id, Some(&[])),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        ledger::start_build_run(&store, 9999, None),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_build_run_rollup() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["a", "b", "c", "d"]);
    let jobs = store.jobs_for_builds(&[build_id]).unwrap();
    let job_ids: Vec<i32> = jobs.iter().take(3).map(|job| job.id).collect();
    let (run, job_runs) = ledger::start_build_run(&store, build_id, Some(&job_ids)).unwrap();

    report(&store, job_runs[0].id, JobStatus::Success);
    report(&store, job_runs[1].id, JobStatus::Failed);
    report(&store, job_runs[2].id, JobStatus::Running);

    let view = aggregate::get_build(&store, build_id).unwrap();
    assert_eq!(view.runs.len(), 1);
    assert_eq!(view.runs[0].id, run.id);
    assert_eq!(view.runs[0].status, Some(JobStatus::Running));

    let mut job_runs = store.job_runs_for_build_run(run.id).unwrap();
    let queued = JobRun {
        id: job_runs[2].id + 1,
        job_id: jobs[3].id,
        status: JobStatus::Queued,
        start_time: None,
        ..job_runs[0].clone()
    };
    job_runs.push(queued);
    assert_eq!(
        aggregate::derive_build_run(&run, job_runs).status,
        Some(JobStatus::Queued)
    );
}

#[test]
fn test_job_status_follows_latest_attempt() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    complete_build_run(&store, build_id, &[JobStatus::Failed]);
    complete_build_run(&store, build_id, &[JobStatus::Success]);

    let view = aggregate::get_build(&store, build_id).unwrap();
    assert_eq!(view.jobs[0].status, Some(JobStatus::Success));
    assert_eq!(view.runs.len(), 2);
    assert_eq!(view.runs[0].status, Some(JobStatus::Failed));
    assert_eq!(view.runs[1].status, Some(JobStatus::Success));
    assert_eq!(
        aggregate::get_last_run_id(&store, build_id).unwrap(),
        Some(view.runs[1].id)
    );
}

#[test]
fn test_last_run_id() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    assert_eq!(aggregate::get_last_run_id(&store, build_id).unwrap(), None);

    let (first, _) = ledger::start_build_run(&store, build_id, None).unwrap();
    let (second, _) = ledger::start_build_run(&store, build_id, None).unwrap();
    assert!(second.id > first.id);
    assert_eq!(
        aggregate::get_last_run_id(&store, build_id).unwrap(),
        Some(second.id)
    );

    assert!(matches!(
        aggregate::get_last_run_id(&store, 9999),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_lineage() {
    let (store, repo) = store_with_repository();
    let b1 = ingest_build(&store, repo.id, "H", "1", &["amd64"]);
    let run1 = complete_build_run(&store, b1, &[JobStatus::Success]);
    let b2 = ingest_build(&store, repo.id, "H", "2", &["amd64"]);
    let run2 = complete_build_run(&store, b2, &[JobStatus::Failed]);
    // a newer attempt of b2 that never started does not hide the completed one
    ledger::start_build_run(&store, b2, None).unwrap();
    let b3 = ingest_build(&store, repo.id, "H", "3", &["amd64"]);
    ledger::start_build_run(&store, b3, None).unwrap();
    // other heads are not part of the lineage
    let other = ingest_build(&store, repo.id, "other", "4", &["amd64"]);
    complete_build_run(&store, other, &[JobStatus::Success]);

    let last = |id| lineage::last_build(&store, &store.build(id).unwrap().unwrap()).unwrap();

    let from_b3 = last(b3).unwrap();
    assert_eq!(from_b3.build_id, b2);
    assert_eq!(from_b3.build_run_id, run2.id);
    assert_eq!(from_b3.status, Some(JobStatus::Failed));
    assert!(from_b3.duration_secs >= 0);

    let from_b2 = last(b2).unwrap();
    assert_eq!(from_b2.build_id, b1);
    assert_eq!(from_b2.build_run_id, run1.id);
    assert_eq!(from_b2.status, Some(JobStatus::Success));

    assert_eq!(last(b1), None);

    let view = aggregate::get_build(&store, b3).unwrap();
    assert_eq!(view.last_build.map(|l| l.build_id), Some(b2));
}

#[test]
fn test_evaluate() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["j1", "j2"]);
    // no attempt yet
    assert!(!evaluator::evaluate(&store, build_id).unwrap());

    let (_, job_runs) = ledger::start_build_run(&store, build_id, None).unwrap();
    report(&store, job_runs[0].id, JobStatus::Success);
    report(&store, job_runs[1].id, JobStatus::Running);
    assert!(!evaluator::evaluate(&store, build_id).unwrap());

    report(&store, job_runs[1].id, JobStatus::Success);
    assert!(evaluator::evaluate(&store, build_id).unwrap());

    // a failed retry of j1 overrides its earlier success
    let jobs = store.jobs_for_builds(&[build_id]).unwrap();
    let (_, retry) = ledger::start_build_run(&store, build_id, Some(&[jobs[0].id])).unwrap();
    report(&store, retry[0].id, JobStatus::Failed);
    assert!(!evaluator::evaluate(&store, build_id).unwrap());

    assert!(matches!(
        evaluator::evaluate(&store, 9999),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_evaluate_without_jobs() {
    let (store, repo) = store_with_repository();
    let (build, _) = store
        .insert_build_with_jobs(
            NewBuild {
                repository_id: repo.id,
                head: "abc".to_string(),
                provider: "github".to_string(),
                provider_event_id: "1".to_string(),
                creation_time: Utc::now(),
            },
            &[],
        )
        .unwrap();
    assert!(matches!(
        evaluator::evaluate(&store, build.id),
        Err(Error::NoJobs(id)) if id == build.id
    ));
}

#[test]
fn test_list_builds() {
    let (store, repo) = store_with_repository();
    for i in 1..=5 {
        ingest_build(&store, repo.id, "abc", &i.to_string(), &["amd64"]);
    }

    let ids = |limit, offset| -> Vec<i32> {
        aggregate::get_builds(&store, limit, offset)
            .unwrap()
            .iter()
            .map(|summary| summary.build.id)
            .collect()
    };
    assert_eq!(ids(2, 0), [5, 4]);
    assert_eq!(ids(2, 2), [3, 2]);
    assert_eq!(ids(10, 4), [1]);
    assert!(ids(10, 5).is_empty());

    let page = aggregate::get_builds(&store, 1, 0).unwrap();
    assert_eq!(page[0].repository.id, repo.id);
    assert_eq!(page[0].jobs.len(), 1);

    assert!(matches!(
        aggregate::get_builds(&store, -1, 0),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_cancel_build() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["a", "b", "c"]);
    let (_, job_runs) = ledger::start_build_run(&store, build_id, None).unwrap();
    report(&store, job_runs[0].id, JobStatus::Success);
    report(&store, job_runs[1].id, JobStatus::Running);

    assert_eq!(ledger::cancel_build(&store, build_id).unwrap(), 2);
    let statuses: Vec<JobStatus> = store
        .job_runs_for_build_run(job_runs[0].build_run_id)
        .unwrap()
        .iter()
        .map(|job_run| job_run.status)
        .collect();
    assert_eq!(
        statuses,
        [JobStatus::Success, JobStatus::Failed, JobStatus::Failed]
    );

    // nothing open any more
    assert_eq!(ledger::cancel_build(&store, build_id).unwrap(), 0);
    assert!(!evaluator::evaluate(&store, build_id).unwrap());
}

#[test]
fn test_update_build_discards_nested_data() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64", "arm64"]);

    let patch = json!({
        "id": build_id,
        "head": "def",
        "jobs": [{ "name": "riscv64" }],
        "runs": [],
        "repository": { "id": 42 },
        "lastBuild": null,
    });
    let serde_json::Value::Object(patch) = patch else {
        unreachable!()
    };
    let build = aggregate::update_build(&store, patch).unwrap();
    assert_eq!(build.head, "def");
    assert_eq!(build.repository_id, repo.id);
    assert_eq!(store.jobs_for_builds(&[build_id]).unwrap().len(), 2);

    let serde_json::Value::Object(no_id) = json!({ "head": "x" }) else {
        unreachable!()
    };
    assert!(matches!(
        aggregate::update_build(&store, no_id),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_insert_build_conflict() {
    let (store, repo) = store_with_repository();
    let new = |event_id: &str| NewBuild {
        repository_id: repo.id,
        head: "abc".to_string(),
        provider: "manual".to_string(),
        provider_event_id: event_id.to_string(),
        creation_time: Utc::now(),
    };
    let defs = event(repo.id, "abc", "-", &["amd64"]).job_definitions;

    let (build, jobs) = aggregate::insert_build(&store, new("1"), &defs).unwrap();
    assert_eq!(jobs.len(), 1);

    assert!(matches!(
        aggregate::insert_build(&store, new("2"), &defs),
        Err(Error::Conflict(_))
    ));

    complete_build_run(&store, build.id, &[JobStatus::Success]);
    assert!(aggregate::insert_build(&store, new("2"), &defs).is_ok());
}

#[test]
fn test_insert_build_rejects_bad_input() {
    let (store, repo) = store_with_repository();
    let new = |head: &str, provider: &str, event_id: &str| NewBuild {
        repository_id: repo.id,
        head: head.to_string(),
        provider: provider.to_string(),
        provider_event_id: event_id.to_string(),
        creation_time: Utc::now(),
    };
    let defs = event(repo.id, "abc", "-", &["amd64"]).job_definitions;
    let unnamed = event(repo.id, "abc", "-", &["amd64", " "]).job_definitions;

    for (new, defs) in [
        (new("", "manual", "1"), &defs),
        (new("abc", " ", "1"), &defs),
        (new("abc", "manual", ""), &defs),
        (new("abc", "manual", "1"), &unnamed),
        (new("abc", "manual", "1"), &Vec::new()),
    ] {
        assert!(matches!(
            aggregate::insert_build(&store, new, defs),
            Err(Error::InvalidInput(_))
        ));
    }
    assert!(store.builds_page(100, 0).unwrap().is_empty());
}

#[test]
fn test_update_build_head_keeps_deliveries_unique() {
    let (store, repo) = store_with_repository();
    // the same delivery id on two heads
    let b1 = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    let b2 = ingest_build(&store, repo.id, "def", "1", &["amd64"]);

    let serde_json::Value::Object(patch) = json!({ "id": b2, "head": "abc" }) else {
        unreachable!()
    };
    assert!(matches!(
        aggregate::update_build(&store, patch),
        Err(Error::Conflict(_))
    ));
    assert_eq!(store.build(b2).unwrap().unwrap().head, "def");

    // renaming onto its own head is fine
    let serde_json::Value::Object(patch) = json!({ "id": b1, "head": "abc" }) else {
        unreachable!()
    };
    assert_eq!(aggregate::update_build(&store, patch).unwrap().head, "abc");
}

#[test]
fn test_finished_job_run_ignores_redelivery() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    let (_, job_runs) = ledger::start_build_run(&store, build_id, None).unwrap();
    let id = job_runs[0].id;
    report(&store, id, JobStatus::Running);
    let done = report(&store, id, JobStatus::Failed);

    let later = done.updated_time + Duration::hours(2);
    let outcome = ledger::record_job_run_update(
        &store,
        id,
        JobRunUpdate {
            status: JobStatus::Failed,
            start_time: Some(later),
            end_time: Some(later),
            reported_at: later,
        },
    )
    .unwrap();
    assert!(matches!(outcome, ledger::UpdateOutcome::Stale(_)));
    assert_eq!(store.job_run(id).unwrap().unwrap(), done);
}

#[test]
fn test_build_run_times() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64"]);
    let (run, _) = ledger::start_build_run(&store, build_id, None).unwrap();
    let t0 = Utc::now();

    let started = ledger::record_build_run_update(&store, run.id, Some(t0), None).unwrap();
    assert_eq!(started.start_time, Some(t0));
    assert!(!started.is_completed());

    // end alone keeps the recorded start
    let ended =
        ledger::record_build_run_update(&store, run.id, None, Some(t0 + Duration::minutes(3)))
            .unwrap();
    assert_eq!(ended.start_time, Some(t0));
    assert!(ended.is_completed());

    assert!(matches!(
        ledger::record_build_run_update(&store, run.id, Some(t0), Some(t0 - Duration::seconds(1))),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_ledger_reads() {
    let (store, repo) = store_with_repository();
    let build_id = ingest_build(&store, repo.id, "abc", "1", &["amd64", "arm64"]);
    let jobs = store.jobs_for_builds(&[build_id]).unwrap();
    let (first, _) = ledger::start_build_run(&store, build_id, None).unwrap();
    ledger::start_build_run(&store, build_id, Some(&[jobs[0].id])).unwrap();

    assert_eq!(ledger::job_runs_for_build_run(&store, first.id).unwrap().len(), 2);
    let attempts = ledger::job_runs_for_job(&store, jobs[0].id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].id < attempts[1].id);
    assert_eq!(ledger::job_runs_for_job(&store, jobs[1].id).unwrap().len(), 1);

    assert!(matches!(
        ledger::job_runs_for_build_run(&store, 9999),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        ledger::job_runs_for_job(&store, 9999),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_repository_refresh() {
    let (store, repo) = store_with_repository();
    let renamed = repository::refresh_repository(
        &store,
        repo.id,
        "AOSC-Dev/abbs",
        "https://github.com/AOSC-Dev/abbs",
    )
    .unwrap();
    assert_eq!(renamed.provider, repo.provider);
    assert_eq!(repository::get_repository(&store, repo.id).unwrap().name, "AOSC-Dev/abbs");

    assert!(matches!(
        repository::refresh_repository(&store, repo.id, "", "https://example.com"),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        repository::get_repository(&store, 9999),
        Err(Error::NotFound { .. })
    ));
}
