use crate::{
    error::{Error, Result},
    ledger::{self, JobRunUpdate, UpdateOutcome},
    store::Store,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use common::JobStatus;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Fails job runs that have been running since before `deadline`.
/// Returns how many were closed.
pub fn fail_stuck_job_runs(store: &dyn Store, deadline: DateTime<Utc>) -> Result<usize> {
    let mut failed = 0;
    for job_run in store.job_runs_with_status(JobStatus::Running)? {
        let since = job_run.start_time.unwrap_or(job_run.updated_time);
        if since >= deadline {
            continue;
        }

        info!(
            job_run_id = job_run.id,
            job_id = job_run.job_id,
            "Job run has been running since {}, marking it failed",
            since
        );
        let now = Utc::now().max(job_run.updated_time);
        match ledger::record_job_run_update(
            store,
            job_run.id,
            JobRunUpdate::new(JobStatus::Failed, now),
        ) {
            Ok(UpdateOutcome::Applied(_)) => failed += 1,
            Ok(UpdateOutcome::Stale(_)) | Err(Error::InvalidTransition { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(failed)
}

async fn watchdog_worker_inner(
    store: Arc<dyn Store>,
    timeout: chrono::Duration,
) -> anyhow::Result<()> {
    loop {
        let deadline = Utc::now() - timeout;
        let store = store.clone();
        // store calls block, keep them off the async workers
        let failed = tokio::task::spawn_blocking(move || fail_stuck_job_runs(&*store, deadline))
            .await
            .context("Watchdog scan panicked")??;
        if failed > 0 {
            info!(failed, "Watchdog failed stuck job runs");
        }

        tokio::time::sleep(SCAN_INTERVAL).await;
    }
}

pub async fn watchdog_worker(store: Arc<dyn Store>, timeout: chrono::Duration) {
    loop {
        info!("Starting watchdog worker");
        if let Err(err) = watchdog_worker_inner(store.clone(), timeout).await {
            warn!("Got error running watchdog worker: {}", err);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
