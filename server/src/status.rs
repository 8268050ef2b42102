//! Status rollup: reduce the statuses of child runs to one parent status.
//!
//! A parent is only as finished as its least finished child, so an unresolved
//! `queued` run outranks everything, then `running`, then `failed`, and
//! `success` only wins when every child succeeded.

use common::JobStatus;

/// Rank of a status in the rollup, higher wins.
pub fn precedence(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 3,
        JobStatus::Running => 2,
        JobStatus::Failed => 1,
        JobStatus::Success => 0,
    }
}

/// Returns the highest-precedence status present, or `None` for an empty
/// input. An empty set of runs carries no information and must never be
/// reported as a success.
pub fn rollup<I>(statuses: I) -> Option<JobStatus>
where
    I: IntoIterator<Item = JobStatus>,
{
    statuses.into_iter().max_by_key(|status| precedence(*status))
}

/// Picks the run with the greatest ordering key, `None` when there is no run.
pub fn latest_of<T, K, F>(runs: &[T], order_key: F) -> Option<&T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    runs.iter().max_by_key(|run| order_key(run))
}
