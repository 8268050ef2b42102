use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Execution state of a single job run.
///
/// This is the only status stored anywhere; every other status reported by
/// the server is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Failed,
    Success,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Success => "success",
        }
    }

    /// `failed` and `success` are final, a job run never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobStatus(pub String);

impl fmt::Display for UnknownJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status: {:?}", self.0)
    }
}

impl std::error::Error for UnknownJobStatus {}

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            "success" => Ok(JobStatus::Success),
            x => Err(UnknownJobStatus(x.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
}

/// A webhook event after provider specific parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub repository_id: i32,
    /// Commit the build is triggered for
    pub head: String,
    /// e.g. github, gogs, gitlab, bitbucket
    pub provider: String,
    /// Delivery id assigned by the provider, stable across redeliveries
    pub provider_event_id: String,
    pub job_definitions: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub build_id: i32,
    /// The event was already ingested before
    pub duplicate: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerBuildRunNewRequest {
    pub build_id: i32,
    /// Restrict the attempt to these jobs, all jobs of the build if unset
    pub job_ids: Option<Vec<i32>>,
    pub worker_secret: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerJobRunItem {
    pub job_run_id: i32,
    pub job_id: i32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerBuildRunNewResponse {
    pub build_run_id: i32,
    pub job_runs: Vec<WorkerJobRunItem>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerBuildRunUpdateRequest {
    pub build_run_id: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub worker_secret: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkerJobRunUpdateRequest {
    pub job_run_id: i32,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// When the worker observed the transition, defaults to the time the
    /// server receives the request
    pub reported_at: Option<DateTime<Utc>>,
    pub worker_secret: String,
}
