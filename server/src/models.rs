use crate::error::Error;
use chrono::{DateTime, Utc};
use common::JobStatus;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::repositories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Repository {
    pub id: i32,
    pub provider: String,
    pub name: String,
    pub url: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::repositories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewRepository {
    pub provider: String,
    pub name: String,
    pub url: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Build {
    pub id: i32,
    pub repository_id: i32,
    pub head: String,
    pub provider: String,
    pub provider_event_id: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewBuild {
    pub repository_id: i32,
    pub head: String,
    pub provider: String,
    pub provider_event_id: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Job {
    pub id: i32,
    pub build_id: i32,
    pub name: String,
    pub ordering: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewJob {
    pub build_id: i32,
    pub name: String,
    pub ordering: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::build_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BuildRun {
    pub id: i32,
    pub build_id: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BuildRun {
    /// The attempt actually ran: it was started and it ended.
    pub fn is_completed(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_some()
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::build_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewBuildRun {
    pub build_id: i32,
}

/// One execution record of a job inside a build run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct JobRun {
    pub id: i32,
    pub job_id: i32,
    pub build_run_id: i32,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Time of the last accepted update
    pub updated_time: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::job_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRunRow {
    pub id: i32,
    pub job_id: i32,
    pub build_run_id: i32,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub updated_time: DateTime<Utc>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = Error;

    fn try_from(row: JobRunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| Error::Corrupted(format!("job run {}: {}", row.id, e)))?;
        Ok(JobRun {
            id: row.id,
            job_id: row.job_id,
            build_run_id: row.build_run_id,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            updated_time: row.updated_time,
        })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::job_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewJobRun {
    pub job_id: i32,
    pub build_run_id: i32,
    pub status: String,
    pub updated_time: DateTime<Utc>,
}
