use super::Store;
use crate::{
    DbPool,
    error::{Error, Result},
    ledger::{self, JobRunUpdate, UpdateOutcome},
    models::{
        Build, BuildRun, Job, JobRun, JobRunRow, NewBuild, NewBuildRun, NewJob, NewJobRun,
        NewRepository, Repository,
    },
    schema::{build_runs, builds, job_runs, jobs, repositories},
};
use chrono::{DateTime, Utc};
use common::JobStatus;
use diesel::{
    Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl,
    SelectableHelper,
    r2d2::{ConnectionManager, PooledConnection},
    result::DatabaseErrorKind,
};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>> {
        Ok(self.pool.get()?)
    }
}

fn to_job_runs(rows: Vec<JobRunRow>) -> Result<Vec<JobRun>> {
    rows.into_iter().map(JobRun::try_from).collect()
}

impl Store for PgStore {
    fn insert_repository(&self, new: NewRepository) -> Result<Repository> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(repositories::table)
            .values(&new)
            .returning(Repository::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_repository(&self, id: i32, name: &str, url: &str) -> Result<Repository> {
        let mut conn = self.conn()?;
        diesel::update(repositories::table.find(id))
            .set((repositories::name.eq(name), repositories::url.eq(url)))
            .returning(Repository::as_returning())
            .get_result(&mut conn)
            .optional()?
            .ok_or(Error::not_found("repository", id))
    }

    fn repository(&self, id: i32) -> Result<Option<Repository>> {
        let mut conn = self.conn()?;
        Ok(repositories::table
            .find(id)
            .select(Repository::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn build(&self, id: i32) -> Result<Option<Build>> {
        let mut conn = self.conn()?;
        Ok(builds::table
            .find(id)
            .select(Build::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn builds_page(&self, limit: i64, offset: i64) -> Result<Vec<Build>> {
        let mut conn = self.conn()?;
        Ok(builds::table
            .order(builds::id.desc())
            .offset(offset)
            .limit(limit)
            .select(Build::as_select())
            .load(&mut conn)?)
    }

    fn builds_for_head(
        &self,
        repository_id: i32,
        head: &str,
        before: Option<i32>,
    ) -> Result<Vec<Build>> {
        let mut conn = self.conn()?;
        let mut sql = builds::table
            .select(Build::as_select())
            .filter(builds::repository_id.eq(repository_id))
            .filter(builds::head.eq(head))
            .into_boxed();
        if let Some(before) = before {
            sql = sql.filter(builds::id.lt(before));
        }
        Ok(sql.order(builds::id.desc()).load(&mut conn)?)
    }

    fn build_by_delivery(
        &self,
        repository_id: i32,
        head: &str,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<Build>> {
        let mut conn = self.conn()?;
        Ok(builds::table
            .filter(builds::repository_id.eq(repository_id))
            .filter(builds::head.eq(head))
            .filter(builds::provider.eq(provider))
            .filter(builds::provider_event_id.eq(provider_event_id))
            .select(Build::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn insert_build_with_jobs(
        &self,
        new: NewBuild,
        job_names: &[String],
    ) -> Result<(Build, Vec<Job>)> {
        let mut conn = self.conn()?;
        conn.transaction::<(Build, Vec<Job>), Error, _>(|conn| {
            let build: Build = diesel::insert_into(builds::table)
                .values(&new)
                .returning(Build::as_returning())
                .get_result(conn)
                .map_err(|err| match err {
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        Error::Conflict(format!(
                            "event {}/{} was already ingested",
                            new.provider, new.provider_event_id
                        ))
                    }
                    diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::ForeignKeyViolation,
                        _,
                    ) => Error::not_found("repository", new.repository_id),
                    err => err.into(),
                })?;

            let new_jobs: Vec<NewJob> = job_names
                .iter()
                .enumerate()
                .map(|(ordering, name)| NewJob {
                    build_id: build.id,
                    name: name.clone(),
                    ordering: ordering as i32,
                })
                .collect();
            let mut jobs: Vec<Job> = diesel::insert_into(jobs::table)
                .values(&new_jobs)
                .returning(Job::as_returning())
                .get_results(conn)?;
            jobs.sort_by_key(|job| (job.ordering, job.id));

            Ok((build, jobs))
        })
    }

    fn update_build_head(&self, id: i32, head: &str) -> Result<Build> {
        let mut conn = self.conn()?;
        diesel::update(builds::table.find(id))
            .set(builds::head.eq(head))
            .returning(Build::as_returning())
            .get_result(&mut conn)
            .optional()
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    Error::Conflict(format!(
                        "build {} would duplicate the delivery of another build on {}",
                        id, head
                    ))
                }
                err => err.into(),
            })?
            .ok_or(Error::not_found("build", id))
    }

    fn job(&self, id: i32) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        Ok(jobs::table
            .find(id)
            .select(Job::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn jobs_for_builds(&self, build_ids: &[i32]) -> Result<Vec<Job>> {
        let mut conn = self.conn()?;
        Ok(jobs::table
            .filter(jobs::build_id.eq_any(build_ids.to_vec()))
            .order((jobs::build_id.asc(), jobs::ordering.asc(), jobs::id.asc()))
            .select(Job::as_select())
            .load(&mut conn)?)
    }

    fn build_run(&self, id: i32) -> Result<Option<BuildRun>> {
        let mut conn = self.conn()?;
        Ok(build_runs::table
            .find(id)
            .select(BuildRun::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn build_runs_for_build(&self, build_id: i32) -> Result<Vec<BuildRun>> {
        let mut conn = self.conn()?;
        Ok(build_runs::table
            .filter(build_runs::build_id.eq(build_id))
            .order(build_runs::id.asc())
            .select(BuildRun::as_select())
            .load(&mut conn)?)
    }

    fn insert_build_run(
        &self,
        build_id: i32,
        job_ids: &[i32],
        now: DateTime<Utc>,
    ) -> Result<(BuildRun, Vec<JobRun>)> {
        let mut conn = self.conn()?;
        conn.transaction::<(BuildRun, Vec<JobRun>), Error, _>(|conn| {
            let run: BuildRun = diesel::insert_into(build_runs::table)
                .values(&NewBuildRun { build_id })
                .returning(BuildRun::as_returning())
                .get_result(conn)
                .map_err(|err| match err {
                    diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::ForeignKeyViolation,
                        _,
                    ) => Error::not_found("build", build_id),
                    err => err.into(),
                })?;

            let new_job_runs: Vec<NewJobRun> = job_ids
                .iter()
                .map(|job_id| NewJobRun {
                    job_id: *job_id,
                    build_run_id: run.id,
                    status: JobStatus::Queued.to_string(),
                    updated_time: now,
                })
                .collect();
            let rows = diesel::insert_into(job_runs::table)
                .values(&new_job_runs)
                .returning(JobRunRow::as_returning())
                .get_results(conn)?;
            let mut job_runs = to_job_runs(rows)?;
            job_runs.sort_by_key(|job_run| job_run.id);

            Ok((run, job_runs))
        })
    }

    fn update_build_run(
        &self,
        id: i32,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<BuildRun> {
        let mut conn = self.conn()?;
        conn.transaction::<BuildRun, Error, _>(|conn| {
            let current: BuildRun = build_runs::table
                .find(id)
                .select(BuildRun::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(Error::not_found("build run", id))?;

            Ok(diesel::update(build_runs::table.find(id))
                .set((
                    build_runs::start_time.eq(start_time.or(current.start_time)),
                    build_runs::end_time.eq(end_time.or(current.end_time)),
                ))
                .returning(BuildRun::as_returning())
                .get_result(conn)?)
        })
    }

    fn job_run(&self, id: i32) -> Result<Option<JobRun>> {
        let mut conn = self.conn()?;
        job_runs::table
            .find(id)
            .select(JobRunRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(JobRun::try_from)
            .transpose()
    }

    fn job_runs_for_build_run(&self, build_run_id: i32) -> Result<Vec<JobRun>> {
        let mut conn = self.conn()?;
        to_job_runs(
            job_runs::table
                .filter(job_runs::build_run_id.eq(build_run_id))
                .order(job_runs::id.asc())
                .select(JobRunRow::as_select())
                .load(&mut conn)?,
        )
    }

    fn job_runs_for_jobs(&self, job_ids: &[i32]) -> Result<Vec<JobRun>> {
        let mut conn = self.conn()?;
        to_job_runs(
            job_runs::table
                .filter(job_runs::job_id.eq_any(job_ids.to_vec()))
                .order(job_runs::id.asc())
                .select(JobRunRow::as_select())
                .load(&mut conn)?,
        )
    }

    fn job_runs_with_status(&self, status: JobStatus) -> Result<Vec<JobRun>> {
        let mut conn = self.conn()?;
        to_job_runs(
            job_runs::table
                .filter(job_runs::status.eq(status.as_str()))
                .order(job_runs::id.asc())
                .select(JobRunRow::as_select())
                .load(&mut conn)?,
        )
    }

    fn update_job_run(&self, id: i32, update: &JobRunUpdate) -> Result<UpdateOutcome> {
        let mut conn = self.conn()?;
        conn.transaction::<UpdateOutcome, Error, _>(|conn| {
            // the row lock serializes reports for the same job run
            let current: JobRun = job_runs::table
                .find(id)
                .select(JobRunRow::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(Error::not_found("job run", id))?
                .try_into()?;

            let Some(next) = ledger::apply_update(&current, update)? else {
                return Ok(UpdateOutcome::Stale(current));
            };

            let row: JobRunRow = diesel::update(job_runs::table.find(id))
                .set((
                    job_runs::status.eq(next.status.as_str()),
                    job_runs::start_time.eq(next.start_time),
                    job_runs::end_time.eq(next.end_time),
                    job_runs::updated_time.eq(next.updated_time),
                ))
                .returning(JobRunRow::as_returning())
                .get_result(conn)?;
            Ok(UpdateOutcome::Applied(row.try_into()?))
        })
    }
}
