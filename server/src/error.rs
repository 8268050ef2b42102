use common::JobStatus;

/// Errors surfaced by the build engine.
///
/// Storage failures are passed through untouched, callers decide whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    #[error("job run {job_run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_run_id: i32,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("build {0} has no jobs")]
    NoJobs(i32),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Database(#[from] diesel::result::Error),

    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl Error {
    pub fn not_found(entity: &'static str, id: i32) -> Self {
        Error::NotFound { entity, id }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
