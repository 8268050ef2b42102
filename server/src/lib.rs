use anyhow::Context;
use clap::Parser;
use diesel::{
    PgConnection,
    r2d2::{ConnectionManager, Pool},
};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use std::net::SocketAddr;

pub mod aggregate;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod ledger;
pub mod lineage;
pub mod models;
pub mod repository;
pub mod routes;
pub mod schema;
pub mod status;
pub mod store;
pub mod watchdog;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Database connection url
    #[arg(env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(env = "BUILDIT_WORKER_SECRET")]
    pub worker_secret: String,

    /// Address to serve the HTTP API on
    #[arg(env = "BUILDIT_LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: SocketAddr,

    /// Fail job runs that have been running for longer than this
    #[arg(env = "BUILDIT_JOB_RUN_TIMEOUT_SECS")]
    pub job_run_timeout_secs: Option<u64>,

    /// Keep everything in memory instead of PostgreSQL, state is lost on exit
    #[arg(env = "BUILDIT_IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,
}

impl Args {
    /// The watchdog timeout, `None` when job runs never time out.
    pub fn job_run_timeout(&self) -> anyhow::Result<Option<chrono::Duration>> {
        self.job_run_timeout_secs
            .map(|secs| {
                i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .context("BUILDIT_JOB_RUN_TIMEOUT_SECS is out of range")
            })
            .transpose()
    }
}
