use anyhow::{Context, anyhow};
use clap::Parser;
use diesel::{
    Connection, PgConnection,
    r2d2::{ConnectionManager, Pool},
};
use diesel_migrations::MigrationHarness;
use server::{
    Args, MIGRATIONS,
    routes::{AppState, app},
    store::{MemoryStore, PgStore, Store},
    watchdog::watchdog_worker,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn open_store(args: &Args) -> anyhow::Result<Arc<dyn Store>> {
    if args.in_memory {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let database_url = args
        .database_url
        .as_deref()
        .context("DATABASE_URL is required unless BUILDIT_IN_MEMORY is set")?;
    let mut conn =
        PgConnection::establish(database_url).context("Failed to connect to database")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;
    for version in applied {
        info!("Applied migration {}", version);
    }

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .test_on_check_out(true)
        .build(manager)
        .context("Failed to build database connection pool")?;

    Ok(Arc::new(PgStore::new(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!(
        "Starting build server on {} (in memory: {})",
        args.listen_addr, args.in_memory
    );

    let store = open_store(&args)?;

    if let Some(timeout) = args.job_run_timeout()? {
        info!("Job runs time out after {}s", timeout.num_seconds());
        tokio::spawn(watchdog_worker(store.clone(), timeout));
    }

    let state = AppState {
        store,
        worker_secret: args.worker_secret.as_str().into(),
    };

    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .with_context(|| format!("Failed to listen on {}", args.listen_addr))?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;

    Ok(())
}
