use crate::{error::Error, store::Store};
use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod build;
pub mod repository;
pub mod webhook;
pub mod worker;

pub use build::*;
pub use repository::*;
pub use webhook::*;
pub use worker::*;

pub async fn ping() -> &'static str {
    "PONG"
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub worker_secret: Arc<str>,
}

impl AppState {
    pub fn check_worker_secret(&self, secret: &str) -> Result<(), ApiError> {
        if secret != &*self.worker_secret {
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }
}

// learned from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
pub enum ApiError {
    Engine(Error),
    Unauthorized,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Engine(err) => match err {
                Error::NotFound { .. } => StatusCode::NOT_FOUND,
                Error::Conflict(_) | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
                Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                Error::NoJobs(_)
                | Error::Corrupted(_)
                | Error::Database(_)
                | Error::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Unauthorized => "Invalid worker secret".to_string(),
            ApiError::Engine(err) => err.to_string(),
        };
        if status.is_server_error() {
            error!("Returning {} for {}", status, message);
        } else {
            info!("Returning {} for {}", status, message);
        }
        (status, message).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Engine(err)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/repository/new", post(repository_new))
        .route("/api/repository/refresh", post(repository_refresh))
        .route("/api/repository/info", get(repository_info))
        .route("/api/build/ingest", post(build_ingest))
        .route("/api/build/new", post(build_new))
        .route("/api/build/list", get(build_list))
        .route("/api/build/info", get(build_info))
        .route("/api/build/status", get(build_status))
        .route("/api/build/last_run", get(build_last_run))
        .route("/api/build/update", post(build_update))
        .route("/api/build/cancel", post(build_cancel))
        .route("/api/worker/build_run/new", post(worker_build_run_new))
        .route("/api/worker/build_run/update", post(worker_build_run_update))
        .route("/api/worker/job_run/update", post(worker_job_run_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
