//! Source repositories that builds belong to.

use crate::{
    error::{Error, Result},
    models::{NewRepository, Repository},
    store::Store,
};
use chrono::Utc;
use tracing::info;

fn check_metadata(name: &str, url: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("repository name is empty".to_string()));
    }
    if url.trim().is_empty() {
        return Err(Error::InvalidInput("repository url is empty".to_string()));
    }
    Ok(())
}

pub fn register_repository(
    store: &dyn Store,
    provider: &str,
    name: &str,
    url: &str,
) -> Result<Repository> {
    if provider.trim().is_empty() {
        return Err(Error::InvalidInput("repository provider is empty".to_string()));
    }
    check_metadata(name, url)?;

    let repository = store.insert_repository(NewRepository {
        provider: provider.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        creation_time: Utc::now(),
    })?;
    info!(repository_id = repository.id, "Registered repository {}", repository.name);
    Ok(repository)
}

/// Updates name and url, e.g. after a rename at the provider.
pub fn refresh_repository(store: &dyn Store, id: i32, name: &str, url: &str) -> Result<Repository> {
    check_metadata(name, url)?;
    store.update_repository(id, name, url)
}

pub fn get_repository(store: &dyn Store, id: i32) -> Result<Repository> {
    store.repository(id)?.ok_or(Error::not_found("repository", id))
}
