//! Turns normalized webhook events into builds, idempotently.

use crate::{
    error::{Error, Result},
    models::NewBuild,
    store::Store,
};
use chrono::Utc;
use common::{JobDefinition, WebhookEvent};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "build_id", rename_all = "lowercase")]
pub enum IngestOutcome {
    Created(i32),
    /// The delivery was seen before, this is the build it created
    Duplicate(i32),
}

impl IngestOutcome {
    pub fn build_id(self) -> i32 {
        match self {
            IngestOutcome::Created(id) | IngestOutcome::Duplicate(id) => id,
        }
    }
}

/// Checks the fields every new build needs, whether it comes from a webhook
/// or is created by hand.
pub(crate) fn validate_build(
    head: &str,
    provider: &str,
    provider_event_id: &str,
    job_definitions: &[JobDefinition],
) -> Result<()> {
    if head.trim().is_empty() {
        return Err(Error::InvalidInput("event has an empty head".to_string()));
    }
    if provider.trim().is_empty() {
        return Err(Error::InvalidInput("event has an empty provider".to_string()));
    }
    if provider_event_id.trim().is_empty() {
        return Err(Error::InvalidInput(
            "event has an empty provider event id".to_string(),
        ));
    }
    if job_definitions.is_empty() {
        return Err(Error::InvalidInput("event defines no job".to_string()));
    }
    if let Some(def) = job_definitions.iter().find(|def| def.name.trim().is_empty()) {
        return Err(Error::InvalidInput(format!(
            "job definition without a name: {:?}",
            def
        )));
    }
    Ok(())
}

/// Creates the build and its jobs for `event`, or returns the build an earlier
/// delivery of the same event created.
pub fn ingest(store: &dyn Store, event: &WebhookEvent) -> Result<IngestOutcome> {
    validate_build(
        &event.head,
        &event.provider,
        &event.provider_event_id,
        &event.job_definitions,
    )?;

    let existing = || {
        store.build_by_delivery(
            event.repository_id,
            &event.head,
            &event.provider,
            &event.provider_event_id,
        )
    };

    if let Some(build) = existing()? {
        info!(
            build_id = build.id,
            provider = %event.provider,
            provider_event_id = %event.provider_event_id,
            "Ignoring duplicate delivery"
        );
        return Ok(IngestOutcome::Duplicate(build.id));
    }

    if store.repository(event.repository_id)?.is_none() {
        return Err(Error::not_found("repository", event.repository_id));
    }

    let new = NewBuild {
        repository_id: event.repository_id,
        head: event.head.clone(),
        provider: event.provider.clone(),
        provider_event_id: event.provider_event_id.clone(),
        creation_time: Utc::now(),
    };
    let names: Vec<String> = event
        .job_definitions
        .iter()
        .map(|def| def.name.clone())
        .collect();

    match store.insert_build_with_jobs(new, &names) {
        Ok((build, jobs)) => {
            info!(
                build_id = build.id,
                head = %build.head,
                jobs = jobs.len(),
                "Created build from {} event {}",
                build.provider,
                build.provider_event_id
            );
            Ok(IngestOutcome::Created(build.id))
        }
        // lost the race against a concurrent delivery of the same event
        Err(Error::Conflict(_)) => match existing()? {
            Some(build) => Ok(IngestOutcome::Duplicate(build.id)),
            None => Err(Error::Conflict(format!(
                "event {}/{} conflicts with a build that no longer exists",
                event.provider, event.provider_event_id
            ))),
        },
        Err(e) => Err(e),
    }
}
