//! Observation use-case service.
//!
//! # Responsibility
//! - Provide create/update/delete/get/query entry points for serving layers.
//! - Run the optimistic-concurrency engine against loaded state and persist
//!   the result under the repository's compare-and-swap guard.
//!
//! # Invariants
//! - A failed validation or format check never reaches the repository.
//! - Conflicting updates are a success path; only the outcome differs.

use crate::filter::predicate::Predicate;
use crate::model::observation::{
    NewObservation, Observation, UpdateError, UpdateFormatError, UpdateOutcome,
};
use crate::model::schema::{ObservationType, ValidationError};
use crate::model::{ObservationId, ProjectId, UserId};
use crate::repo::observation_repo::{ObservationRepository, RepoError};
use crate::service::now_epoch_ms;
use log::info;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-facing error for observation use-cases.
#[derive(Debug)]
pub enum ObservationServiceError {
    /// Attributes violate the schema; lists every offending field.
    Validation(ValidationError),
    /// Malformed request metadata (version marker).
    Format(UpdateFormatError),
    /// No visible observation with the given id.
    NotFound(ObservationId),
    /// Persistence-layer failure, including lost compare-and-swap races.
    Repo(RepoError),
}

impl Display for ObservationServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Format(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "observation not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ObservationServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Format(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ValidationError> for ObservationServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<UpdateError> for ObservationServiceError {
    fn from(value: UpdateError) -> Self {
        match value {
            UpdateError::Format(err) => Self::Format(err),
            UpdateError::Validation(err) => Self::Validation(err),
            // Deleted records are invisible on the read path; surface the
            // same shape here.
            UpdateError::Deleted(id) => Self::NotFound(id),
        }
    }
}

impl From<RepoError> for ObservationServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Use-case service for contributed observations.
pub struct ObservationService<R: ObservationRepository> {
    repo: R,
}

impl<R: ObservationRepository> ObservationService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Validates and persists a new observation at version 1.
    pub fn create(
        &mut self,
        new: NewObservation,
        schema: &ObservationType,
    ) -> Result<Observation, ObservationServiceError> {
        let observation = Observation::create(new, schema, now_epoch_ms())?;
        self.repo.create_observation(&observation)?;
        info!(
            "event=observation_create module=service status=ok id={} type={} observation_status={}",
            observation.id(),
            observation.observation_type(),
            observation.status().as_str()
        );
        Ok(observation)
    }

    /// Applies a partial update under the optimistic-concurrency protocol.
    ///
    /// Returns the updated observation and whether it was applied cleanly or
    /// flagged for review. A lost storage race surfaces as
    /// [`RepoError::ConcurrentUpdate`]; callers reload and retry.
    pub fn update(
        &mut self,
        id: ObservationId,
        delta: &Map<String, Value>,
        updater: UserId,
        schema: &ObservationType,
    ) -> Result<(Observation, UpdateOutcome), ObservationServiceError> {
        let mut observation = self
            .repo
            .get_observation(id, false)?
            .ok_or(ObservationServiceError::NotFound(id))?;
        let expected_version = observation.version();

        let outcome = observation.apply_update(delta, updater, schema, now_epoch_ms())?;
        self.repo.store_update(&observation, expected_version)?;

        info!(
            "event=observation_update module=service status=ok id={} version={} outcome={}",
            observation.id(),
            observation.version(),
            match outcome {
                UpdateOutcome::Applied => "applied",
                UpdateOutcome::FlaggedForReview => "review",
            }
        );
        Ok((observation, outcome))
    }

    /// Soft-deletes an observation; revisions are retained.
    pub fn delete(&mut self, id: ObservationId) -> Result<(), ObservationServiceError> {
        self.repo.mark_deleted(id, now_epoch_ms())?;
        info!("event=observation_delete module=service status=ok id={id}");
        Ok(())
    }

    /// Loads one visible observation.
    pub fn get(&self, id: ObservationId) -> Result<Option<Observation>, ObservationServiceError> {
        Ok(self.repo.get_observation(id, false)?)
    }

    /// Executes a compiled predicate against a project's observations.
    pub fn query(
        &self,
        project: ProjectId,
        predicate: &Predicate,
    ) -> Result<Vec<Observation>, ObservationServiceError> {
        Ok(self.repo.query(project, predicate)?)
    }
}
