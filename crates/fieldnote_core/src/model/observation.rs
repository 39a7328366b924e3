//! Observations, revisions and the optimistic-concurrency update engine.
//!
//! # Responsibility
//! - Hold the materialized current state of one contributed record.
//! - Apply create/update/delete transitions with schema validation and
//!   version-compare conflict flagging.
//! - Append one immutable revision per accepted create/update.
//!
//! # Invariants
//! - `version` starts at 1 and increases by exactly 1 per accepted update;
//!   rejected updates never mutate any state.
//! - `attributes` always satisfies the schema; revisions are full snapshots,
//!   never diffs, and are never mutated after append.
//! - Only the methods here write `attributes`/`status`/`version`; storage
//!   rehydrates via [`Observation::from_parts`] and persists the result.
//! - There is no transition out of `deleted`.

use crate::model::schema::{AttributeMap, ObservationType, ValidationError};
use crate::model::{LocationId, ObservationId, ObservationTypeId, ProjectId, UserId};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Reserved delta key carrying the client's last-observed version.
pub const VERSION_KEY: &str = "version";

/// Lifecycle status of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
    /// Visible, accepted state.
    Active,
    /// Accepted, but a conflicting concurrent update needs human review.
    Review,
    /// Awaiting moderation approval.
    Pending,
    /// Soft-deleted; retained for history, hidden from reads.
    Deleted,
}

impl ObservationStatus {
    /// Stable string id used for storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Review => "review",
            Self::Pending => "pending",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a stored status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "review" => Some(Self::Review),
            "pending" => Some(Self::Pending),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Immutable snapshot of an observation after one accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub version: u64,
    pub updating_user: UserId,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
    /// Full materialized attribute state, not a diff.
    pub attributes: AttributeMap,
}

/// Outcome of an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Clean update; the supplied version matched.
    Applied,
    /// Soft conflict; content applied, status flagged for review.
    FlaggedForReview,
}

/// Malformed update request metadata; rejected before any state is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateFormatError {
    /// The delta carries no `version` entry.
    MissingVersion,
    /// The `version` entry is not a positive integer.
    InvalidVersion(String),
}

impl Display for UpdateFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVersion => {
                write!(f, "update is missing the `{VERSION_KEY}` marker")
            }
            Self::InvalidVersion(value) => write!(
                f,
                "`{VERSION_KEY}` marker must be a positive integer, got `{value}`"
            ),
        }
    }
}

impl Error for UpdateFormatError {}

/// Rejection of one update operation; nothing was mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateError {
    Format(UpdateFormatError),
    Validation(ValidationError),
    /// The observation is deleted; deleted records are not updatable.
    Deleted(ObservationId),
}

impl Display for UpdateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Deleted(id) => write!(f, "observation {id} is deleted and not updatable"),
        }
    }
}

impl Error for UpdateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Format(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Deleted(_) => None,
        }
    }
}

impl From<UpdateFormatError> for UpdateError {
    fn from(value: UpdateFormatError) -> Self {
        Self::Format(value)
    }
}

impl From<ValidationError> for UpdateError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Input for creating one observation.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub location: LocationId,
    pub creator: UserId,
    /// Raw attribute input as submitted by the contributor.
    pub attributes: Map<String, Value>,
    /// External moderation policy: start in `pending` instead of `active`.
    pub requires_moderation: bool,
}

/// One contributed record with its append-only revision history.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    id: ObservationId,
    project: ProjectId,
    observation_type: ObservationTypeId,
    location: LocationId,
    creator: UserId,
    status: ObservationStatus,
    version: u64,
    attributes: AttributeMap,
    created_at: i64,
    updated_at: i64,
    revisions: Vec<Revision>,
}

impl Observation {
    /// Validates and materializes a new observation at version 1.
    ///
    /// The project and type are taken from the schema the attributes were
    /// validated against. Exactly one revision exists afterwards, carrying
    /// the same normalized attributes.
    pub fn create(
        new: NewObservation,
        schema: &ObservationType,
        now_ms: i64,
    ) -> Result<Self, ValidationError> {
        let attributes = schema.validate_all(&new.attributes)?;
        let status = if new.requires_moderation {
            ObservationStatus::Pending
        } else {
            ObservationStatus::Active
        };
        let revision = Revision {
            version: 1,
            updating_user: new.creator,
            created_at: now_ms,
            attributes: attributes.clone(),
        };
        Ok(Self {
            id: Uuid::new_v4(),
            project: schema.project(),
            observation_type: schema.id(),
            location: new.location,
            creator: new.creator,
            status,
            version: 1,
            attributes,
            created_at: now_ms,
            updated_at: now_ms,
            revisions: vec![revision],
        })
    }

    /// Rehydrates an observation from storage.
    ///
    /// For storage collaborators only; revisions must be ordered by version.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ObservationId,
        project: ProjectId,
        observation_type: ObservationTypeId,
        location: LocationId,
        creator: UserId,
        status: ObservationStatus,
        version: u64,
        attributes: AttributeMap,
        created_at: i64,
        updated_at: i64,
        revisions: Vec<Revision>,
    ) -> Self {
        Self {
            id,
            project,
            observation_type,
            location,
            creator,
            status,
            version,
            attributes,
            created_at,
            updated_at,
            revisions,
        }
    }

    pub fn id(&self) -> ObservationId {
        self.id
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn observation_type(&self) -> ObservationTypeId {
        self.observation_type
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn creator(&self) -> UserId {
        self.creator
    }

    pub fn status(&self) -> ObservationStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current materialized attributes (latest accepted revision).
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Revision history, ordered by version.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ObservationStatus::Deleted
    }

    /// A user contributed when they created the record or authored any revision.
    pub fn is_contributor(&self, user: UserId) -> bool {
        self.creator == user
            || self
                .revisions
                .iter()
                .any(|revision| revision.updating_user == user)
    }

    /// Applies a partial update under the optimistic-concurrency protocol.
    ///
    /// The delta must carry a [`VERSION_KEY`] entry naming the version the
    /// updater last observed. Keys present in the delta overwrite the current
    /// attributes; an explicit JSON `null` removes a key; everything else is
    /// left untouched. The merged result is validated as a whole before any
    /// state changes.
    ///
    /// A version mismatch is not an error: the merged attributes are still
    /// applied (last write wins) and the status flips to `review` so a human
    /// reconciles later. Both outcomes increment the version by exactly 1 and
    /// append a revision.
    pub fn apply_update(
        &mut self,
        delta: &Map<String, Value>,
        updater: UserId,
        schema: &ObservationType,
        now_ms: i64,
    ) -> Result<UpdateOutcome, UpdateError> {
        let supplied = extract_version_marker(delta)?;
        if self.is_deleted() {
            return Err(UpdateError::Deleted(self.id));
        }

        let mut merged: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, value) in delta {
            if key == VERSION_KEY {
                continue;
            }
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        let merged = schema.validate_all(&merged)?;

        let outcome = if supplied == self.version {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::FlaggedForReview
        };
        self.version += 1;
        self.status = match (outcome, self.status) {
            // Moderation still owns the pending -> active transition.
            (UpdateOutcome::Applied, ObservationStatus::Pending) => ObservationStatus::Pending,
            (UpdateOutcome::Applied, _) => ObservationStatus::Active,
            (UpdateOutcome::FlaggedForReview, _) => ObservationStatus::Review,
        };
        self.attributes = merged;
        self.updated_at = now_ms;
        self.revisions.push(Revision {
            version: self.version,
            updating_user: updater,
            created_at: now_ms,
            attributes: self.attributes.clone(),
        });
        Ok(outcome)
    }

    /// Soft-deletes the observation. Attributes, version and history are kept.
    pub fn mark_deleted(&mut self, now_ms: i64) {
        self.status = ObservationStatus::Deleted;
        self.updated_at = now_ms;
    }

    /// Moderation approval: `pending -> active`. No-op in any other status;
    /// in particular a deleted observation stays deleted.
    pub fn approve(&mut self, now_ms: i64) {
        if self.status == ObservationStatus::Pending {
            self.status = ObservationStatus::Active;
            self.updated_at = now_ms;
        }
    }
}

fn extract_version_marker(delta: &Map<String, Value>) -> Result<u64, UpdateFormatError> {
    let Some(marker) = delta.get(VERSION_KEY) else {
        return Err(UpdateFormatError::MissingVersion);
    };
    let parsed = match marker {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(version) if version >= 1 => Ok(version),
        _ => Err(UpdateFormatError::InvalidVersion(render_marker(marker))),
    }
}

fn render_marker(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
