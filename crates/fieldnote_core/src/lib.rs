//! Core domain logic for FieldNote.
//!
//! Untrusted contributors submit schema-validated observations, revise them
//! concurrently under an optimistic-concurrency protocol, and project owners
//! expose curated subsets through saved, access-controlled views compiled
//! from per-field filter rules. This crate is the single source of truth for
//! those business invariants; transports, authentication and membership
//! storage are external collaborators.

pub mod db;
pub mod filter;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use filter::predicate::Predicate;
pub use filter::spec::{FilterSpec, SpecShape};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::field::{Field, FieldKind, InvalidFieldKey, ViolationReason};
pub use model::observation::{
    NewObservation, Observation, ObservationStatus, Revision, UpdateError, UpdateFormatError,
    UpdateOutcome, VERSION_KEY,
};
pub use model::schema::{
    AttributeMap, FieldViolation, ObservationType, SchemaRegistry, ValidationError,
};
pub use model::view::{GroupGrant, LifecycleStatus, MembershipDirectory, Rule, View};
pub use model::{
    Actor, LocationId, ObservationId, ObservationTypeId, ProjectId, RuleId, UserId, ViewId,
};
pub use repo::{
    InMemoryMembershipDirectory, ObservationRepository, RepoError, RepoResult,
    SqliteObservationRepository, SqliteViewRepository, ViewRepository,
};
pub use service::observation_service::{ObservationService, ObservationServiceError};
pub use service::view_service::{ViewService, ViewServiceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
