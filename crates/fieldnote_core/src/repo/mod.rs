//! Storage collaborator contracts and the SQLite reference implementation.
//!
//! # Responsibility
//! - Define the repository traits the core hands its state and predicates to.
//! - Provide SQLite-backed implementations for embedders and tests.
//!
//! # Invariants
//! - Soft-deleted rows are excluded on every read path through one shared
//!   visibility fragment.
//! - The observation write path is a compare-and-swap on `version`; no
//!   interleaved writer can slip between conflict check and mutation.

pub mod membership;
pub mod observation_repo;
pub mod view_repo;

pub use membership::InMemoryMembershipDirectory;
pub use observation_repo::{
    ObservationRepository, RepoError, RepoResult, SqliteObservationRepository,
};
pub use view_repo::{SqliteViewRepository, ViewRepository};
