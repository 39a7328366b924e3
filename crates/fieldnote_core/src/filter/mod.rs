//! Filter-spec decoding and predicate composition.
//!
//! # Responsibility
//! - Decode opaque stored filter specs into a typed shape exactly once.
//! - Define the composable predicate AST views and rules compile into.
//!
//! # Invariants
//! - Untyped spec data never crosses this boundary; callers only see
//!   [`spec::FilterSpec`] and [`predicate::Predicate`].
//! - Decoding is total: malformed input degrades to a literal, never an error.

pub mod predicate;
pub mod spec;
