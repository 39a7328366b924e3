//! Composable predicate AST over observation attributes.
//!
//! # Responsibility
//! - Represent compiled rule/view filters as a closed, side-effect-free AST.
//! - Evaluate predicates in memory against an observation's current state.
//!
//! # Invariants
//! - Evaluation is pure; conjunction and disjunction are order-independent.
//! - `Nothing` matches no observation (a view without active rules exposes
//!   an empty set, never "all observations").
//! - Visibility of soft-deleted observations is the storage layer's concern,
//!   not the predicate's.

use crate::model::observation::Observation;
use crate::model::ObservationTypeId;
use serde_json::Value;

/// A compiled boolean test over an observation.
///
/// Numeric comparisons are evaluated numerically on the canonical stored
/// strings; date comparisons rely on the fixed-width storage form ordering
/// lexicographically.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches nothing.
    Nothing,
    /// Observation belongs to the given schema.
    TypeIs(ObservationTypeId),
    TextEq {
        key: String,
        value: String,
    },
    TextIn {
        key: String,
        values: Vec<String>,
    },
    NumberEq {
        key: String,
        value: f64,
    },
    NumberIn {
        key: String,
        values: Vec<f64>,
    },
    NumberBetween {
        key: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    DateEq {
        key: String,
        value: String,
    },
    DateBetween {
        key: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Conjunction; empty means "always true".
    AllOf(Vec<Predicate>),
    /// Disjunction; empty means "always false".
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    /// Evaluates this predicate against one observation.
    pub fn matches(&self, observation: &Observation) -> bool {
        match self {
            Self::Nothing => false,
            Self::TypeIs(type_id) => observation.observation_type() == *type_id,
            Self::TextEq { key, value } => {
                attribute_text(observation, key).is_some_and(|text| text == value)
            }
            Self::TextIn { key, values } => attribute_text(observation, key)
                .is_some_and(|text| values.iter().any(|candidate| candidate == text)),
            Self::NumberEq { key, value } => {
                attribute_number(observation, key).is_some_and(|number| number == *value)
            }
            Self::NumberIn { key, values } => attribute_number(observation, key)
                .is_some_and(|number| values.iter().any(|candidate| *candidate == number)),
            Self::NumberBetween { key, min, max } => attribute_number(observation, key)
                .is_some_and(|number| {
                    min.map_or(true, |min| number >= min) && max.map_or(true, |max| number <= max)
                }),
            Self::DateEq { key, value } => {
                attribute_text(observation, key).is_some_and(|text| text == value)
            }
            Self::DateBetween { key, min, max } => {
                attribute_text(observation, key).is_some_and(|text| {
                    min.as_deref().map_or(true, |min| text >= min)
                        && max.as_deref().map_or(true, |max| text <= max)
                })
            }
            Self::AllOf(terms) => terms.iter().all(|term| term.matches(observation)),
            Self::AnyOf(terms) => terms.iter().any(|term| term.matches(observation)),
        }
    }
}

fn attribute_text<'a>(observation: &'a Observation, key: &str) -> Option<&'a str> {
    match observation.attributes().get(key) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    }
}

fn attribute_number(observation: &Observation, key: &str) -> Option<f64> {
    match observation.attributes().get(key)? {
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    }
}
