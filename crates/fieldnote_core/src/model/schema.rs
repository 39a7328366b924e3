//! Observation schemas: ordered field sets and full-attribute validation.
//!
//! # Responsibility
//! - Define [`ObservationType`], the ordered field set observations are
//!   validated against.
//! - Collect every field violation of a raw attribute set in one pass.
//! - Provide the in-memory schema lookup used by rule compilation.
//!
//! # Invariants
//! - Field keys are unique within a type; enforced at construction.
//! - Validation either fails with the complete violation list or yields a
//!   fully normalized attribute set; no partially-valid state escapes.
//! - Attribute keys with no matching schema field pass through unvalidated
//!   (forward-compatible tolerance for the conflict-review workflow).

use crate::model::field::{Field, ViolationReason};
use crate::model::{ObservationTypeId, ProjectId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Normalized attribute set of one observation (key -> stored value).
pub type AttributeMap = BTreeMap<String, Value>;

/// One rejected attribute: the field key and the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub key: String,
    pub reason: ViolationReason,
}

impl Display for FieldViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Attribute set rejected by a schema; lists every offending field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "attributes failed schema validation:")?;
        for violation in &self.violations {
            write!(f, " [{}: {}]", violation.key, violation.reason)?;
        }
        Ok(())
    }
}

impl Error for ValidationError {}

/// Duplicate field key supplied to an [`ObservationType`] constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateFieldKey(pub String);

impl Display for DuplicateFieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "duplicate field key `{}` in observation type", self.0)
    }
}

impl Error for DuplicateFieldKey {}

/// Schema for one category of observations: an ordered, key-unique field set.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationType {
    id: ObservationTypeId,
    project: ProjectId,
    name: String,
    fields: Vec<Field>,
}

impl ObservationType {
    /// Builds a schema, rejecting duplicate field keys.
    pub fn new(
        id: ObservationTypeId,
        project: ProjectId,
        name: impl Into<String>,
        fields: Vec<Field>,
    ) -> Result<Self, DuplicateFieldKey> {
        for (index, field) in fields.iter().enumerate() {
            if fields[..index].iter().any(|seen| seen.key() == field.key()) {
                return Err(DuplicateFieldKey(field.key().to_string()));
            }
        }
        Ok(Self {
            id,
            project,
            name: name.into(),
            fields,
        })
    }

    pub fn id(&self) -> ObservationTypeId {
        self.id
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in schema order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field definition by key.
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.key() == key)
    }

    /// Appends a new optional field.
    ///
    /// Schemas referenced by existing observations only grow by optional
    /// fields; required additions would invalidate persisted attribute sets.
    pub fn add_optional_field(&mut self, field: Field) -> Result<(), DuplicateFieldKey> {
        if self.field(field.key()).is_some() {
            return Err(DuplicateFieldKey(field.key().to_string()));
        }
        debug_assert!(!field.is_required());
        self.fields.push(field);
        Ok(())
    }

    /// Validates a full raw attribute set against every field of this schema.
    ///
    /// A missing key is handed to the field validator as absent input.
    /// Violations are collected across all fields before failing. Unknown
    /// keys are copied through unvalidated.
    pub fn validate_all(&self, raw: &Map<String, Value>) -> Result<AttributeMap, ValidationError> {
        let mut normalized = AttributeMap::new();
        let mut violations = Vec::new();

        for field in &self.fields {
            match field.validate(raw.get(field.key())) {
                Ok(Some(value)) => {
                    normalized.insert(field.key().to_string(), value);
                }
                Ok(None) => {}
                Err(reason) => violations.push(FieldViolation {
                    key: field.key().to_string(),
                    reason,
                }),
            }
        }

        for (key, value) in raw {
            if self.field(key).is_none() && !value.is_null() {
                normalized.insert(key.clone(), value.clone());
            }
        }

        if violations.is_empty() {
            Ok(normalized)
        } else {
            Err(ValidationError { violations })
        }
    }
}

/// Error raised when registering a schema id twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateObservationType(pub ObservationTypeId);

impl Display for DuplicateObservationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "observation type already registered: {}", self.0)
    }
}

impl Error for DuplicateObservationType {}

/// In-memory schema lookup used by rule compilation.
///
/// Schema persistence is an external concern; embedders register the
/// project's observation types once per process or request.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<ObservationTypeId, ObservationType>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one schema; ids must be unique.
    pub fn register(&mut self, schema: ObservationType) -> Result<(), DuplicateObservationType> {
        if self.types.contains_key(&schema.id()) {
            return Err(DuplicateObservationType(schema.id()));
        }
        self.types.insert(schema.id(), schema);
        Ok(())
    }

    pub fn get(&self, id: ObservationTypeId) -> Option<&ObservationType> {
        self.types.get(&id)
    }
}
