//! Field definitions: per-variant validation and filter compilation.
//!
//! # Responsibility
//! - Define the closed set of field variants a schema can be built from.
//! - Validate raw attribute values into their normalized stored form.
//! - Compile stored filter specs into predicates for the variant's value space.
//!
//! # Invariants
//! - Field keys match `^[a-z][a-z0-9_]*$`; keys are embedded in JSON paths
//!   by the storage layer, so the constraint is load-bearing.
//! - Normalized numeric values are canonical decimal strings (`"12"`, `"12.5"`).
//! - Normalized date values use the fixed-width `YYYY-MM-DD HH:MM:SS` form, so
//!   lexicographic order equals chronological order.
//! - A malformed filter spec never fails compilation; it degrades to a literal
//!   exact-match predicate.

use crate::filter::predicate::Predicate;
use crate::filter::spec::{FilterSpec, SpecShape};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

static FIELD_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid field key regex"));

/// Canonical storage format for date values.
pub const DATE_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rejected field key (empty, uppercase, or containing separators/symbols).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFieldKey(pub String);

impl Display for InvalidFieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid field key `{}`; expected lowercase identifier matching [a-z][a-z0-9_]*",
            self.0
        )
    }
}

impl Error for InvalidFieldKey {}

/// Variant-specific constraints for a schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Free text, trimmed on input.
    Text,
    /// Decimal number with optional inclusive bounds.
    Numeric { min: Option<f64>, max: Option<f64> },
    /// Calendar date or date-time.
    Date,
    /// One value out of a fixed choice set.
    Selection { choices: Vec<String> },
}

/// Per-field reason an attribute value was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationReason {
    /// Required field missing, null, or (for text) blank.
    Required,
    /// Non-string input supplied to a text or selection field.
    NotText(String),
    /// Input cannot be interpreted as a number.
    NotNumeric(String),
    /// Numeric value below the field's minimum bound.
    BelowMinimum { value: f64, min: f64 },
    /// Numeric value above the field's maximum bound.
    AboveMaximum { value: f64, max: f64 },
    /// Input cannot be interpreted as a date/time.
    NotDate(String),
    /// Selection value outside the field's choice set.
    UnknownChoice(String),
}

impl Display for ViolationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required => write!(f, "a value is required"),
            Self::NotText(value) => write!(f, "expected text, got `{value}`"),
            Self::NotNumeric(value) => write!(f, "`{value}` is not a valid number"),
            Self::BelowMinimum { value, min } => {
                write!(f, "{value} is below the minimum {min}")
            }
            Self::AboveMaximum { value, max } => {
                write!(f, "{value} is above the maximum {max}")
            }
            Self::NotDate(value) => write!(f, "`{value}` is not a recognized date/time"),
            Self::UnknownChoice(value) => {
                write!(f, "`{value}` is not one of the allowed choices")
            }
        }
    }
}

/// A single schema field: key, required flag and variant constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    key: String,
    required: bool,
    kind: FieldKind,
}

impl Field {
    /// Creates an optional field after validating the key shape.
    pub fn new(key: impl Into<String>, kind: FieldKind) -> Result<Self, InvalidFieldKey> {
        let key = key.into();
        if !FIELD_KEY_RE.is_match(&key) {
            return Err(InvalidFieldKey(key));
        }
        Ok(Self {
            key,
            required: false,
            kind,
        })
    }

    /// Marks the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Validates one raw attribute value into its normalized stored form.
    ///
    /// `None` and JSON `null` both count as "absent". `Ok(None)` means the
    /// key is omitted from the normalized attribute set.
    pub fn validate(&self, raw: Option<&Value>) -> Result<Option<Value>, ViolationReason> {
        let raw = raw.filter(|value| !value.is_null());
        match &self.kind {
            FieldKind::Text => self.validate_text(raw),
            FieldKind::Numeric { min, max } => self.validate_numeric(raw, *min, *max),
            FieldKind::Date => self.validate_date(raw),
            FieldKind::Selection { choices } => self.validate_selection(raw, choices),
        }
    }

    fn validate_text(&self, raw: Option<&Value>) -> Result<Option<Value>, ViolationReason> {
        let Some(value) = raw else {
            return self.absent();
        };
        let Value::String(text) = value else {
            return Err(ViolationReason::NotText(render_value(value)));
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return self.absent();
        }
        Ok(Some(Value::String(trimmed.to_string())))
    }

    fn validate_numeric(
        &self,
        raw: Option<&Value>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Option<Value>, ViolationReason> {
        let Some(value) = raw else {
            return self.absent();
        };
        let number = number_from_value(value)
            .ok_or_else(|| ViolationReason::NotNumeric(render_value(value)))?;
        if let Some(min) = min {
            if number < min {
                return Err(ViolationReason::BelowMinimum { value: number, min });
            }
        }
        if let Some(max) = max {
            if number > max {
                return Err(ViolationReason::AboveMaximum { value: number, max });
            }
        }
        Ok(Some(Value::String(canonical_decimal(number))))
    }

    fn validate_date(&self, raw: Option<&Value>) -> Result<Option<Value>, ViolationReason> {
        let Some(value) = raw else {
            return self.absent();
        };
        let Value::String(text) = value else {
            return Err(ViolationReason::NotDate(render_value(value)));
        };
        let parsed = parse_date_input(text)
            .ok_or_else(|| ViolationReason::NotDate(text.clone()))?;
        Ok(Some(Value::String(
            parsed.format(DATE_STORAGE_FORMAT).to_string(),
        )))
    }

    fn validate_selection(
        &self,
        raw: Option<&Value>,
        choices: &[String],
    ) -> Result<Option<Value>, ViolationReason> {
        let Some(value) = raw else {
            return self.absent();
        };
        let Value::String(text) = value else {
            return Err(ViolationReason::NotText(render_value(value)));
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return self.absent();
        }
        if !choices.iter().any(|choice| choice == trimmed) {
            return Err(ViolationReason::UnknownChoice(trimmed.to_string()));
        }
        Ok(Some(Value::String(trimmed.to_string())))
    }

    fn absent(&self) -> Result<Option<Value>, ViolationReason> {
        if self.required {
            Err(ViolationReason::Required)
        } else {
            Ok(None)
        }
    }

    /// Compiles a decoded filter spec into a predicate over this field.
    ///
    /// Spec shapes that do not fit the variant degrade to a literal
    /// exact-match on the raw stored spec; compilation is total.
    pub fn compile_filter(&self, spec: &FilterSpec) -> Predicate {
        match &self.kind {
            FieldKind::Text | FieldKind::Selection { .. } => self.compile_text_filter(spec),
            FieldKind::Numeric { .. } => self.compile_numeric_filter(spec),
            FieldKind::Date => self.compile_date_filter(spec),
        }
    }

    fn compile_text_filter(&self, spec: &FilterSpec) -> Predicate {
        match spec.shape() {
            SpecShape::Scalar(value) => match scalar_text(value) {
                Some(text) => Predicate::TextEq {
                    key: self.key.clone(),
                    value: text,
                },
                None => self.literal(spec),
            },
            SpecShape::List(values) => Predicate::TextIn {
                key: self.key.clone(),
                values: values.iter().filter_map(scalar_text).collect(),
            },
            SpecShape::Range { .. } | SpecShape::Literal => self.literal(spec),
        }
    }

    fn compile_numeric_filter(&self, spec: &FilterSpec) -> Predicate {
        match spec.shape() {
            SpecShape::Scalar(value) => match number_from_value(value) {
                Some(number) => Predicate::NumberEq {
                    key: self.key.clone(),
                    value: number,
                },
                None => self.literal(spec),
            },
            SpecShape::Range { min, max } => {
                let min = min.as_ref().and_then(number_from_value);
                let max = max.as_ref().and_then(number_from_value);
                if min.is_none() && max.is_none() {
                    return self.literal(spec);
                }
                Predicate::NumberBetween {
                    key: self.key.clone(),
                    min,
                    max,
                }
            }
            SpecShape::List(values) => Predicate::NumberIn {
                key: self.key.clone(),
                values: values.iter().filter_map(number_from_value).collect(),
            },
            SpecShape::Literal => match spec.raw().trim().parse::<f64>() {
                Ok(number) if number.is_finite() => Predicate::NumberEq {
                    key: self.key.clone(),
                    value: number,
                },
                _ => self.literal(spec),
            },
        }
    }

    fn compile_date_filter(&self, spec: &FilterSpec) -> Predicate {
        match spec.shape() {
            SpecShape::Scalar(value) => match scalar_date(value) {
                Some(date) => Predicate::DateEq {
                    key: self.key.clone(),
                    value: date,
                },
                None => self.literal(spec),
            },
            SpecShape::Range { min, max } => {
                let min = min.as_ref().and_then(scalar_date);
                let max = max.as_ref().and_then(scalar_date);
                if min.is_none() && max.is_none() {
                    return self.literal(spec);
                }
                Predicate::DateBetween {
                    key: self.key.clone(),
                    min,
                    max,
                }
            }
            SpecShape::List(values) => Predicate::TextIn {
                key: self.key.clone(),
                values: values.iter().filter_map(scalar_date).collect(),
            },
            SpecShape::Literal => match parse_date_input(spec.raw()) {
                Some(parsed) => Predicate::DateEq {
                    key: self.key.clone(),
                    value: parsed.format(DATE_STORAGE_FORMAT).to_string(),
                },
                None => self.literal(spec),
            },
        }
    }

    fn literal(&self, spec: &FilterSpec) -> Predicate {
        Predicate::TextEq {
            key: self.key.clone(),
            value: spec.raw().to_string(),
        }
    }
}

/// Parses supported date input forms into a naive timestamp.
///
/// Accepted: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM`,
/// `YYYY-MM-DD` (midnight).
pub fn parse_date_input(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Canonical decimal rendering used for numeric attribute storage.
fn canonical_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|n| n.is_finite()),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => number.as_f64().map(canonical_decimal),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn scalar_date(value: &Value) -> Option<String> {
    let Value::String(text) = value else {
        return None;
    };
    parse_date_input(text).map(|parsed| parsed.format(DATE_STORAGE_FORMAT).to_string())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
