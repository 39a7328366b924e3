//! Opaque stored filter specs and their typed decoded shape.
//!
//! Rules persist one spec string per field key. A spec is either a
//! JSON-encoded structure (scalar, `{min,max}` range object, array) or a
//! bare scalar such as `Text` or `2024-05-01`. Decode failures are not
//! errors: anything unrecognized is carried as a literal exact-match value.

use serde_json::Value;

/// Decoded shape of one stored filter spec.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecShape {
    /// A single JSON scalar (string, number or bool): exact match.
    Scalar(Value),
    /// A `{min,max}` comparison object; both bounds optional, at least one set.
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    /// A JSON array: "value is one of" match.
    List(Vec<Value>),
    /// Anything else; the raw spec text is the match value.
    Literal,
}

/// One stored filter spec: the raw text plus its decoded shape.
///
/// The raw text is retained verbatim so literal fallbacks and storage
/// round-trips preserve the stored bytes exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    raw: String,
    shape: SpecShape,
}

impl FilterSpec {
    /// Decodes one stored spec string. Total; never fails.
    pub fn decode(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let shape = decode_shape(&raw);
        Self { raw, shape }
    }

    /// The stored spec text, byte-for-byte.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn shape(&self) -> &SpecShape {
        &self.shape
    }
}

fn decode_shape(raw: &str) -> SpecShape {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => SpecShape::List(items),
        Ok(Value::Object(map)) => {
            let recognized = map.keys().all(|key| key == "min" || key == "max");
            let min = map.get("min").cloned().filter(|value| !value.is_null());
            let max = map.get("max").cloned().filter(|value| !value.is_null());
            if recognized && (min.is_some() || max.is_some()) {
                SpecShape::Range { min, max }
            } else {
                SpecShape::Literal
            }
        }
        Ok(Value::Null) | Err(_) => SpecShape::Literal,
        Ok(scalar) => SpecShape::Scalar(scalar),
    }
}
