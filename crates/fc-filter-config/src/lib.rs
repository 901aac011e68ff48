//! Extractor configuration for the event filter subsystem.
//!
//! Owns the pure, synchronous pieces of §4.A: parsing and validating the
//! `event_type -> field_name -> extractor_spec` mapping, and applying a
//! single extractor to a raw event payload. Isolating these here keeps the
//! supervisor's reload logic free of format concerns, same as the
//! teacher keeps `fc-config` separate from `fc-router`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Either a filesystem path or an inline serialized document.
///
/// `load` picks by heuristic: a `Path` that exists on disk is read as a
/// file; anything else (including `Inline`) is parsed as JSON text
/// directly. This matches §6: "either a filesystem path ... or an inline
/// JSON string; selection is by heuristic".
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Path(PathBuf),
    Inline(String),
    /// No source configured: yields an empty `ExtractorMap`.
    Empty,
}

impl ConfigSource {
    pub fn path(p: impl Into<PathBuf>) -> Self {
        Self::Path(p.into())
    }

    pub fn inline(s: impl Into<String>) -> Self {
        Self::Inline(s.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to load extractor config: {0}")]
    ConfigLoad(String),

    #[error("failed to parse extractor config: {0}")]
    ConfigParse(String),

    #[error("invalid extractor config: {0}")]
    ConfigInvalid(String),
}

/// The primitive type a field is expected to hold after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
}

/// A typed value, either extracted from an event or supplied in a
/// subscription constraint. Equality is typed: numbers compare by value,
/// strings by byte equality, booleans nominally, and `Null` only equals
/// `Null` (§4.C matching algorithm). Hand-rolled `Eq`/`Hash` (rather than
/// derived) so `Subscription` can sit in a `HashSet`: numbers hash and
/// compare by bit pattern, which coincides with by-value equality for the
/// finite values JSON numbers produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            (FieldValue::Num(a), FieldValue::Num(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Null, FieldValue::Null) => true,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl std::hash::Hash for FieldValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            FieldValue::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            FieldValue::Num(n) => {
                1u8.hash(state);
                n.to_bits().hash(state);
            }
            FieldValue::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            FieldValue::Null => 3u8.hash(state),
        }
    }
}

/// A declarative rule for pulling a typed value out of a raw event
/// payload. Modeled as a tagged sum over extractor kinds per DESIGN.md;
/// today the only kind is a dot-separated JSON path plus the expected
/// primitive type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorSpec {
    JsonPath {
        path: String,
        #[serde(rename = "type")]
        expected_type: FieldKind,
    },
}

impl ExtractorSpec {
    fn validate(&self) -> Result<(), String> {
        match self {
            ExtractorSpec::JsonPath { path, .. } => {
                if path.is_empty() {
                    return Err("json path must not be empty".to_string());
                }
                if path.split('.').any(|segment| segment.is_empty()) {
                    return Err(format!("json path has an empty segment: {path:?}"));
                }
                Ok(())
            }
        }
    }
}

/// `field_name -> extractor_spec` for a single event type. May be empty:
/// an event type can be known but have no indexable fields.
pub type FieldMap = HashMap<String, ExtractorSpec>;

/// `event_type -> FieldMap`, the full extractor configuration snapshot.
pub type ExtractorMap = HashMap<String, FieldMap>;

/// Validates that every `ExtractorSpec` in a `FieldMap` is well-formed.
/// Called for each type's `FieldMap` during `load`, and again by the
/// supervisor before accepting a reloaded map (§4.D).
pub fn check_filter_config(fields: &FieldMap) -> Result<(), ConfigError> {
    for (field_name, spec) in fields {
        spec.validate()
            .map_err(|reason| ConfigError::ConfigInvalid(format!("field {field_name:?}: {reason}")))?;
    }
    Ok(())
}

/// Returns the `FieldMap` for `event_type`, or an empty one when the type
/// is unknown to `map` (§4.A).
pub fn for_event_type(map: &ExtractorMap, event_type: &str) -> FieldMap {
    map.get(event_type).cloned().unwrap_or_default()
}

/// Loads an `ExtractorMap` from `source`, validating every type's
/// `FieldMap` along the way. An absent/empty source yields an empty map
/// rather than an error (§6).
pub fn load(source: &ConfigSource) -> Result<ExtractorMap, ConfigError> {
    let text = match source {
        ConfigSource::Empty => return Ok(ExtractorMap::new()),
        ConfigSource::Path(path) => {
            if path_exists(path) {
                debug!(?path, "loading extractor config from file");
                std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::ConfigLoad(format!("{}: {e}", path.display())))?
            } else {
                warn!(?path, "extractor config path does not exist, starting empty");
                return Ok(ExtractorMap::new());
            }
        }
        ConfigSource::Inline(s) => s.clone(),
    };

    if text.trim().is_empty() {
        return Ok(ExtractorMap::new());
    }

    let raw: ExtractorMap = serde_json::from_str(&text)
        .map_err(|e| ConfigError::ConfigParse(e.to_string()))?;

    for fields in raw.values() {
        check_filter_config(fields)?;
    }

    Ok(raw)
}

fn path_exists(path: &Path) -> bool {
    path.exists()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("field not present in extractor config")]
    UnknownField,

    #[error("field {0:?} missing or unreachable in event payload")]
    FieldMissing(String),

    #[error("field {0:?} has unexpected type in event payload")]
    TypeMismatch(String),
}

/// Applies `spec` to `payload`, returning the typed value at the path or
/// an `ExtractionError` if the shape doesn't match. Per-event extraction
/// errors never panic; the worker maps them to "does not match" (§7).
pub fn extract(spec: &ExtractorSpec, payload: &serde_json::Value) -> Result<FieldValue, ExtractionError> {
    match spec {
        ExtractorSpec::JsonPath { path, expected_type } => {
            let mut current = payload;
            for segment in path.split('.') {
                current = current
                    .get(segment)
                    .ok_or_else(|| ExtractionError::FieldMissing(path.clone()))?;
            }

            match (expected_type, current) {
                (FieldKind::String, serde_json::Value::String(s)) => Ok(FieldValue::Str(s.clone())),
                (FieldKind::Number, serde_json::Value::Number(n)) => n
                    .as_f64()
                    .map(FieldValue::Num)
                    .ok_or_else(|| ExtractionError::TypeMismatch(path.clone())),
                (FieldKind::Bool, serde_json::Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
                _ => Err(ExtractionError::TypeMismatch(path.clone())),
            }
        }
    }
}

/// Typed equality per §4.C: numeric by value, strings by byte equality,
/// booleans nominally, `Null` only equal to `Null`. Differing kinds never
/// compare equal. `FieldValue`'s own `PartialEq` already implements this;
/// this free function exists so callers outside this crate don't need to
/// know that detail to get it right.
pub fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    a == b
}
