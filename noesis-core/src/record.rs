//! Core record types for the Noesis substrate.
//!
//! Every entity in the substrate shares one shape: a [`Record`] with a
//! globally unique id, temporal/provenance metadata, and an open key/value
//! payload. Semantic subtypes are distinguished by a [`Kind`] tag and
//! dispatched through lookup tables, never through a type hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SubstrateError};

/// Metadata shared by all records: timestamps, lineage, confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Ordered list of ancestor record ids (lineage, not ownership)
    #[serde(default)]
    pub provenance: Vec<Uuid>,
    /// Confidence score in [0, 1]
    pub confidence: f64,
}

impl Metadata {
    /// Create metadata stamped with the current time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            provenance: Vec::new(),
            confidence: 1.0,
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::now()
    }
}

/// Semantic tag distinguishing record subtypes.
///
/// Polymorphism in the substrate is by tag: all kinds share the [`Record`]
/// shape, and kind-specific validation/default-content rules live in
/// lookup functions on this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Perception,
    Memory,
    Pattern,
    Connection,
    Transformation,
    Intent,
    Result,
    Qualia,
    Attention,
    Belief,
    Abstraction,
    /// Open extension point for callers defining their own tags
    #[serde(untagged)]
    Other(String),
}

impl Kind {
    /// Tag string as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Perception => "perception",
            Kind::Memory => "memory",
            Kind::Pattern => "pattern",
            Kind::Connection => "connection",
            Kind::Transformation => "transformation",
            Kind::Intent => "intent",
            Kind::Result => "result",
            Kind::Qualia => "qualia",
            Kind::Attention => "attention",
            Kind::Belief => "belief",
            Kind::Abstraction => "abstraction",
            Kind::Other(s) => s,
        }
    }

    /// Default content payload for this kind.
    pub fn default_content(&self) -> Map<String, Value> {
        let mut content = Map::new();
        match self {
            Kind::Memory => {
                content.insert("salience".into(), Value::from(1.0));
            }
            Kind::Qualia => {
                content.insert("valence".into(), Value::from(0.0));
                content.insert("intensity".into(), Value::from(0.5));
            }
            _ => {}
        }
        content
    }

    /// Kind-specific content validation.
    fn validate_content(&self, content: &Map<String, Value>) -> Result<()> {
        match self {
            Kind::Connection => {
                for field in ["source", "target"] {
                    let value = content.get(field).ok_or_else(|| {
                        SubstrateError::Validation(format!(
                            "connection record missing '{field}' field"
                        ))
                    })?;
                    parse_uuid_field(value).ok_or_else(|| {
                        SubstrateError::Validation(format!(
                            "connection '{field}' is not a valid uuid"
                        ))
                    })?;
                }
                Ok(())
            }
            Kind::Qualia => {
                let valence = content.get("valence").and_then(Value::as_f64).ok_or_else(
                    || SubstrateError::Validation("qualia record missing 'valence'".into()),
                )?;
                if !(-1.0..=1.0).contains(&valence) {
                    return Err(SubstrateError::Validation(format!(
                        "qualia valence {valence} outside [-1, 1]"
                    )));
                }
                let intensity = content
                    .get("intensity")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        SubstrateError::Validation("qualia record missing 'intensity'".into())
                    })?;
                if !(0.0..=1.0).contains(&intensity) {
                    return Err(SubstrateError::Validation(format!(
                        "qualia intensity {intensity} outside [0, 1]"
                    )));
                }
                if !content.contains_key("about") {
                    return Err(SubstrateError::Validation(
                        "qualia record missing 'about'".into(),
                    ));
                }
                Ok(())
            }
            Kind::Transformation => {
                if content.contains_key("llm_params") {
                    return Ok(());
                }
                match content.get("operation") {
                    Some(Value::String(_)) => Ok(()),
                    _ => Err(SubstrateError::Validation(
                        "transformation record needs a string 'operation' or 'llm_params'".into(),
                    )),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Parse a uuid out of a JSON value (string form).
pub(crate) fn parse_uuid_field(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

/// Universal tagged entity of the substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Globally unique identifier, immutable once created
    pub id: Uuid,
    /// Semantic subtype tag
    pub kind: Kind,
    /// Temporal and lineage metadata
    pub metadata: Metadata,
    /// Open key/value payload
    #[serde(default)]
    pub content: Map<String, Value>,
}

impl Record {
    /// Create a record of the given kind with a fresh id, current
    /// timestamps and the kind's default content.
    pub fn new(kind: Kind) -> Self {
        let content = kind.default_content();
        Self {
            id: Uuid::new_v4(),
            kind,
            metadata: Metadata::now(),
            content,
        }
    }

    /// Set a content field.
    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        self.content.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or_default(),
        );
        self
    }

    /// Replace the whole content payload.
    pub fn with_content(mut self, content: Map<String, Value>) -> Self {
        self.content = content;
        self
    }

    /// Append provenance references.
    pub fn with_provenance(mut self, ancestors: impl IntoIterator<Item = Uuid>) -> Self {
        self.metadata.provenance.extend(ancestors);
        self
    }

    /// Set the confidence score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = confidence;
        self
    }

    /// Override the creation timestamp (updated_at follows).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.metadata.created_at = created_at;
        self.metadata.updated_at = created_at;
        self
    }

    /// Validate invariant fields; surfaced at construction sites.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.metadata.confidence) {
            return Err(SubstrateError::Validation(format!(
                "confidence {} outside [0, 1]",
                self.metadata.confidence
            )));
        }
        self.kind.validate_content(&self.content)
    }

    /// Read a string content field.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Read a numeric content field.
    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.content.get(key).and_then(Value::as_f64)
    }

    /// Read a boolean content field, defaulting to false.
    pub fn flag(&self, key: &str) -> bool {
        self.content
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Current salience weight (default 1.0 when unset).
    pub fn salience(&self) -> f64 {
        self.field_f64("salience").unwrap_or(1.0)
    }

    /// Source endpoint of a connection record.
    pub fn source(&self) -> Option<Uuid> {
        self.content.get("source").and_then(parse_uuid_field)
    }

    /// Target endpoint of a connection record.
    pub fn target(&self) -> Option<Uuid> {
        self.content.get("target").and_then(parse_uuid_field)
    }

    /// Build a connection record between two node ids.
    pub fn connection(source: Uuid, target: Uuid) -> Self {
        Record::new(Kind::Connection)
            .with_field("source", source.to_string())
            .with_field("target", target.to_string())
    }

    /// Build a transformation record for a registered operation.
    pub fn transformation(operation: &str) -> Self {
        Record::new(Kind::Transformation).with_field("operation", operation)
    }

    /// Build a transformation record delegating to the generation service.
    pub fn generation(params: &LlmParams) -> Self {
        Record::new(Kind::Transformation).with_field("llm_params", params)
    }

    /// Generation parameters, when this transformation carries any.
    pub fn llm_params(&self) -> Option<std::result::Result<LlmParams, serde_json::Error>> {
        self.content
            .get("llm_params")
            .map(|v| serde_json::from_value(v.clone()))
    }
}

/// Parameters for the external generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmParams {
    /// Model name, e.g. "gpt-4o-mini"
    pub model: String,
    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// User prompt
    pub user_prompt: String,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Stop sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    /// Extra request parameters merged into the payload
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra_params: Map<String, Value>,
}

impl LlmParams {
    /// Minimal parameters for a user prompt against a model.
    pub fn new(model: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            temperature: Some(0.2),
            max_tokens: Some(256),
            top_p: None,
            stop: None,
            extra_params: Map::new(),
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// An immutable submission of a transformation for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Unique identifier for the intent
    pub id: Uuid,
    /// Transformation record to execute
    pub transformation: Record,
    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,
    /// Version number (new intents mint new versions, never mutate)
    pub version: u32,
}

impl Intent {
    /// Wrap a transformation record into a version-1 intent.
    pub fn new(transformation: Record) -> Self {
        Self {
            id: Uuid::new_v4(),
            transformation,
            submitted_at: Utc::now(),
            version: 1,
        }
    }
}

/// Terminal (or transiently pending) status of an intent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    /// Transient only; never persisted as a final result
    Pending,
}

/// Outcome of an intent execution. One intent yields exactly one
/// terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Unique identifier for the outcome
    pub id: Uuid,
    /// Id of the submitted intent or transformation
    pub intent_id: Uuid,
    /// Execution status
    pub status: OutcomeStatus,
    /// Result data on success
    pub output: Option<Value>,
    /// Error message on failure
    pub error: Option<String>,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    /// Successful outcome carrying output data.
    pub fn success(intent_id: Uuid, output: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id,
            status: OutcomeStatus::Success,
            output: Some(output),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed outcome carrying a descriptive error.
    pub fn failure(intent_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id,
            status: OutcomeStatus::Failure,
            output: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Pending marker for a still-running intent.
    pub fn pending(intent_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id,
            status: OutcomeStatus::Pending,
            output: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this outcome is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status != OutcomeStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        let record = Record::new(Kind::Memory).with_confidence(0.7);
        assert!(record.validate().is_ok());

        let record = Record::new(Kind::Memory).with_confidence(1.2);
        assert!(matches!(
            record.validate(),
            Err(SubstrateError::Validation(_))
        ));
    }

    #[test]
    fn test_connection_requires_endpoints() {
        let bare = Record::new(Kind::Connection);
        assert!(bare.validate().is_err());

        let conn = Record::connection(Uuid::new_v4(), Uuid::new_v4());
        assert!(conn.validate().is_ok());
        assert!(conn.source().is_some());
        assert!(conn.target().is_some());
    }

    #[test]
    fn test_qualia_validation() {
        let qualia = Record::new(Kind::Qualia)
            .with_field("valence", 0.5)
            .with_field("intensity", 0.8)
            .with_field("about", Uuid::new_v4().to_string());
        assert!(qualia.validate().is_ok());

        let out_of_range = Record::new(Kind::Qualia)
            .with_field("valence", 2.0)
            .with_field("intensity", 0.8)
            .with_field("about", Uuid::new_v4().to_string());
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_transformation_needs_operation_or_params() {
        let mut bare = Record::new(Kind::Transformation);
        bare.content.clear();
        assert!(bare.validate().is_err());

        assert!(Record::transformation("add_node").validate().is_ok());
        assert!(Record::generation(&LlmParams::new("gpt-4o-mini", "hello"))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_kind_tag_roundtrip() {
        let json = serde_json::to_string(&Kind::Qualia).unwrap();
        assert_eq!(json, "\"qualia\"");

        let custom: Kind = serde_json::from_str("\"ritual\"").unwrap();
        assert_eq!(custom, Kind::Other("ritual".to_string()));
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = Record::new(Kind::Perception)
            .with_field("modality", "visual")
            .with_provenance([Uuid::new_v4()])
            .with_confidence(0.9);
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_outcome_helpers() {
        let intent_id = Uuid::new_v4();
        let ok = Outcome::success(intent_id, serde_json::json!({"n": 1}));
        assert_eq!(ok.status, OutcomeStatus::Success);
        assert!(ok.is_terminal());

        let pending = Outcome::pending(intent_id);
        assert!(!pending.is_terminal());
    }
}
