//! The toxic contract, and the configured records built on top of it.
//!
//! A toxic is a fault-injection stage. Concrete types implement [`Toxic`];
//! the registry keeps a zero-configured prototype of each and turns an
//! operator's [`ToxicConfig`] into an [`ActiveToxic`] via `configure`.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::stub::{ToxicState, ToxicStub};

/// Capability set shared by every stage type.
pub trait Toxic: Send + Sync + fmt::Debug {
    /// Allocate this stage's per-stub state in its uninitialized form.
    /// The stage finishes initialization on the first pass of `pipe`.
    fn new_state(&self) -> Option<ToxicState> {
        None
    }

    /// Preferred capacity of the stub's input channel. Advisory only.
    fn buffer_size(&self) -> usize {
        0
    }

    /// The stage loop. Returns when interrupted or when the input closes;
    /// must never drop a chunk it has already taken from the input.
    fn pipe<'a>(&'a self, stub: &'a mut ToxicStub) -> BoxFuture<'a, ()>;

    /// Build a configured copy from a JSON attribute object.
    fn configure(&self, attributes: serde_json::Value) -> Result<Arc<dyn Toxic>, ToxicError>;

    /// Current configuration as a JSON attribute object.
    fn attributes(&self) -> serde_json::Value;
}

/// Which half of a proxied connection a toxic applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Client → upstream server.
    Upstream,
    /// Upstream server → client.
    #[default]
    Downstream,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Upstream => f.write_str("upstream"),
            StreamDirection::Downstream => f.write_str("downstream"),
        }
    }
}

// ── Declarations ──────────────────────────────────────────────────────────────

/// Operator-facing toxic declaration, as found in config files and API bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicConfig {
    /// Unique per proxy. Empty = `<type>_<stream>`.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub stream: StreamDirection,
    /// Probability the toxic applies to a given connection.
    #[serde(default = "default_toxicity")]
    pub toxicity: f32,
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
}

fn default_toxicity() -> f32 {
    1.0
}

fn empty_attributes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToxicConfig {
    pub fn new(kind: impl Into<String>, stream: StreamDirection) -> Self {
        Self {
            name: String::new(),
            kind: kind.into(),
            stream,
            toxicity: default_toxicity(),
            attributes: empty_attributes(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_toxicity(mut self, toxicity: f32) -> Self {
        self.toxicity = toxicity;
        self
    }

    /// The declared name, or `<type>_<stream>` when none was given.
    pub fn resolved_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}_{}", self.kind, self.stream)
        } else {
            self.name.clone()
        }
    }
}

/// Partial update of an existing toxic. Attributes are merged key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToxicPatch {
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub toxicity: Option<f32>,
}

/// A configured toxic installed on a proxy.
#[derive(Debug, Clone)]
pub struct ActiveToxic {
    pub name: String,
    pub kind: String,
    pub stream: StreamDirection,
    pub toxicity: f32,
    pub toxic: Arc<dyn Toxic>,
}

impl ActiveToxic {
    /// Roll the toxicity for one stub. Anything at 1.0 always applies.
    pub fn applies(&self) -> bool {
        self.toxicity >= 1.0 || rand::random::<f32>() < self.toxicity
    }

    /// Declaration view, with the toxic's current attributes.
    pub fn describe(&self) -> ToxicConfig {
        ToxicConfig {
            name: self.name.clone(),
            kind: self.kind.clone(),
            stream: self.stream,
            toxicity: self.toxicity,
            attributes: self.toxic.attributes(),
        }
    }
}

pub(crate) fn validate_toxicity(toxicity: f32) -> Result<f32, ToxicError> {
    if (0.0..=1.0).contains(&toxicity) {
        Ok(toxicity)
    } else {
        Err(ToxicError::InvalidToxicity(toxicity))
    }
}

/// The toxics of `toxics` that apply to `direction`, in installation order.
pub fn chain_for(toxics: &[ActiveToxic], direction: StreamDirection) -> Vec<ActiveToxic> {
    toxics
        .iter()
        .filter(|t| t.stream == direction)
        .cloned()
        .collect()
}

/// Overlay `patch` onto `base`, key by key. Non-object patches replace.
pub fn merge_attributes(base: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ToxicError {
    #[error("unknown toxic type: {0}")]
    UnknownType(String),
    #[error("invalid attributes for {kind} toxic: {reason}")]
    InvalidAttributes { kind: String, reason: String },
    #[error("toxicity must be within 0.0..=1.0, got {0}")]
    InvalidToxicity(f32),
    #[error("toxic already exists: {0}")]
    Duplicate(String),
    #[error("toxic not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declaration_defaults() {
        let config: ToxicConfig = serde_json::from_value(json!({ "type": "latency" })).unwrap();
        assert_eq!(config.stream, StreamDirection::Downstream);
        assert_eq!(config.toxicity, 1.0);
        assert_eq!(config.attributes, json!({}));
        assert_eq!(config.resolved_name(), "latency_downstream");
    }

    #[test]
    fn explicit_name_wins() {
        let config = ToxicConfig::new("latency", StreamDirection::Upstream).named("slow");
        assert_eq!(config.resolved_name(), "slow");
    }

    #[test]
    fn toxicity_bounds() {
        assert!(validate_toxicity(0.0).is_ok());
        assert!(validate_toxicity(1.0).is_ok());
        assert!(matches!(
            validate_toxicity(1.5),
            Err(ToxicError::InvalidToxicity(_))
        ));
        assert!(validate_toxicity(f32::NAN).is_err());
    }

    #[test]
    fn merge_overlays_keys() {
        let merged = merge_attributes(
            &json!({ "latency": 100, "jitter": 5 }),
            &json!({ "jitter": 20 }),
        );
        assert_eq!(merged, json!({ "latency": 100, "jitter": 20 }));
    }

    #[test]
    fn chain_keeps_order_within_a_direction() {
        let active = |name: &str, stream| ActiveToxic {
            name: name.to_string(),
            kind: "noop".to_string(),
            stream,
            toxicity: 1.0,
            toxic: Arc::new(crate::noop::NoopToxic),
        };
        let toxics = [
            active("a", StreamDirection::Downstream),
            active("b", StreamDirection::Upstream),
            active("c", StreamDirection::Downstream),
        ];

        let down: Vec<_> = chain_for(&toxics, StreamDirection::Downstream)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(down, vec!["a", "c"]);
        assert_eq!(chain_for(&toxics, StreamDirection::Upstream).len(), 1);
        assert!(chain_for(&[], StreamDirection::Upstream).is_empty());
    }
}
