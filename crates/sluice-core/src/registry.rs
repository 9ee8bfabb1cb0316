//! Toxic registry: type name → zero-configured prototype.
//!
//! Built once at startup and shared read-only (`Arc<ToxicRegistry>`) with
//! whatever builds chains. Unknown names fail here, before any live chain
//! is touched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::latency::LatencyToxic;
use crate::noop::NoopToxic;
use crate::toxic::{validate_toxicity, ActiveToxic, Toxic, ToxicConfig, ToxicError};

#[derive(Default)]
pub struct ToxicRegistry {
    prototypes: HashMap<String, Arc<dyn Toxic>>,
}

impl ToxicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every toxic type shipped with sluice.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("noop", Arc::new(NoopToxic));
        registry.register("latency", Arc::new(LatencyToxic::default()));
        registry
    }

    /// Register a prototype. Re-registering a name replaces the prototype.
    /// Returns true if the name was new.
    pub fn register(&mut self, name: impl Into<String>, prototype: Arc<dyn Toxic>) -> bool {
        self.prototypes.insert(name.into(), prototype).is_none()
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn Toxic>, ToxicError> {
        self.prototypes
            .get(name)
            .ok_or_else(|| ToxicError::UnknownType(name.to_string()))
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.prototypes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Turn a declaration into a configured toxic.
    pub fn instantiate(&self, config: &ToxicConfig) -> Result<ActiveToxic, ToxicError> {
        let prototype = self.lookup(&config.kind)?;
        let toxicity = validate_toxicity(config.toxicity)?;
        let attributes = match &config.attributes {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        let toxic = prototype.configure(attributes)?;

        Ok(ActiveToxic {
            name: config.resolved_name(),
            kind: config.kind.clone(),
            stream: config.stream,
            toxicity,
            toxic,
        })
    }
}

impl std::fmt::Debug for ToxicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToxicRegistry")
            .field("types", &self.names())
            .finish()
    }
}
