//! Engine configuration: identifier bases, warm-up pacing and the pooled
//! type table, loaded from JSON.
//!
//! ```
//! use gemfall_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{
//!     "warmup": { "frame_budget_us": 500 },
//!     "types": [ { "name": "gem.red", "pool_quantity": 40, "replicated_mode": true } ]
//! }"#).unwrap();
//! assert_eq!(config.warmup.frame_budget_us, 500);
//! assert_eq!(config.ids.replicated_node, 0x20);
//! ```

use std::path::Path;

use gemfall_pool::config::IdBases;
use gemfall_pool::descriptor::{TypeDescriptor, TypeRegistry};
use gemfall_pool::PoolError;
use serde::{Deserialize, Serialize};

/// Pacing of the pool warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Wall-clock budget per frame, in microseconds.
    pub frame_budget_us: u64,
    /// Give up after this many frames. `None` waits forever.
    pub max_frames: Option<u64>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            frame_budget_us: 2_000,
            max_frames: None,
        }
    }
}

/// Everything a [`Level`](crate::level::Level) needs to build its pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ids: IdBases,
    pub warmup: WarmupConfig,
    /// Pooled types in registration order.
    pub types: Vec<TypeDescriptor>,
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Self::from_json_str(&text)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
    }

    /// Builder: append a pooled type.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Registry holding [`types`](Self::types), in order.
    pub fn registry(&self) -> Result<TypeRegistry, PoolError> {
        TypeRegistry::from_descriptors(self.types.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.warmup.frame_budget_us, 2_000);
        assert_eq!(config.warmup.max_frames, None);
    }

    #[test]
    fn bad_document_names_the_problem() {
        let err = EngineConfig::from_json_str(r#"{"types": 3}"#).unwrap_err();
        assert!(err.to_string().contains("invalid engine config"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = EngineConfig::from_path("/nonexistent/gemfall.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gemfall.json"));
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let config = EngineConfig::default()
            .with_type(TypeDescriptor::new("gem", 2))
            .with_type(TypeDescriptor::new("gem", 3));
        assert!(matches!(config.registry(), Err(PoolError::DuplicateType { .. })));
    }
}
