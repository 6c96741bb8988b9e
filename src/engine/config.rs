//! Engine configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{KyroFactError, KyroFactResult};
use crate::network::SaveQueueConfig;
use crate::observer::ObserverSystemConfig;

/// Configuration for [`super::FactEngine`]. Missing keys take their defaults.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FactEngineConfig {
    pub observer: ObserverSystemConfig,
    pub save_queue: SaveQueueConfig,
}

impl FactEngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> KyroFactResult<Self> {
        serde_json::from_str(text).map_err(|e| KyroFactError::config(format!("invalid engine config: {e}")))
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> KyroFactResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| KyroFactError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg = FactEngineConfig::from_json_str(r#"{ "save_queue": { "debounce_ms": 5 } }"#).unwrap();
        assert_eq!(cfg.save_queue.debounce_ms, 5);
        assert_eq!(cfg.save_queue.max_batch, SaveQueueConfig::default().max_batch);
        assert_eq!(cfg.observer.stream_capacity, 1024);
    }

    #[test]
    fn test_invalid_config() {
        let err = FactEngineConfig::from_json_str(r#"{ "observer": 3 }"#).unwrap_err();
        assert!(matches!(err, KyroFactError::Config { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = FactEngineConfig::from_json_file("/nonexistent/kyrofact.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
