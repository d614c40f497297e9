//! # Configuration
//!
//! Runtime settings, loaded from TOML and then overridden from the environment.
//! Every field has a default, so an empty document is a valid configuration.

use crate::error::PanelError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Prefix of every resource endpoint, e.g. `/api` in `/api/users/force`.
    pub api_prefix: String,
    /// Channel capacity of the storage actor.
    pub storage_buffer: usize,
    /// Pending attachments older than this are pruned.
    pub pending_attachment_ttl_hours: i64,
    /// Number of attachments removed per storage request while pruning.
    pub prune_chunk_size: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            storage_buffer: 32,
            pending_attachment_ttl_hours: 24,
            prune_chunk_size: 100,
        }
    }
}

impl PanelConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, PanelError> {
        toml::from_str(content)
            .map_err(|e| PanelError::Config(e.to_string()))
            .and_then(Self::validate)
    }

    /// Loads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PanelError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PanelError::Config(format!("could not read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Applies `PANEL_API_PREFIX` and `PANEL_STORAGE_BUFFER` when set.
    pub fn with_env_overrides(self) -> Result<Self, PanelError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, PanelError> {
        if let Some(prefix) = var("PANEL_API_PREFIX") {
            self.api_prefix = prefix;
        }
        if let Some(buffer) = var("PANEL_STORAGE_BUFFER") {
            self.storage_buffer = buffer
                .parse()
                .map_err(|_| PanelError::Config(format!("PANEL_STORAGE_BUFFER is not a number: {buffer}")))?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, PanelError> {
        if self.storage_buffer == 0 {
            return Err(PanelError::Config("storage_buffer must be positive".into()));
        }
        if self.prune_chunk_size == 0 {
            return Err(PanelError::Config("prune_chunk_size must be positive".into()));
        }
        Ok(self)
    }

    /// `{api_prefix}/{resource}` without a doubled slash.
    pub fn resource_endpoint(&self, resource: &str) -> String {
        format!("{}/{}", self.api_prefix.trim_end_matches('/'), resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PanelConfig::from_toml_str("").unwrap();
        assert_eq!(config, PanelConfig::default());
        assert_eq!(config.resource_endpoint("users"), "/api/users");
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = PanelConfig::from_toml_str("api_prefix = \"/nova-api/\"\nprune_chunk_size = 10").unwrap();
        assert_eq!(config.resource_endpoint("users"), "/nova-api/users");
        assert_eq!(config.prune_chunk_size, 10);
        assert_eq!(config.storage_buffer, 32);
    }

    #[test]
    fn overrides_are_validated() {
        let config = PanelConfig::default()
            .with_overrides(|name| (name == "PANEL_API_PREFIX").then(|| "/admin".to_string()))
            .unwrap();
        assert_eq!(config.api_prefix, "/admin");

        let invalid = PanelConfig::default().with_overrides(|name| (name == "PANEL_STORAGE_BUFFER").then(|| "lots".to_string()));
        assert!(matches!(invalid, Err(PanelError::Config(_))));
    }

    #[test]
    fn zero_sizes_in_a_document_are_rejected() {
        assert!(matches!(PanelConfig::from_toml_str("storage_buffer = 0"), Err(PanelError::Config(_))));
        assert!(matches!(PanelConfig::from_toml_str("prune_chunk_size = 0"), Err(PanelError::Config(_))));

        let path = std::env::temp_dir().join(format!("panel-config-{}.toml", std::process::id()));
        std::fs::write(&path, "storage_buffer = 0\n").unwrap();
        let loaded = PanelConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(loaded, Err(PanelError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(PanelConfig::from_toml_str("api_prefix = ["), Err(PanelError::Config(_))));
    }
}
