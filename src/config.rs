//! Engine configuration
//!
//! Loaded from YAML, then overridden from `CONTACT_WIZARD_*` environment
//! variables. Every key has a default, so an empty document is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::draft::{DraftStore, FileDraftStore, MemoryDraftStore};
use crate::error::ConfigError;

const ENV_PREFIX: &str = "CONTACT_WIZARD_";

/// Placeholder in `contact_link_template` replaced by the contact id
pub const CID_PLACEHOLDER: &str = "{cid}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Save the draft on every successful Next / Previous
    pub auto_save: bool,
    /// Maximum autocomplete results
    pub search_limit: usize,
    /// URL of a contact's CRM page; `{cid}` is replaced by the contact id
    pub contact_link_template: String,
    pub draft: DraftConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_save: false,
            search_limit: 10,
            contact_link_template: "https://crm.example.org/contact/view?reset=1&cid={cid}"
                .to_string(),
            draft: DraftConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub backend: DraftBackend,
    /// Directory for the file backend
    pub dir: PathBuf,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            backend: DraftBackend::Memory,
            dir: PathBuf::from("drafts"),
        }
    }
}

impl DraftConfig {
    /// Instantiate the configured backend
    pub fn build(&self) -> Arc<dyn DraftStore> {
        match self.backend {
            DraftBackend::Memory => Arc::new(MemoryDraftStore::new()),
            DraftBackend::File => Arc::new(FileDraftStore::new(self.dir.clone())),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading engine configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a YAML document (no environment overrides)
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Takes a lookup function so
    /// tests need not touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("AUTO_SAVE") {
            self.auto_save = parse_bool("auto_save", &value)?;
        }
        if let Some(value) = var("SEARCH_LIMIT") {
            self.search_limit = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "search_limit".to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = var("CONTACT_LINK_TEMPLATE") {
            self.contact_link_template = value;
        }
        if let Some(value) = var("DRAFT_BACKEND") {
            self.draft.backend = match value.to_ascii_lowercase().as_str() {
                "memory" => DraftBackend::Memory,
                "file" => DraftBackend::File,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "draft.backend".to_string(),
                        value,
                    })
                }
            };
        }
        if let Some(value) = var("DRAFT_DIR") {
            self.draft.dir = PathBuf::from(value);
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.search_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "search_limit".to_string(),
                value: "0".to_string(),
            });
        }
        let sample = self.contact_link_template.replace(CID_PLACEHOLDER, "1");
        if !self.contact_link_template.contains(CID_PLACEHOLDER) || Url::parse(&sample).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "contact_link_template".to_string(),
                value: self.contact_link_template.clone(),
            });
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
