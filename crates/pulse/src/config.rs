use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Remote field names backing each `ContentEntity` attribute.
///
/// Content types differ only in these names (a tweet keeps its text in
/// `tweet`, a photo post in `caption`), so one engine serves all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub owner_id: String,
    pub owner_display_name: String,
    pub body: String,
    pub media_url: String,
    pub created_at: String,
    pub modified_at: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            owner_id: "userId".to_string(),
            owner_display_name: "userName".to_string(),
            body: "body".to_string(),
            media_url: "imageUrl".to_string(),
            created_at: "createdAt".to_string(),
            modified_at: "modifiedAt".to_string(),
        }
    }
}

impl FieldMap {
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Configuration of one feed kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Remote collection name. Defaults to the feed kind's key.
    pub collection: String,
    /// Maximum body length in characters
    pub max_body_len: usize,
    /// Length of condensed previews in characters
    pub preview_len: usize,
    pub fields: FieldMap,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            collection: String::new(),
            max_body_len: 180,
            preview_len: 60,
            fields: FieldMap::default(),
        }
    }
}

impl FeedConfig {
    pub fn new(collection: impl Into<String>, body_field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: FieldMap::with_body(body_field),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

/// Top-level configuration, usually loaded from `pulse.yaml`.
///
/// Every field has a default, so partial files are valid:
///
/// ```yaml
/// logging:
///   filter: "pulse=debug"
/// feeds:
///   tweets:
///     max_body_len: 280
///     fields:
///       body: tweet
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub logging: LoggingConfig,
    pub feeds: BTreeMap<String, FeedConfig>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        let mut feeds = BTreeMap::new();
        feeds.insert("tweets".to_string(), FeedConfig::new("tweets", "tweet"));
        feeds.insert("posts".to_string(), FeedConfig::new("posts", "caption"));
        feeds.insert("shop".to_string(), FeedConfig::new("shop", "description"));

        Self {
            logging: LoggingConfig::default(),
            feeds,
        }
    }
}

impl PulseConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: PulseConfig = serde_yaml::from_str(content)?;

        for (kind, feed) in config.feeds.iter_mut() {
            if feed.collection.is_empty() {
                feed.collection = kind.clone();
            }
            anyhow::ensure!(
                feed.preview_len > 0,
                "feed '{}': preview_len must be positive",
                kind
            );
        }

        Ok(config)
    }

    pub fn feed(&self, kind: &str) -> Option<&FeedConfig> {
        self.feeds.get(kind)
    }
}
