//! trickle.toml configuration parser.
//!
//! Static configuration only: which controllers and layouts render
//! progressively, and the User-Agent padding table.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::mode::StreamingPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Per-controller layout and progressive settings, keyed by controller name.
    #[serde(default)]
    pub controllers: HashMap<String, StreamingPolicy>,
    /// Per-layout overrides, keyed by layout name.
    #[serde(default)]
    pub layouts: HashMap<String, LayoutSettings>,
    #[serde(default)]
    pub padding: PaddingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutSettings {
    /// `Some(false)` opts a layout out even under a progressive controller;
    /// `Some(true)` opts it in.
    pub progressive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rules")]
    pub rules: Vec<PaddingRule>,
}

/// One browser family: a User-Agent regex and the size the first chunk
/// is padded up to. A target of 0 marks the family as exempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddingRule {
    pub family: String,
    pub pattern: String,
    pub target: usize,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: default_rules(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Built-in family table. Order matters: Chromium agents also advertise
/// Safari, so Chrome is matched first.
pub fn default_rules() -> Vec<PaddingRule> {
    let rule = |family: &str, pattern: &str, target| PaddingRule {
        family: family.to_string(),
        pattern: pattern.to_string(),
        target,
    };
    vec![
        rule("msie", r"MSIE \d", 255),
        rule("firefox", r"Firefox/", 0),
        rule("chrome", r"Chrome/", 2048),
        rule("safari", r"Safari/", 1024),
    ]
}

impl StreamingConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config = StreamingConfig::from_toml_str("").unwrap();
        assert!(config.controllers.is_empty());
        assert!(config.padding.enabled);
        assert_eq!(config.padding.rules, default_rules());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[controllers.articles]
layout = "application"
progressive = true
except = ["feed"]

[layouts.print]
progressive = false

[padding]
enabled = true

[[padding.rules]]
family = "msie"
pattern = "MSIE"
target = 255
"#;
        let config = StreamingConfig::from_toml_str(toml_str).unwrap();
        let articles = &config.controllers["articles"];
        assert_eq!(articles.layout.as_deref(), Some("application"));
        assert!(articles.progressive);
        assert_eq!(articles.except, vec!["feed".to_string()]);
        assert_eq!(config.layouts["print"].progressive, Some(false));
        assert_eq!(config.padding.rules.len(), 1);
    }

    #[test]
    fn test_round_trip_keeps_rules() {
        let config = StreamingConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("Chrome/"));
        let parsed = StreamingConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.padding.rules, config.padding.rules);
    }

    #[test]
    fn test_from_file_missing() {
        let err = StreamingConfig::from_file(Path::new("/nonexistent/trickle.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
