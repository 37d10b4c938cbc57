//! Loading an [`App`] from a template directory and an optional config.

use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;
use trickle_core::{App, StreamingConfig, TemplateRegistry};

pub fn load_config(path: Option<&Path>) -> anyhow::Result<StreamingConfig> {
    match path {
        Some(path) => StreamingConfig::from_file(path),
        None => Ok(StreamingConfig::default()),
    }
}

pub fn load_app(templates: &Path, config: Option<&Path>) -> anyhow::Result<App> {
    let registry = TemplateRegistry::load_dir(templates)
        .with_context(|| format!("failed to load templates from {}", templates.display()))?;
    info!(dir = %templates.display(), templates = registry.len(), "templates loaded");
    let config = load_config(config)?;
    App::from_config(registry, &config)
}

/// Split `controller/action`; a bare controller means its `index` action.
pub fn parse_target(target: &str) -> anyhow::Result<(String, String)> {
    let target = target.trim_matches('/');
    let (controller, action) = target.split_once('/').unwrap_or((target, "index"));
    if controller.is_empty() || action.is_empty() || action.contains('/') {
        bail!("invalid target {target:?}, expected controller/action");
    }
    Ok((controller.to_string(), action.to_string()))
}
