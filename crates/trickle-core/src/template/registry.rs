use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;
use walkdir::WalkDir;

use super::{SourceTemplate, Template, View};
use crate::error::{RenderError, RenderResult};

const EXTENSIONS: [&str; 2] = [".html.erb", ".erb"];

/// Templates by name: `controller/action`, `layouts/name`,
/// `controller/_partial`.
#[derive(Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<dyn Template>>,
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, template: impl Template + 'static) {
        self.templates.insert(name.into(), Arc::new(template));
    }

    pub fn insert_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut View<'_>) -> RenderResult<()> + Send + Sync + 'static,
    {
        self.insert(name, f);
    }

    /// Parse `source` and register it under `name`.
    pub fn insert_source(&mut self, name: impl Into<String>, source: &str) -> RenderResult<()> {
        let name = name.into();
        let template = SourceTemplate::parse(&name, source)?;
        self.templates.insert(name, Arc::new(template));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> RenderResult<Arc<dyn Template>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::TemplateNotFound(name.to_string()))
    }

    pub fn action(&self, controller: &str, action: &str) -> RenderResult<Arc<dyn Template>> {
        self.get(&format!("{controller}/{action}"))
    }

    pub fn layout(&self, name: &str) -> RenderResult<Arc<dyn Template>> {
        self.get(&format!("layouts/{name}"))
    }

    pub fn partial(&self, controller: &str, name: &str) -> RenderResult<Arc<dyn Template>> {
        self.get(&partial_path(controller, name))
    }

    /// Load every `.erb` file under `root`, named by its path relative to
    /// `root` without the extension.
    pub fn load_dir(root: &Path) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = template_name(root, path) else {
                continue;
            };
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            registry
                .insert_source(name.clone(), &source)
                .with_context(|| format!("parsing {}", path.display()))?;
            debug!(template = %name, "loaded template");
        }
        Ok(registry)
    }
}

/// `name` → `controller/_name`; `dir/name` → `dir/_name`.
pub fn partial_path(controller: &str, name: &str) -> String {
    match name.rsplit_once('/') {
        Some((dir, base)) => format!("{dir}/_{base}"),
        None => format!("{controller}/_{name}"),
    }
}

fn template_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let relative = relative.to_str()?.replace('\\', "/");
    EXTENSIONS
        .iter()
        .find_map(|ext| relative.strip_suffix(ext))
        .map(str::to_string)
}
