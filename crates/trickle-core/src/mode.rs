//! Mode selection: progressive or buffered, decided before any byte.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::LayoutSettings;
use crate::emitter::TransferMode;
use crate::render::{LayoutChoice, Render, RenderBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Buffered,
    Progressive,
}

impl RenderMode {
    pub fn is_progressive(self) -> bool {
        self == RenderMode::Progressive
    }

    pub fn transfer_mode(self) -> TransferMode {
        match self {
            RenderMode::Buffered => TransferMode::ContentLength,
            RenderMode::Progressive => TransferMode::Chunked,
        }
    }
}

/// A controller's layout declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingPolicy {
    /// Layout wrapping action templates.
    #[serde(default)]
    pub layout: Option<String>,
    /// Opt the controller's responses into progressive rendering.
    #[serde(default)]
    pub progressive: bool,
    /// Actions that always render buffered.
    #[serde(default)]
    pub except: Vec<String>,
}

impl StreamingPolicy {
    /// Action templates get the controller layout by default; partial,
    /// inline and block bodies only get one when it is named.
    pub fn resolve_layout(&self, body: &RenderBody) -> Option<String> {
        match body.layout()? {
            LayoutChoice::None => None,
            LayoutChoice::Named(name) => Some(name.clone()),
            LayoutChoice::Default => match body {
                RenderBody::Action { .. } => self.layout.clone(),
                _ => None,
            },
        }
    }
}

/// Resolves the layout and render mode for one action's directive.
pub struct ModeSelector<'a> {
    policy: &'a StreamingPolicy,
    layouts: &'a HashMap<String, LayoutSettings>,
}

impl<'a> ModeSelector<'a> {
    pub fn new(policy: &'a StreamingPolicy, layouts: &'a HashMap<String, LayoutSettings>) -> Self {
        Self { policy, layouts }
    }

    /// The layout that will wrap the body, if any.
    pub fn resolve_layout(&self, body: &RenderBody) -> Option<String> {
        self.policy.resolve_layout(body)
    }

    pub fn select(&self, action: &str, render: &Render) -> RenderMode {
        if !render.body.is_templated() {
            return RenderMode::Buffered;
        }
        if self.policy.except.iter().any(|a| a == action) {
            return RenderMode::Buffered;
        }
        let layout_override = self
            .resolve_layout(&render.body)
            .and_then(|name| self.layouts.get(&name))
            .and_then(|settings| settings.progressive);
        let progressive = layout_override.unwrap_or(self.policy.progressive);
        if progressive {
            RenderMode::Progressive
        } else {
            RenderMode::Buffered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progressive_policy() -> StreamingPolicy {
        StreamingPolicy {
            layout: Some("application".into()),
            progressive: true,
            except: vec!["export".into()],
        }
    }

    #[test]
    fn templated_bodies_follow_the_policy() {
        let policy = progressive_policy();
        let layouts = HashMap::new();
        let selector = ModeSelector::new(&policy, &layouts);
        assert_eq!(selector.select("index", &Render::action()), RenderMode::Progressive);
        assert_eq!(
            selector.select("index", &Render::partial("p")),
            RenderMode::Progressive
        );
        assert_eq!(
            selector.select("index", &Render::inline("x").without_layout()),
            RenderMode::Progressive
        );

        let buffered = StreamingPolicy::default();
        let selector = ModeSelector::new(&buffered, &layouts);
        assert_eq!(selector.select("index", &Render::action()), RenderMode::Buffered);
    }

    #[test]
    fn raw_bodies_are_never_progressive() {
        let policy = progressive_policy();
        let layouts = HashMap::new();
        let selector = ModeSelector::new(&policy, &layouts);
        for render in [
            Render::text("t"),
            Render::json(json!({})),
            Render::xml(json!({})),
            Render::script("s"),
            Render::nothing(),
            Render::custom("c", "text/plain"),
        ] {
            assert_eq!(selector.select("index", &render), RenderMode::Buffered);
        }
    }

    #[test]
    fn excepted_actions_are_buffered() {
        let policy = progressive_policy();
        let layouts = HashMap::new();
        let selector = ModeSelector::new(&policy, &layouts);
        assert_eq!(selector.select("export", &Render::action()), RenderMode::Buffered);
    }

    #[test]
    fn layout_settings_override_controller() {
        let policy = progressive_policy();
        let mut layouts = HashMap::new();
        layouts.insert(
            "print".to_string(),
            LayoutSettings {
                progressive: Some(false),
            },
        );
        layouts.insert(
            "live".to_string(),
            LayoutSettings {
                progressive: Some(true),
            },
        );
        let selector = ModeSelector::new(&policy, &layouts);
        assert_eq!(
            selector.select("index", &Render::action().with_layout("print")),
            RenderMode::Buffered
        );

        let buffered = StreamingPolicy::default();
        let selector = ModeSelector::new(&buffered, &layouts);
        assert_eq!(
            selector.select("index", &Render::action().with_layout("live")),
            RenderMode::Progressive
        );
    }

    #[test]
    fn layout_resolution() {
        let policy = progressive_policy();
        let layouts = HashMap::new();
        let selector = ModeSelector::new(&policy, &layouts);
        assert_eq!(
            selector.resolve_layout(&Render::action().body).as_deref(),
            Some("application")
        );
        assert_eq!(selector.resolve_layout(&Render::partial("p").body), None);
        assert_eq!(
            selector
                .resolve_layout(&Render::partial("p").with_layout("x").body)
                .as_deref(),
            Some("x")
        );
        assert_eq!(
            selector.resolve_layout(&Render::action().without_layout().body),
            None
        );
        assert_eq!(selector.resolve_layout(&Render::text("t").body), None);
    }

    #[test]
    fn transfer_modes() {
        assert_eq!(RenderMode::Progressive.transfer_mode(), TransferMode::Chunked);
        assert_eq!(RenderMode::Buffered.transfer_mode(), TransferMode::ContentLength);
    }
}
