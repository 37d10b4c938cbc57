//! Controllers, actions and request dispatch.
//!
//! An action runs to completion before anything is sent: it assigns
//! values and returns one [`Render`] directive. Only then is the render
//! mode chosen, the transfer mode fixed on the emitter, the streaming hook
//! run (progressive responses only), and the body produced.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{LayoutSettings, StreamingConfig};
use crate::context::{Finished, RenderContext};
use crate::emitter::{ResponseEmitter, ResponseSummary};
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameKind;
use crate::mode::{ModeSelector, RenderMode, StreamingPolicy};
use crate::padding::PaddingTable;
use crate::render::{Render, RenderBody};
use crate::request::RequestInfo;
use crate::template::{Locals, RenderEnv, SourceTemplate, Template, TemplateRegistry, View};
use crate::transport::Transport;

pub type ActionFn = Arc<dyn Fn(&mut ActionContext<'_>) -> anyhow::Result<Render> + Send + Sync>;
pub type StreamingHook = Arc<dyn Fn(&mut ActionContext<'_>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Controller {
    name: String,
    policy: StreamingPolicy,
    actions: HashMap<String, ActionFn>,
    hook: Option<StreamingHook>,
    implicit: bool,
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: StreamingPolicy::default(),
            actions: HashMap::new(),
            hook: None,
            implicit: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &StreamingPolicy {
        &self.policy
    }

    pub fn with_policy(mut self, policy: StreamingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declare the controller layout and whether it renders progressively.
    pub fn layout(mut self, layout: impl Into<String>, progressive: bool) -> Self {
        self.policy.layout = Some(layout.into());
        self.policy.progressive = progressive;
        self
    }

    /// No controller layout; `progressive` still applies.
    pub fn without_layout(mut self, progressive: bool) -> Self {
        self.policy.layout = None;
        self.policy.progressive = progressive;
        self
    }

    /// Always render `action` buffered.
    pub fn except(mut self, action: impl Into<String>) -> Self {
        self.policy.except.push(action.into());
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> anyhow::Result<Render> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Run `f` after the action and before the first template of every
    /// progressive response.
    pub fn when_streaming_template<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(f));
        self
    }

    /// Serve `controller/<action>` templates that have no action function.
    pub fn implicit_render(mut self, enabled: bool) -> Self {
        self.implicit = enabled;
        self
    }

    /// Action names with a function, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// What an action sees of the request.
pub struct ActionContext<'a> {
    request: &'a RequestInfo,
    controller: &'a str,
    action: &'a str,
    policy: &'a StreamingPolicy,
    registry: &'a TemplateRegistry,
    assigns: Locals,
}

impl<'a> ActionContext<'a> {
    pub fn request(&self) -> &RequestInfo {
        self.request
    }

    pub fn controller(&self) -> &str {
        self.controller
    }

    pub fn action(&self) -> &str {
        self.action
    }

    /// Make `value` visible to templates as `@name`.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.assigns.insert(name.into(), value.into());
    }

    pub fn assigns(&self) -> &Locals {
        &self.assigns
    }

    /// Render a directive into a string without touching the response.
    pub fn render_to_string(&self, render: &Render) -> RenderResult<String> {
        if let Some(raw) = render.body.raw_body()? {
            return Ok(String::from_utf8_lossy(&raw).into_owned());
        }
        let env = RenderEnv {
            registry: self.registry,
            controller: self.controller,
            assigns: &self.assigns,
        };
        let layout = self.policy.resolve_layout(&render.body);
        let mut ctx = RenderContext::isolated(RenderMode::Buffered);
        {
            let mut view = View::root(&mut ctx, &env);
            render_body(&mut view, &render.body, layout.as_deref(), self.action)?;
        }
        Ok(ctx.finish()?.into_captured().unwrap_or_default())
    }
}

/// Render a directive's body, wrapped in `layout` if one is given.
fn render_body(
    view: &mut View<'_>,
    body: &RenderBody,
    layout: Option<&str>,
    action: &str,
) -> RenderResult<()> {
    let registry = view.registry();
    let controller = view.controller();
    let (kind, template): (FrameKind, Arc<dyn Template>) = match body {
        RenderBody::Action { name, .. } => (
            FrameKind::View,
            registry.action(controller, name.as_deref().unwrap_or(action))?,
        ),
        RenderBody::Partial { name, .. } => (FrameKind::Partial, registry.partial(controller, name)?),
        RenderBody::Inline { source, .. } => (
            FrameKind::View,
            Arc::new(SourceTemplate::parse(&format!("{controller}/{action} (inline)"), source)?)
                as Arc<dyn Template>,
        ),
        RenderBody::Block { template, .. } => (FrameKind::Block, Arc::clone(template)),
        _ => {
            let Some(raw) = body.raw_body()? else {
                return Ok(());
            };
            return view.in_frame(FrameKind::View, Locals::new(), &|v| {
                v.write(&String::from_utf8_lossy(&raw))
            });
        }
    };

    let Some(layout) = layout else {
        return view.render_template(kind, template.as_ref(), Locals::new(), None);
    };
    let layout = registry.layout(layout)?;
    view.render_layout(layout.as_ref(), &|v| {
        v.render_template(kind, template.as_ref(), Locals::new(), None)
    })
}

/// Controllers, templates and padding rules for one application.
pub struct App {
    registry: TemplateRegistry,
    controllers: HashMap<String, Controller>,
    layouts: HashMap<String, LayoutSettings>,
    padding: PaddingTable,
}

impl App {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self {
            registry,
            controllers: HashMap::new(),
            layouts: HashMap::new(),
            padding: PaddingTable::builtin(),
        }
    }

    /// An app serving the templates declared in `config` by implicit render.
    pub fn from_config(registry: TemplateRegistry, config: &StreamingConfig) -> anyhow::Result<Self> {
        Self::new(registry).configure(config)
    }

    pub fn mount(mut self, controller: Controller) -> Self {
        self.controllers.insert(controller.name.clone(), controller);
        self
    }

    /// Apply streaming settings. Configured policies replace those of
    /// mounted controllers; unknown controller names are mounted with
    /// implicit render only.
    pub fn configure(mut self, config: &StreamingConfig) -> anyhow::Result<Self> {
        for (name, policy) in &config.controllers {
            match self.controllers.get_mut(name) {
                Some(controller) => controller.policy = policy.clone(),
                None => {
                    let controller = Controller::new(name.clone()).with_policy(policy.clone());
                    self.controllers.insert(name.clone(), controller);
                }
            }
        }
        self.layouts
            .extend(config.layouts.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.padding = PaddingTable::from_config(&config.padding)?;
        Ok(self)
    }

    pub fn with_padding(mut self, padding: PaddingTable) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_layout_settings(mut self, layout: impl Into<String>, settings: LayoutSettings) -> Self {
        self.layouts.insert(layout.into(), settings);
        self
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }

    /// Every routable `(controller, action)`, sorted.
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut routes: Vec<(String, String)> = Vec::new();
        for controller in self.controllers.values() {
            for action in controller.actions.keys() {
                routes.push((controller.name.clone(), action.clone()));
            }
            if controller.implicit {
                let prefix = format!("{}/", controller.name);
                for name in self.registry.names() {
                    let Some(action) = name.strip_prefix(&prefix) else {
                        continue;
                    };
                    if !action.contains('/') && !action.starts_with('_') {
                        routes.push((controller.name.clone(), action.to_string()));
                    }
                }
            }
        }
        routes.sort();
        routes.dedup();
        routes
    }

    /// Run `controller#action` and write its response to `transport`.
    pub fn dispatch(
        &self,
        request: &RequestInfo,
        controller: &str,
        action: &str,
        transport: Box<dyn Transport>,
    ) -> RenderResult<ResponseSummary> {
        let result = self.run(request, controller, action, transport);
        match &result {
            Ok(summary) => info!(
                controller,
                action,
                status = summary.status,
                mode = ?summary.mode,
                chunks = summary.chunks,
                bytes = summary.bytes,
                "response complete"
            ),
            Err(err) => warn!(controller, action, error = %err, "dispatch failed"),
        }
        result
    }

    fn run(
        &self,
        request: &RequestInfo,
        controller_name: &str,
        action: &str,
        transport: Box<dyn Transport>,
    ) -> RenderResult<ResponseSummary> {
        let not_found = || RenderError::RouteNotFound {
            controller: controller_name.to_string(),
            action: action.to_string(),
        };
        let controller = self.controllers.get(controller_name).ok_or_else(not_found)?;
        let action_fn = controller.actions.get(action);
        let implicit = controller.implicit
            && !action.starts_with('_')
            && self.registry.contains(&format!("{controller_name}/{action}"));
        if action_fn.is_none() && !implicit {
            return Err(not_found());
        }

        let mut cx = ActionContext {
            request,
            controller: controller_name,
            action,
            policy: &controller.policy,
            registry: &self.registry,
            assigns: Locals::new(),
        };
        let render = match action_fn {
            Some(f) => f(&mut cx).map_err(RenderError::Action)?,
            None => Render::action(),
        };

        let selector = ModeSelector::new(&controller.policy, &self.layouts);
        let mode = selector.select(action, &render);
        debug!(controller = controller_name, action, body = ?render.body, ?mode, "render selected");

        let mut emitter = ResponseEmitter::new(transport);
        {
            let head = emitter.head_mut()?;
            head.status = render.status();
            head.set_content_type(render.content_type())?;
        }
        emitter.begin(mode.transfer_mode())?;

        if let Some(raw) = render.body.raw_body()? {
            emitter.write_chunk(raw)?;
            return emitter.finish();
        }

        if mode.is_progressive() {
            if let Some(hook) = &controller.hook {
                hook(&mut cx).map_err(RenderError::Hook)?;
            }
        }

        let layout = selector.resolve_layout(&render.body);
        let padding = self.padding.target_for(request.user_agent());
        let assigns = cx.assigns;
        let env = RenderEnv {
            registry: &self.registry,
            controller: controller_name,
            assigns: &assigns,
        };
        let mut ctx = RenderContext::live(mode, emitter, padding);
        {
            let mut view = View::root(&mut ctx, &env);
            render_body(&mut view, &render.body, layout.as_deref(), action)?;
        }
        match ctx.finish()? {
            Finished::Live(emitter) => emitter.finish(),
            Finished::Captured(_) => Err(RenderError::NotBegun),
        }
    }
}
