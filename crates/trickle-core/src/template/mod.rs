//! Templates and the view handle they render through.
//!
//! A [`Template`] never sees the frame stack or the network. It gets a
//! [`View`], which can write text, flush, push, yield the wrapped content,
//! render partials and layouts, and capture a sub-render as a string.
//! Every nested render runs in its own frame; the view opens and closes
//! those frames, so a template cannot leave the stack unbalanced.

mod registry;
mod source;

use std::collections::HashMap;

pub use registry::{TemplateRegistry, partial_path};
pub use source::SourceTemplate;

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameKind;
use crate::mode::RenderMode;

/// Named string values visible to a template.
pub type Locals = HashMap<String, String>;

/// A body rendered lazily into the current view.
pub type Body<'b> = &'b (dyn Fn(&mut View<'_>) -> RenderResult<()> + 'b);

pub trait Template: Send + Sync {
    fn render(&self, view: &mut View<'_>) -> RenderResult<()>;
}

impl<F> Template for F
where
    F: Fn(&mut View<'_>) -> RenderResult<()> + Send + Sync,
{
    fn render(&self, view: &mut View<'_>) -> RenderResult<()> {
        self(view)
    }
}

/// Request-wide lookup state shared by every view of one render.
pub struct RenderEnv<'a> {
    pub registry: &'a TemplateRegistry,
    /// Controller used to resolve bare template names.
    pub controller: &'a str,
    /// Values the action assigned, visible as `@name`.
    pub assigns: &'a Locals,
}

/// What `yield` produces inside a layout.
#[derive(Clone, Copy)]
pub enum Content<'a> {
    /// Already rendered text (buffered layouts).
    Rendered(&'a str),
    /// Rendered at the point of the yield (progressive layouts).
    Deferred(Body<'a>),
}

pub struct View<'a> {
    ctx: &'a mut RenderContext,
    env: &'a RenderEnv<'a>,
    locals: Locals,
    content: Option<Content<'a>>,
}

impl<'a> View<'a> {
    /// A view with no frame of its own; the first render opens one.
    pub fn root(ctx: &'a mut RenderContext, env: &'a RenderEnv<'a>) -> Self {
        Self {
            ctx,
            env,
            locals: Locals::new(),
            content: None,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.ctx.mode()
    }

    pub fn is_live(&self) -> bool {
        self.ctx.is_live()
    }

    pub fn registry(&self) -> &'a TemplateRegistry {
        self.env.registry
    }

    pub fn controller(&self) -> &'a str {
        self.env.controller
    }

    pub fn write(&mut self, text: &str) -> RenderResult<()> {
        self.ctx.write(text)
    }

    pub fn flush(&mut self) -> RenderResult<()> {
        self.ctx.flush()
    }

    pub fn push(&mut self, data: &str) -> RenderResult<()> {
        self.ctx.push(data)
    }

    /// Look up a local, falling back to the action's assigns. `@name`
    /// reads the assigns only.
    pub fn local(&self, name: &str) -> RenderResult<&str> {
        let value = match name.strip_prefix('@') {
            Some(assign) => self.env.assigns.get(assign),
            None => self
                .locals
                .get(name)
                .or_else(|| self.env.assigns.get(name)),
        };
        value
            .map(String::as_str)
            .ok_or_else(|| RenderError::UndefinedLocal(name.to_string()))
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.locals.insert(name.into(), value.into());
    }

    /// Emit the content this layout wraps.
    pub fn yield_content(&mut self) -> RenderResult<()> {
        match self.content.ok_or(RenderError::NothingToYield)? {
            Content::Rendered(text) => self.ctx.write(text),
            Content::Deferred(body) => body(self),
        }
    }

    /// Run `f` in a fresh frame of `kind` with its own locals.
    pub fn in_frame(&mut self, kind: FrameKind, locals: Locals, f: Body<'_>) -> RenderResult<()> {
        self.ctx.push_frame(kind);
        let mut child = View {
            ctx: &mut *self.ctx,
            env: self.env,
            locals,
            content: None,
        };
        f(&mut child)?;
        self.ctx.pop_frame()
    }

    /// Render `template` in a fresh frame of `kind`.
    pub fn render_template(
        &mut self,
        kind: FrameKind,
        template: &dyn Template,
        locals: Locals,
        content: Option<Content<'_>>,
    ) -> RenderResult<()> {
        self.ctx.push_frame(kind);
        let mut child = View {
            ctx: &mut *self.ctx,
            env: self.env,
            locals,
            content,
        };
        template.render(&mut child)?;
        self.ctx.pop_frame()
    }

    /// Render `layout` around `body`.
    ///
    /// Progressive renders start with the layout and produce the body at
    /// its yield, so layout text before the yield can flush first. A live
    /// buffered render produces the body up front and hands the layout the
    /// finished text.
    pub fn render_layout(&mut self, layout: &dyn Template, body: Body<'_>) -> RenderResult<()> {
        if self.ctx.mode().is_progressive() || !self.ctx.is_live() {
            return self.render_template(
                FrameKind::Layout,
                layout,
                Locals::new(),
                Some(Content::Deferred(body)),
            );
        }
        self.ctx.push_frame(FrameKind::Capture);
        {
            let mut child = View {
                ctx: &mut *self.ctx,
                env: self.env,
                locals: Locals::new(),
                content: None,
            };
            body(&mut child)?;
        }
        let rendered = self.ctx.detach_frame()?;
        self.render_template(
            FrameKind::Layout,
            layout,
            Locals::new(),
            Some(Content::Rendered(&rendered)),
        )
    }

    /// `render partial: name [, layout: layout]`.
    pub fn render_partial(
        &mut self,
        name: &str,
        layout: Option<&str>,
        locals: Locals,
    ) -> RenderResult<()> {
        let partial = self.env.registry.partial(self.env.controller, name)?;
        let Some(layout) = layout else {
            return self.render_template(FrameKind::Partial, partial.as_ref(), locals, None);
        };
        let layout = self.env.registry.partial(self.env.controller, layout)?;
        self.render_layout(layout.as_ref(), &|v| {
            v.render_template(FrameKind::Partial, partial.as_ref(), locals.clone(), None)
        })
    }

    /// `render layout: name do … end`: the block sees the caller's locals.
    pub fn render_block(&mut self, layout: &str, block: Body<'_>) -> RenderResult<()> {
        let layout = self.env.registry.partial(self.env.controller, layout)?;
        let locals = self.locals.clone();
        self.render_layout(layout.as_ref(), &|v| {
            v.in_frame(FrameKind::Block, locals.clone(), block)
        })
    }

    /// Render a partial into a string. Flushes inside it stay in the
    /// string and pushes are dropped; the response is untouched.
    pub fn render_to_string(&mut self, name: &str, layout: Option<&str>) -> RenderResult<String> {
        let mut ctx = RenderContext::isolated(self.ctx.mode());
        {
            let mut view = View::root(&mut ctx, self.env);
            view.render_partial(name, layout, Locals::new())?;
        }
        Ok(ctx.finish()?.into_captured().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Finished;
    use crate::emitter::ResponseEmitter;
    use crate::transport::Recorder;

    fn registry() -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        registry.insert_fn("layouts/frame", |v| {
            v.write("<")?;
            v.flush()?;
            v.yield_content()?;
            v.write(">")
        });
        registry.insert_fn("pages/_item", |v| {
            let item = v.local("item").unwrap_or("?").to_string();
            v.write(&item)?;
            v.flush()
        });
        registry.insert_fn("pages/_box", |v| {
            v.write("[")?;
            v.yield_content()?;
            v.write("]")
        });
        registry
    }

    fn live(mode: RenderMode) -> (RenderContext, Recorder) {
        let recorder = Recorder::new();
        let mut emitter = ResponseEmitter::new(Box::new(recorder.clone()));
        emitter.begin(mode.transfer_mode()).unwrap();
        (RenderContext::live(mode, emitter, None), recorder)
    }

    fn finish(ctx: RenderContext) {
        match ctx.finish().unwrap() {
            Finished::Live(emitter) => {
                emitter.finish().unwrap();
            }
            Finished::Captured(_) => panic!("expected live context"),
        }
    }

    fn render_page(mode: RenderMode) -> Recorder {
        let registry = registry();
        let assigns = Locals::new();
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let (mut ctx, recorder) = live(mode);
        {
            let mut view = View::root(&mut ctx, &env);
            let layout = registry.layout("frame").unwrap();
            view.render_layout(layout.as_ref(), &|v| {
                let mut locals = Locals::new();
                locals.insert("item".into(), "x".into());
                v.render_partial("item", None, locals)
            })
            .unwrap();
        }
        finish(ctx);
        recorder
    }

    #[test]
    fn progressive_layout_streams_before_body() {
        let recorder = render_page(RenderMode::Progressive);
        assert_eq!(recorder.chunks(), vec!["<", "x", ">"]);
    }

    #[test]
    fn buffered_layout_receives_rendered_body() {
        let recorder = render_page(RenderMode::Buffered);
        assert_eq!(recorder.chunks(), vec!["<x>"]);
    }

    #[test]
    fn locals_and_assigns() {
        let registry = TemplateRegistry::new();
        let mut assigns = Locals::new();
        assigns.insert("user".into(), "ada".into());
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let mut ctx = RenderContext::isolated(RenderMode::Buffered);
        let mut view = View::root(&mut ctx, &env);
        assert_eq!(view.local("user").unwrap(), "ada");
        assert_eq!(view.local("@user").unwrap(), "ada");
        view.set_local("user", "bob");
        assert_eq!(view.local("user").unwrap(), "bob");
        assert_eq!(view.local("@user").unwrap(), "ada");
        assert!(matches!(
            view.local("missing"),
            Err(RenderError::UndefinedLocal(name)) if name == "missing"
        ));
    }

    #[test]
    fn yield_without_content_fails() {
        let mut registry = TemplateRegistry::new();
        registry.insert_fn("layouts/bare", |v| v.yield_content());
        let assigns = Locals::new();
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let mut ctx = RenderContext::isolated(RenderMode::Buffered);
        let mut view = View::root(&mut ctx, &env);
        let layout = registry.layout("bare").unwrap();
        let err = view
            .render_template(FrameKind::View, layout.as_ref(), Locals::new(), None)
            .unwrap_err();
        assert!(matches!(err, RenderError::NothingToYield));
    }

    #[test]
    fn render_to_string_keeps_flushes_in_the_string() {
        let registry = registry();
        let assigns = Locals::new();
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let (mut ctx, recorder) = live(RenderMode::Progressive);
        {
            let mut view = View::root(&mut ctx, &env);
            view.in_frame(FrameKind::View, Locals::new(), &|v| {
                let boxed = v.render_to_string("item", Some("box"))?;
                assert_eq!(boxed, "[?]");
                v.write(&boxed)
            })
            .unwrap();
        }
        finish(ctx);
        assert_eq!(recorder.chunks(), vec!["[?]"]);
    }

    #[test]
    fn block_sees_caller_locals() {
        let registry = registry();
        let assigns = Locals::new();
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let mut ctx = RenderContext::isolated(RenderMode::Progressive);
        {
            let mut view = View::root(&mut ctx, &env);
            view.in_frame(FrameKind::View, Locals::new(), &|v| {
                v.set_local("name", "inner");
                v.render_block("box", &|b| {
                    let name = b.local("name")?.to_string();
                    b.write(&name)
                })
            })
            .unwrap();
        }
        let out = ctx.finish().unwrap().into_captured().unwrap();
        assert_eq!(out, "[inner]");
    }
}
