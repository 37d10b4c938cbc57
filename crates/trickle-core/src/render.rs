//! The render directive an action returns.
//!
//! Exactly one directive per action: the type makes a second `render`
//! call unrepresentable. The directive is matched once by the mode
//! selector and once by the body-producing step.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;

use crate::error::RenderResult;
use crate::template::{Template, View};

pub const HTML: &str = "text/html; charset=utf-8";
pub const XML: &str = "application/xml; charset=utf-8";
pub const JSON: &str = "application/json; charset=utf-8";
pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";

/// Which layout wraps a templated body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LayoutChoice {
    /// The controller's layout for action templates, none otherwise.
    #[default]
    Default,
    None,
    Named(String),
}

/// What the response body is produced from.
#[derive(Clone)]
pub enum RenderBody {
    /// The `controller/<name>` template; `None` means the current action.
    Action {
        name: Option<String>,
        layout: LayoutChoice,
    },
    Partial {
        name: String,
        layout: LayoutChoice,
    },
    Inline {
        source: String,
        layout: LayoutChoice,
    },
    /// A template supplied in code by the action.
    Block {
        template: Arc<dyn Template>,
        layout: LayoutChoice,
    },
    Text(String),
    Json(Value),
    Xml(Value),
    Script(String),
    Nothing,
    Custom {
        body: Bytes,
        content_type: String,
    },
}

impl fmt::Debug for RenderBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderBody::Action { name, layout } => f
                .debug_struct("Action")
                .field("name", name)
                .field("layout", layout)
                .finish(),
            RenderBody::Partial { name, layout } => f
                .debug_struct("Partial")
                .field("name", name)
                .field("layout", layout)
                .finish(),
            RenderBody::Inline { layout, .. } => {
                f.debug_struct("Inline").field("layout", layout).finish()
            }
            RenderBody::Block { layout, .. } => {
                f.debug_struct("Block").field("layout", layout).finish()
            }
            RenderBody::Text(_) => f.write_str("Text"),
            RenderBody::Json(_) => f.write_str("Json"),
            RenderBody::Xml(_) => f.write_str("Xml"),
            RenderBody::Script(_) => f.write_str("Script"),
            RenderBody::Nothing => f.write_str("Nothing"),
            RenderBody::Custom { content_type, .. } => f
                .debug_struct("Custom")
                .field("content_type", content_type)
                .finish(),
        }
    }
}

impl RenderBody {
    /// Bodies that go through templates (and so may stream).
    pub fn is_templated(&self) -> bool {
        matches!(
            self,
            RenderBody::Action { .. }
                | RenderBody::Partial { .. }
                | RenderBody::Inline { .. }
                | RenderBody::Block { .. }
        )
    }

    pub fn layout(&self) -> Option<&LayoutChoice> {
        match self {
            RenderBody::Action { layout, .. }
            | RenderBody::Partial { layout, .. }
            | RenderBody::Inline { layout, .. }
            | RenderBody::Block { layout, .. } => Some(layout),
            _ => None,
        }
    }

    fn layout_mut(&mut self) -> Option<&mut LayoutChoice> {
        match self {
            RenderBody::Action { layout, .. }
            | RenderBody::Partial { layout, .. }
            | RenderBody::Inline { layout, .. }
            | RenderBody::Block { layout, .. } => Some(layout),
            _ => None,
        }
    }

    pub fn default_content_type(&self) -> &str {
        match self {
            RenderBody::Action { .. }
            | RenderBody::Partial { .. }
            | RenderBody::Inline { .. }
            | RenderBody::Block { .. }
            | RenderBody::Text(_)
            | RenderBody::Nothing => HTML,
            RenderBody::Json(_) => JSON,
            RenderBody::Xml(_) => XML,
            RenderBody::Script(_) => JAVASCRIPT,
            RenderBody::Custom { content_type, .. } => content_type,
        }
    }

    /// The complete body of a raw directive; `None` for templated ones.
    pub fn raw_body(&self) -> RenderResult<Option<Bytes>> {
        let body = match self {
            RenderBody::Action { .. }
            | RenderBody::Partial { .. }
            | RenderBody::Inline { .. }
            | RenderBody::Block { .. } => return Ok(None),
            RenderBody::Text(text) | RenderBody::Script(text) => Bytes::from(text.clone()),
            RenderBody::Json(value) => Bytes::from(serde_json::to_vec(value)?),
            RenderBody::Xml(value) => Bytes::from(to_xml(value)),
            // A single space keeps clients that mishandle empty bodies happy.
            RenderBody::Nothing => Bytes::from_static(b" "),
            RenderBody::Custom { body, .. } => body.clone(),
        };
        Ok(Some(body))
    }
}

/// A render directive plus its response overrides.
#[derive(Debug, Clone)]
pub struct Render {
    pub body: RenderBody,
    pub status: Option<StatusCode>,
    pub content_type: Option<String>,
}

impl Render {
    fn new(body: RenderBody) -> Self {
        Self {
            body,
            status: None,
            content_type: None,
        }
    }

    /// The current action's own template.
    pub fn action() -> Self {
        Self::new(RenderBody::Action {
            name: None,
            layout: LayoutChoice::Default,
        })
    }

    /// Another action template of the same controller.
    pub fn template(name: impl Into<String>) -> Self {
        Self::new(RenderBody::Action {
            name: Some(name.into()),
            layout: LayoutChoice::Default,
        })
    }

    pub fn partial(name: impl Into<String>) -> Self {
        Self::new(RenderBody::Partial {
            name: name.into(),
            layout: LayoutChoice::Default,
        })
    }

    pub fn inline(source: impl Into<String>) -> Self {
        Self::new(RenderBody::Inline {
            source: source.into(),
            layout: LayoutChoice::Default,
        })
    }

    pub fn block(template: impl Template + 'static) -> Self {
        Self::new(RenderBody::Block {
            template: Arc::new(template),
            layout: LayoutChoice::Default,
        })
    }

    /// Like [`Render::block`], for a closure.
    pub fn block_fn<F>(f: F) -> Self
    where
        F: Fn(&mut View<'_>) -> RenderResult<()> + Send + Sync + 'static,
    {
        Self::block(f)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(RenderBody::Text(text.into()))
    }

    pub fn json(value: Value) -> Self {
        Self::new(RenderBody::Json(value))
    }

    pub fn xml(value: Value) -> Self {
        Self::new(RenderBody::Xml(value))
    }

    pub fn script(source: impl Into<String>) -> Self {
        Self::new(RenderBody::Script(source.into()))
    }

    pub fn nothing() -> Self {
        Self::new(RenderBody::Nothing)
    }

    pub fn custom(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::new(RenderBody::Custom {
            body: body.into(),
            content_type: content_type.into(),
        })
    }

    /// Wrap a templated body in the named layout. Ignored for raw bodies.
    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        if let Some(choice) = self.body.layout_mut() {
            *choice = LayoutChoice::Named(layout.into());
        }
        self
    }

    pub fn without_layout(mut self) -> Self {
        if let Some(choice) = self.body.layout_mut() {
            *choice = LayoutChoice::None;
        }
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or_else(|| self.body.default_content_type())
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }
}

// ── XML ─────────────────────────────────────────────────────────

/// Serialise a JSON value as an XML document rooted at `<hash>`, keys
/// dasherised.
pub fn to_xml(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_element(&mut out, "hash", value, 0);
    out
}

fn write_element(out: &mut String, name: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            out.push_str(&format!("{indent}<{name}>\n"));
            for (key, child) in map {
                write_element(out, &key.replace('_', "-"), child, depth + 1);
            }
            out.push_str(&format!("{indent}</{name}>\n"));
        }
        Value::Array(items) => {
            out.push_str(&format!("{indent}<{name} type=\"array\">\n"));
            for item in items {
                write_element(out, singular(name), item, depth + 1);
            }
            out.push_str(&format!("{indent}</{name}>\n"));
        }
        Value::Null => out.push_str(&format!("{indent}<{name} nil=\"true\"/>\n")),
        Value::Bool(b) => {
            out.push_str(&format!("{indent}<{name} type=\"boolean\">{b}</{name}>\n"))
        }
        Value::Number(n) => {
            let kind = if n.is_f64() { "float" } else { "integer" };
            out.push_str(&format!("{indent}<{name} type=\"{kind}\">{n}</{name}>\n"));
        }
        Value::String(s) => out.push_str(&format!("{indent}<{name}>{}</{name}>\n", escape(s))),
    }
}

fn singular(name: &str) -> &str {
    name.strip_suffix('s').filter(|s| !s.is_empty()).unwrap_or(name)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
