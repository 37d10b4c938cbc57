//! ERB-style source templates.
//!
//! Only the handful of constructs streaming pages need are understood:
//!
//! | Tag | Meaning |
//! |---|---|
//! | `<%= yield %>` | the content this layout wraps |
//! | `<%= name %>`, `<%= @name %>` | a local or an assign |
//! | `<%= 'text' %>` | a literal |
//! | `<%= render partial: 'p' [, layout: 'l'] %>` | a partial |
//! | `<% render partial: 'p' %>` | renders the partial, output dropped |
//! | `<%= render_to_string partial: 'p' %>` | a captured partial |
//! | `<% flush %>` | emit everything rendered so far |
//! | `<% push 'data' %>` | emit `data` as its own chunk |
//! | `<% name = expr %>` | set a local |
//! | `<% render layout: 'l' do %>…<% end %>` | wrap a block in a layout |
//! | `<%# … %>` | comment |
//!
//! `-%>` drops the newline right after the tag. Hash-rocket arguments
//! (`:partial => 'p'`) and parenthesised argument lists are accepted.

use super::{Locals, Template, View};
use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Yield,
    Local(String),
    Literal(String),
    Render {
        partial: String,
        layout: Option<String>,
    },
    RenderToString {
        partial: String,
        layout: Option<String>,
    },
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Local(String),
    Literal(String),
    RenderToString {
        partial: String,
        layout: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Expr),
    Exec(Expr),
    Flush,
    Push(String),
    Assign { name: String, value: Value },
    Block { layout: String, body: Vec<Node> },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct SourceTemplate {
    name: String,
    nodes: Vec<Node>,
}

impl SourceTemplate {
    pub fn parse(name: &str, source: &str) -> RenderResult<Self> {
        let nodes = Parser::new(source)
            .parse()
            .map_err(|(offset, message)| RenderError::Parse {
                name: name.to_string(),
                offset,
                message,
            })?;
        Ok(Self {
            name: name.to_string(),
            nodes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Template for SourceTemplate {
    fn render(&self, view: &mut View<'_>) -> RenderResult<()> {
        eval(&self.nodes, view)
    }
}

// ── Evaluation ──────────────────────────────────────────────────

fn eval(nodes: &[Node], view: &mut View<'_>) -> RenderResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => view.write(text)?,
            Node::Output(expr) => output(expr, view)?,
            Node::Exec(expr) => exec(expr, view)?,
            Node::Flush => view.flush()?,
            Node::Push(data) => view.push(data)?,
            Node::Assign { name, value } => {
                let value = evaluate(value, view)?;
                view.set_local(name.clone(), value);
            }
            Node::Block { layout, body } => view.render_block(layout, &|v| eval(body, v))?,
        }
    }
    Ok(())
}

fn output(expr: &Expr, view: &mut View<'_>) -> RenderResult<()> {
    match expr {
        Expr::Yield => view.yield_content(),
        Expr::Local(name) => {
            let value = view.local(name)?.to_string();
            view.write(&value)
        }
        Expr::Literal(text) => view.write(text),
        Expr::Render { partial, layout } => {
            view.render_partial(partial, layout.as_deref(), Locals::new())
        }
        Expr::RenderToString { partial, layout } => {
            let captured = view.render_to_string(partial, layout.as_deref())?;
            view.write(&captured)
        }
    }
}

/// `<% expr %>`: evaluated and dropped. A render runs in isolation so its
/// flushes never reach the response; `yield` still writes.
fn exec(expr: &Expr, view: &mut View<'_>) -> RenderResult<()> {
    match expr {
        Expr::Yield => view.yield_content(),
        Expr::Local(name) => view.local(name).map(drop),
        Expr::Literal(_) => Ok(()),
        Expr::Render { partial, layout } | Expr::RenderToString { partial, layout } => view
            .render_to_string(partial, layout.as_deref())
            .map(drop),
    }
}

fn evaluate(value: &Value, view: &mut View<'_>) -> RenderResult<String> {
    match value {
        Value::Local(name) => view.local(name).map(str::to_string),
        Value::Literal(text) => Ok(text.clone()),
        Value::RenderToString { partial, layout } => {
            view.render_to_string(partial, layout.as_deref())
        }
    }
}

// ── Parsing ─────────────────────────────────────────────────────

type ParseError = (usize, String);

enum Tag {
    Output,
    Code,
    Comment,
}

enum Statement {
    Node(Node),
    Open(String),
    End,
}

struct OpenBlock {
    layout: String,
    offset: usize,
    parent: Vec<Node>,
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
    trim_next: bool,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            pos: 0,
            trim_next: false,
        }
    }

    fn parse(mut self) -> Result<Vec<Node>, ParseError> {
        let src = self.src;
        let mut open: Vec<OpenBlock> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();

        while self.pos < src.len() {
            let rest = &src[self.pos..];
            let Some(start) = rest.find("<%") else {
                self.text(&mut nodes, rest);
                break;
            };
            self.text(&mut nodes, &rest[..start]);

            let offset = self.pos + start;
            let body_start = offset + 2;
            let len = src[body_start..]
                .find("%>")
                .ok_or((offset, "unterminated tag".to_string()))?;
            let mut inner = &src[body_start..body_start + len];
            self.pos = body_start + len + 2;

            if let Some(trimmed) = inner.strip_suffix('-') {
                inner = trimmed;
                self.trim_next = true;
            }
            let (tag, code) = if let Some(code) = inner.strip_prefix('=') {
                (Tag::Output, code)
            } else if let Some(code) = inner.strip_prefix('#') {
                (Tag::Comment, code)
            } else {
                (Tag::Code, inner)
            };
            let code = code.trim();
            let fail = |message: String| (offset, message);

            match tag {
                Tag::Comment => {}
                Tag::Output => {
                    let tokens = tokenize(code).map_err(fail)?;
                    nodes.push(Node::Output(expression(&tokens).map_err(fail)?));
                }
                Tag::Code => {
                    let tokens = tokenize(code).map_err(fail)?;
                    match statement(&tokens).map_err(fail)? {
                        Statement::Node(node) => nodes.push(node),
                        Statement::Open(layout) => open.push(OpenBlock {
                            layout,
                            offset,
                            parent: std::mem::take(&mut nodes),
                        }),
                        Statement::End => {
                            let block = open
                                .pop()
                                .ok_or((offset, "`end` without an open block".to_string()))?;
                            let body = std::mem::replace(&mut nodes, block.parent);
                            nodes.push(Node::Block {
                                layout: block.layout,
                                body,
                            });
                        }
                    }
                }
            }
        }

        match open.last() {
            Some(block) => Err((block.offset, "block is never closed".to_string())),
            None => Ok(nodes),
        }
    }

    fn text(&mut self, nodes: &mut Vec<Node>, mut text: &str) {
        if std::mem::take(&mut self.trim_next) {
            text = text
                .strip_prefix("\r\n")
                .or_else(|| text.strip_prefix('\n'))
                .unwrap_or(text);
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    /// `:name`
    Symbol(String),
    /// `name:`
    Key(String),
    Arrow,
    Assign,
    Comma,
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '?' || c == '!'
}

fn tokenize(code: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err("unterminated string".to_string());
                    };
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            i += 1;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            continue;
                        }
                    }
                    value.push(ch);
                }
                tokens.push(Token::Str(value));
            }
            ':' => {
                i += 1;
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                if start == i {
                    return Err("expected a symbol name after `:`".to_string());
                }
                tokens.push(Token::Symbol(chars[start..i].iter().collect()));
            }
            c if c == '@' || c == '_' || c.is_alphabetic() => {
                let start = i;
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    i += 1;
                    tokens.push(Token::Key(ident));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }
    Ok(tokens)
}

fn statement(tokens: &[Token]) -> Result<Statement, String> {
    match tokens {
        [] => Err("empty tag".to_string()),
        [Token::Ident(word)] if word == "end" => Ok(Statement::End),
        [Token::Ident(word)] if word == "flush" => Ok(Statement::Node(Node::Flush)),
        [Token::Ident(word), Token::LParen, Token::RParen] if word == "flush" => {
            Ok(Statement::Node(Node::Flush))
        }
        [Token::Ident(word), rest @ ..] if word == "push" => match unwrap_parens(rest) {
            [Token::Str(data)] => Ok(Statement::Node(Node::Push(data.clone()))),
            _ => Err("push takes one string".to_string()),
        },
        [Token::Ident(word), rest @ .., Token::Ident(last)] if word == "render" && last == "do" => {
            let args = arguments(unwrap_parens(rest))?;
            match args {
                RenderArgs {
                    partial: None,
                    layout: Some(layout),
                } => Ok(Statement::Open(layout)),
                _ => Err("a render block takes only a layout".to_string()),
            }
        }
        [Token::Ident(name), Token::Assign, rest @ ..] => {
            if name.starts_with('@') {
                return Err(format!("cannot assign to {name}"));
            }
            let value = match expression(rest)? {
                Expr::Local(local) => Value::Local(local),
                Expr::Literal(text) => Value::Literal(text),
                Expr::RenderToString { partial, layout } => Value::RenderToString { partial, layout },
                Expr::Yield | Expr::Render { .. } => {
                    return Err("only locals, strings and render_to_string can be assigned".to_string());
                }
            };
            Ok(Statement::Node(Node::Assign {
                name: name.clone(),
                value,
            }))
        }
        _ => expression(tokens).map(|expr| Statement::Node(Node::Exec(expr))),
    }
}

fn expression(tokens: &[Token]) -> Result<Expr, String> {
    match tokens {
        [Token::Ident(word)] if word == "yield" => Ok(Expr::Yield),
        [Token::Str(text)] => Ok(Expr::Literal(text.clone())),
        [Token::Ident(word), rest @ ..] if word == "render" || word == "render_to_string" => {
            let args = arguments(unwrap_parens(rest))?;
            let partial = args
                .partial
                .ok_or_else(|| format!("{word} needs a partial"))?;
            let layout = args.layout;
            Ok(if word == "render" {
                Expr::Render { partial, layout }
            } else {
                Expr::RenderToString { partial, layout }
            })
        }
        [Token::Ident(name)] if !is_keyword(name) => Ok(Expr::Local(name.clone())),
        _ => Err("unsupported expression".to_string()),
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "yield" | "render" | "render_to_string" | "flush" | "push" | "do" | "end"
    )
}

fn unwrap_parens(tokens: &[Token]) -> &[Token] {
    match tokens {
        [Token::LParen, inner @ .., Token::RParen] => inner,
        _ => tokens,
    }
}

#[derive(Default)]
struct RenderArgs {
    partial: Option<String>,
    layout: Option<String>,
}

/// `'p'`, `partial: 'p', layout: 'l'` or `:partial => 'p', :layout => 'l'`.
fn arguments(tokens: &[Token]) -> Result<RenderArgs, String> {
    let mut args = RenderArgs::default();
    let mut rest = tokens;

    if let [Token::Str(name), tail @ ..] = rest {
        args.partial = Some(name.clone());
        rest = tail;
        if let [Token::Comma, tail @ ..] = rest {
            rest = tail;
        }
    }

    while !rest.is_empty() {
        let (key, value, tail) = match rest {
            [Token::Key(key), Token::Str(value), tail @ ..] => (key, value, tail),
            [Token::Symbol(key), Token::Arrow, Token::Str(value), tail @ ..] => (key, value, tail),
            _ => return Err("expected `key: 'value'` arguments".to_string()),
        };
        match key.as_str() {
            "partial" => args.partial = Some(value.clone()),
            "layout" => args.layout = Some(value.clone()),
            other => return Err(format!("unknown render option `{other}`")),
        }
        rest = match tail {
            [Token::Comma, tail @ ..] => tail,
            [] => tail,
            _ => return Err("expected `,` between arguments".to_string()),
        };
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderContext;
    use crate::mode::RenderMode;
    use crate::template::{RenderEnv, TemplateRegistry};
    use crate::frame::FrameKind;

    fn nodes(src: &str) -> Vec<Node> {
        SourceTemplate::parse("t", src).unwrap().nodes
    }

    fn render(registry: &TemplateRegistry, name: &str) -> String {
        let assigns = Locals::from([("title".to_string(), "Home".to_string())]);
        let env = RenderEnv {
            registry,
            controller: "pages",
            assigns: &assigns,
        };
        let mut ctx = RenderContext::isolated(RenderMode::Progressive);
        {
            let mut view = View::root(&mut ctx, &env);
            let template = registry.get(name).unwrap();
            view.render_template(FrameKind::View, template.as_ref(), Locals::new(), None)
                .unwrap();
        }
        ctx.finish().unwrap().into_captured().unwrap()
    }

    #[test]
    fn parses_directives() {
        assert_eq!(
            nodes("a<% flush %>b<%= yield %>"),
            vec![
                Node::Text("a".into()),
                Node::Flush,
                Node::Text("b".into()),
                Node::Output(Expr::Yield),
            ]
        );
        assert_eq!(nodes("<% push('<i>') %>"), vec![Node::Push("<i>".into())]);
        assert_eq!(nodes("<%# note %>x"), vec![Node::Text("x".into())]);
    }

    #[test]
    fn render_argument_forms_agree() {
        let expected = vec![Node::Output(Expr::Render {
            partial: "p".into(),
            layout: Some("l".into()),
        })];
        assert_eq!(nodes("<%= render partial: 'p', layout: 'l' %>"), expected);
        assert_eq!(nodes("<%= render :partial => 'p', :layout => 'l' %>"), expected);
        assert_eq!(nodes("<%= render(:partial => \"p\", :layout => \"l\") %>"), expected);
        assert_eq!(nodes("<%= render 'p', layout: 'l' %>"), expected);
    }

    #[test]
    fn parsed_template_keeps_its_name() {
        let template = SourceTemplate::parse("posts/index", "x").unwrap();
        assert_eq!(template.name(), "posts/index");
    }

    #[test]
    fn trim_marker_eats_one_newline() {
        assert_eq!(
            nodes("<% flush -%>\n\nx"),
            vec![Node::Flush, Node::Text("\nx".into())]
        );
    }

    #[test]
    fn blocks_nest() {
        let parsed = nodes("<% render layout: 'box' do %>in<% end %>out");
        assert_eq!(
            parsed,
            vec![
                Node::Block {
                    layout: "box".into(),
                    body: vec![Node::Text("in".into())],
                },
                Node::Text("out".into()),
            ]
        );
    }

    #[test]
    fn parse_errors_carry_offsets() {
        let cases = [
            ("ab<% flush", 2),
            ("<% end %>", 0),
            ("x<% render layout: 'l' do %>", 1),
            ("<%= 1 + 2 %>", 0),
            ("<%= render layout: 'l' %>", 0),
            ("<% @x = 'y' %>", 0),
        ];
        for (src, expected) in cases {
            match SourceTemplate::parse("t", src) {
                Err(RenderError::Parse { offset, .. }) => assert_eq!(offset, expected, "{src}"),
                other => panic!("{src}: expected parse error, got {other:?}"),
            }
        }
    }

    #[test]
    fn evaluates_locals_and_assigns() {
        let mut registry = TemplateRegistry::new();
        registry
            .insert_source("pages/show", "<%= @title %>:<% who = 'x' %><%= who %>")
            .unwrap();
        assert_eq!(render(&registry, "pages/show"), "Home:x");
    }

    #[test]
    fn partials_do_not_see_caller_locals() {
        let mut registry = TemplateRegistry::new();
        registry
            .insert_source("pages/_greeting", "hello <%= who %>")
            .unwrap();
        registry
            .insert_source("pages/show", "<% who = 'x' %><%= render partial: 'greeting' %>")
            .unwrap();
        let assigns = Locals::new();
        let env = RenderEnv {
            registry: &registry,
            controller: "pages",
            assigns: &assigns,
        };
        let mut ctx = RenderContext::isolated(RenderMode::Buffered);
        let mut view = View::root(&mut ctx, &env);
        let show = registry.get("pages/show").unwrap();
        let err = view
            .render_template(FrameKind::View, show.as_ref(), Locals::new(), None)
            .unwrap_err();
        assert!(matches!(err, RenderError::UndefinedLocal(name) if name == "who"));
    }

    #[test]
    fn render_without_output_tag_writes_nothing() {
        let mut registry = TemplateRegistry::new();
        registry.insert_source("pages/_row", "row<% flush %>").unwrap();
        registry
            .insert_source("pages/index", "a<% render partial: 'row' %>b")
            .unwrap();
        assert_eq!(render(&registry, "pages/index"), "ab");
    }

    #[test]
    fn block_layout_and_render_to_string() {
        let mut registry = TemplateRegistry::new();
        registry.insert_source("pages/_box", "[<%= yield %>]").unwrap();
        registry.insert_source("pages/_item", "<%= item %>").unwrap();
        registry
            .insert_source(
                "pages/index",
                "<%= @title %> <% item = 'a' %><% render layout: 'box' do %><%= item %><% end %> \
                 <% s = render_to_string partial: 'title_box' %><%= s %>",
            )
            .unwrap();
        registry
            .insert_source("pages/_title_box", "<% render layout: 'box' do %><%= @title %><% end %>")
            .unwrap();
        assert_eq!(render(&registry, "pages/index"), "Home [a] [Home]");
    }
}
