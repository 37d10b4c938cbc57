//! trickle-core — progressive HTML rendering over chunked HTTP.
//!
//! Lets a handler start transmitting a page before it has finished
//! rendering. Templates nest (layout → view → partial), each nested render
//! owns a [`RenderFrame`] on an explicit [`FrameStack`], and a `flush`
//! from anywhere in the tree emits every byte that is now final, in
//! document order, as one chunk of a chunked response.
//!
//! # Components
//!
//! | Module | Role |
//! |---|---|
//! | [`frame`] | Per-render output buffers and the stack that orders them |
//! | [`context`] | Flush/push controller, render-to-string isolation |
//! | [`emitter`] | Response head, chunked vs content-length policy |
//! | [`padding`] | User-Agent driven first-chunk padding |
//! | [`mode`] | Progressive/buffered selection per controller/action/layout |
//! | [`render`] | The tagged render directive an action returns |
//! | [`template`] | Template trait, ERB-style source templates, registry |
//! | [`controller`] | Controllers, actions, the streaming hook, dispatch |
//! | [`transport`] | Where chunks go: recorder, raw HTTP/1.1 wire |

pub mod config;
pub mod context;
pub mod controller;
pub mod emitter;
pub mod error;
pub mod frame;
pub mod mode;
pub mod padding;
pub mod render;
pub mod request;
pub mod template;
pub mod transport;

pub use config::{LayoutSettings, PaddingConfig, PaddingRule, StreamingConfig};
pub use context::{Finished, RenderContext};
pub use controller::{ActionContext, App, Controller};
pub use emitter::{ResponseEmitter, ResponseHead, ResponseSummary, TransferMode};
pub use error::{RenderError, RenderResult, TransportError};
pub use frame::{FrameId, FrameKind, FrameStack, RenderFrame};
pub use mode::{ModeSelector, RenderMode, StreamingPolicy};
pub use padding::PaddingTable;
pub use render::{LayoutChoice, Render, RenderBody};
pub use request::RequestInfo;
pub use template::{Content, Locals, RenderEnv, SourceTemplate, Template, TemplateRegistry, View};
pub use transport::{Recorder, Transport, WireTransport};
