//! Per-request render context: the flush/push controller.
//!
//! A [`RenderContext`] owns the frame stack and the sink output goes to:
//! the live [`ResponseEmitter`] for a request, or a capture buffer for a
//! render-to-string sub-render. Templates reach it only through the
//! [`View`](crate::View) handle they are given.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::emitter::ResponseEmitter;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameId, FrameKind, FrameStack, Popped};
use crate::mode::RenderMode;
use crate::padding::pad_to;

enum Sink {
    Live(ResponseEmitter),
    /// Flushed content collects here and never reaches the network.
    Capture(String),
}

/// What a finished context leaves behind.
pub enum Finished {
    Live(ResponseEmitter),
    Captured(String),
}

impl Finished {
    /// The captured text of a render-to-string context.
    pub fn into_captured(self) -> Option<String> {
        match self {
            Finished::Captured(out) => Some(out),
            Finished::Live(_) => None,
        }
    }
}

pub struct RenderContext {
    mode: RenderMode,
    frames: FrameStack,
    sink: Sink,
    /// Pending first-chunk padding target; taken by the first chunk.
    padding: Option<usize>,
    chunks: usize,
}

impl RenderContext {
    /// A context connected to the request's response. Padding only applies
    /// to progressive responses.
    pub fn live(mode: RenderMode, emitter: ResponseEmitter, padding: Option<usize>) -> Self {
        Self {
            mode,
            frames: FrameStack::new(),
            sink: Sink::Live(emitter),
            padding: padding.filter(|_| mode.is_progressive()),
            chunks: 0,
        }
    }

    /// A context for render-to-string: same frames and flush algorithm,
    /// no network.
    pub fn isolated(mode: RenderMode) -> Self {
        Self {
            mode,
            frames: FrameStack::new(),
            sink: Sink::Capture(String::new()),
            padding: None,
            chunks: 0,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        matches!(self.sink, Sink::Live(_))
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Chunks handed to the emitter by this context.
    pub fn chunks_emitted(&self) -> usize {
        self.chunks
    }

    pub fn push_frame(&mut self, kind: FrameKind) -> FrameId {
        self.frames.push(kind)
    }

    /// Close the innermost frame. Closing the outermost frame delivers
    /// whatever it still holds as a final flush.
    pub fn pop_frame(&mut self) -> RenderResult<()> {
        match self.frames.pop() {
            None => Err(RenderError::FrameUnderflow),
            Some(Popped::Merged) => {
                trace!(depth = self.frames.depth(), "frame merged");
                Ok(())
            }
            Some(Popped::Root(rest)) => {
                debug!(bytes = rest.len(), "root frame closed");
                self.deliver(rest)
            }
        }
    }

    /// Close the innermost frame and hand its content back instead of
    /// merging it.
    pub fn detach_frame(&mut self) -> RenderResult<String> {
        self.frames
            .detach()
            .map(|frame| frame.into_pending())
            .ok_or(RenderError::FrameUnderflow)
    }

    pub fn write(&mut self, text: &str) -> RenderResult<()> {
        if self.frames.write(text) {
            Ok(())
        } else {
            Err(RenderError::FrameUnderflow)
        }
    }

    /// Send everything produced so far, across all open frames, as one
    /// chunk. A no-op when buffered; captured inside render-to-string.
    pub fn flush(&mut self) -> RenderResult<()> {
        if let Sink::Capture(out) = &mut self.sink {
            let pending = self.frames.drain_pending();
            trace!(bytes = pending.len(), "flush captured");
            out.push_str(&pending);
            return Ok(());
        }
        if !self.mode.is_progressive() {
            return Ok(());
        }
        let chunk = self.frames.drain_pending();
        self.emit(chunk)
    }

    /// Send `data` as its own chunk, bypassing every frame buffer.
    /// Discarded when buffered or inside render-to-string.
    pub fn push(&mut self, data: &str) -> RenderResult<()> {
        if self.is_live() && self.mode.is_progressive() {
            return self.emit(data.to_string());
        }
        trace!(bytes = data.len(), "push discarded");
        Ok(())
    }

    /// Close any frames left open and release the sink.
    pub fn finish(mut self) -> RenderResult<Finished> {
        while !self.frames.is_empty() {
            self.pop_frame()?;
        }
        Ok(match self.sink {
            Sink::Live(emitter) => Finished::Live(emitter),
            Sink::Capture(out) => Finished::Captured(out),
        })
    }

    fn deliver(&mut self, rest: String) -> RenderResult<()> {
        if let Sink::Capture(out) = &mut self.sink {
            out.push_str(&rest);
            return Ok(());
        }
        self.emit(rest)
    }

    fn emit(&mut self, mut chunk: String) -> RenderResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(target) = self.padding.take() {
            pad_to(&mut chunk, target);
        }
        let Sink::Live(emitter) = &mut self.sink else {
            return Ok(());
        };
        self.chunks += 1;
        debug!(
            chunk = self.chunks,
            bytes = chunk.len(),
            depth = self.frames.depth(),
            "emitting chunk"
        );
        emitter.write_chunk(Bytes::from(chunk))
    }
}
