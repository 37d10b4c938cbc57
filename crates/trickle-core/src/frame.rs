//! Render frames: one output buffer per nested render.
//!
//! Templates always write into the innermost frame. Because a parent
//! frame is suspended at the exact point where it started the nested
//! render, concatenating every frame's unsent text from the outermost
//! frame inwards yields the document-order prefix that is now final.

use std::fmt;

use tracing::trace;

/// Identifier assigned to each frame, unique within one stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of rendering unit a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Layout,
    View,
    Partial,
    Block,
    /// A frame whose content is taken out as a string instead of merged.
    Capture,
}

/// One nested rendering unit.
#[derive(Debug)]
pub struct RenderFrame {
    id: FrameId,
    kind: FrameKind,
    /// Text produced since this frame was last drained.
    buffer: String,
    /// Bytes this frame has contributed to chunks so far.
    drained: usize,
}

impl RenderFrame {
    fn new(id: FrameId, kind: FrameKind) -> Self {
        Self {
            id,
            kind,
            buffer: String::new(),
            drained: 0,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Content not yet handed to a chunk.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn drained(&self) -> usize {
        self.drained
    }

    pub fn into_pending(self) -> String {
        self.buffer
    }
}

/// Outcome of popping the innermost frame.
#[derive(Debug)]
pub enum Popped {
    /// Remaining content was merged into the parent frame.
    Merged,
    /// The outermost frame was popped; its remaining content is returned
    /// for a final flush.
    Root(String),
}

/// The explicit, request-local stack of render frames.
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<RenderFrame>,
    next_id: u64,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The active (innermost) frame.
    pub fn active(&self) -> Option<&RenderFrame> {
        self.frames.last()
    }

    /// Frames from outermost to innermost.
    pub fn iter(&self) -> impl Iterator<Item = &RenderFrame> {
        self.frames.iter()
    }

    /// Open a new innermost frame.
    pub fn push(&mut self, kind: FrameKind) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.frames.push(RenderFrame::new(id, kind));
        trace!(frame = %id, ?kind, depth = self.frames.len(), "frame pushed");
        id
    }

    /// Append text to the innermost frame. Returns `false` when no frame
    /// is open.
    pub fn write(&mut self, text: &str) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.buffer.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Close the innermost frame, substituting what is left of it into the
    /// parent at the parent's current write position.
    pub fn pop(&mut self) -> Option<Popped> {
        let frame = self.frames.pop()?;
        trace!(frame = %frame.id, kind = ?frame.kind, pending = frame.buffer.len(), "frame popped");
        match self.frames.last_mut() {
            Some(parent) => {
                parent.buffer.push_str(&frame.buffer);
                Some(Popped::Merged)
            }
            None => Some(Popped::Root(frame.buffer)),
        }
    }

    /// Close the innermost frame without merging it anywhere.
    pub fn detach(&mut self) -> Option<RenderFrame> {
        self.frames.pop()
    }

    /// Assemble the pending chunk: every frame's unsent text, outermost
    /// first. Consumed text is cleared; the frames stay open.
    pub fn drain_pending(&mut self) -> String {
        let total: usize = self.frames.iter().map(|f| f.buffer.len()).sum();
        let mut chunk = String::with_capacity(total);
        for frame in &mut self.frames {
            if frame.buffer.is_empty() {
                continue;
            }
            frame.drained += frame.buffer.len();
            chunk.push_str(&frame.buffer);
            frame.buffer.clear();
        }
        chunk
    }
}
