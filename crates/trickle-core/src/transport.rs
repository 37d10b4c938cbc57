//! Transports: where an emitted response actually goes.
//!
//! The emitter decides *what* to send and when; a [`Transport`] only
//! moves bytes. [`WireTransport`] serialises HTTP/1.1 onto any
//! `std::io::Write`, [`Recorder`] keeps everything in memory so a test
//! (or a template under test) can inspect what has been received so far.

use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::emitter::ResponseHead;
use crate::error::TransportError;

/// Byte sink beneath a [`ResponseEmitter`](crate::ResponseEmitter).
///
/// Calls arrive in a fixed order: `send_head` once, any number of
/// `send_chunk`, then `finish`. Implementations must fail fast with
/// [`TransportError::Closed`] once the peer is gone instead of buffering.
pub trait Transport: Send {
    fn send_head(&mut self, head: &ResponseHead) -> Result<(), TransportError>;

    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// End of body: the terminal chunk for chunked responses.
    fn finish(&mut self) -> Result<(), TransportError>;
}

// ── Recorder ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Recording {
    head: Option<ResponseHead>,
    chunks: Vec<Bytes>,
    finished: bool,
    closed: bool,
}

/// In-memory transport. Clones share the same recording, so one handle
/// can be given to the emitter while another observes it.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recording>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        // A panic while holding the lock only happens inside a failing
        // test; keep reading what was recorded.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn head(&self) -> Option<ResponseHead> {
        self.lock().head.clone()
    }

    /// Chunks received so far, lossily decoded as UTF-8.
    pub fn chunks(&self) -> Vec<String> {
        self.lock()
            .chunks
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    /// Concatenation of every chunk received so far.
    pub fn body(&self) -> String {
        self.chunks().concat()
    }

    /// True once the terminal chunk (or end of a sized body) was sent.
    pub fn finished(&self) -> bool {
        self.lock().finished
    }

    /// Simulate the client going away; later sends fail with
    /// [`TransportError::Closed`].
    pub fn disconnect(&self) {
        self.lock().closed = true;
    }
}

impl Transport for Recorder {
    fn send_head(&mut self, head: &ResponseHead) -> Result<(), TransportError> {
        let mut rec = self.lock();
        if rec.closed {
            return Err(TransportError::Closed);
        }
        rec.head = Some(head.clone());
        Ok(())
    }

    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let mut rec = self.lock();
        if rec.closed {
            return Err(TransportError::Closed);
        }
        rec.chunks.push(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        let mut rec = self.lock();
        if rec.closed {
            return Err(TransportError::Closed);
        }
        rec.finished = true;
        Ok(())
    }
}

// ── Wire ────────────────────────────────────────────────────────

/// Raw HTTP/1.1 serialisation onto a writer.
///
/// The head decides the framing: a `Transfer-Encoding: chunked` head gets
/// `<hex len>\r\n<data>\r\n` per chunk and a `0\r\n\r\n` terminator,
/// anything else is written verbatim.
pub struct WireTransport<W> {
    writer: W,
    chunked: bool,
}

impl<W: Write + Send> WireTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            chunked: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(bytes).map_err(classify)?;
        self.writer.flush().map_err(classify)
    }
}

fn classify(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            TransportError::Closed
        }
        _ => TransportError::Io(err),
    }
}

impl<W: Write + Send> Transport for WireTransport<W> {
    fn send_head(&mut self, head: &ResponseHead) -> Result<(), TransportError> {
        self.chunked = head.is_chunked();
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            head.status.as_str(),
            head.status.canonical_reason().unwrap_or("")
        )
        .into_bytes();
        for (name, value) in &head.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        self.write_all(&out)
    }

    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        if !self.chunked {
            return self.write_all(&chunk);
        }
        let mut out = format!("{:x}\r\n", chunk.len()).into_bytes();
        out.extend_from_slice(&chunk);
        out.extend_from_slice(b"\r\n");
        self.write_all(&out)
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        if self.chunked {
            self.write_all(b"0\r\n\r\n")?;
        }
        Ok(())
    }
}
