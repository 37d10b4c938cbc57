//! HTTP response emitter: header policy and chunk emission.
//!
//! The emitter owns the [`Transport`] for one response. In chunked mode
//! every non-empty chunk goes out immediately and the head is committed
//! on the first write, so the action can still adjust status and content
//! type up to that point. In content-length mode the body is collected
//! and sent once, after its exact length is known.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::transport::Transport;

/// How the response body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    ContentLength,
    Chunked,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

impl ResponseHead {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn set_content_type(&mut self, content_type: &str) -> RenderResult<()> {
        self.set_header(CONTENT_TYPE, content_type)
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> RenderResult<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| RenderError::InvalidHeader(format!("{name}: {value}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// True when the head announces a chunked body.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get(TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

/// What was sent for one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    pub status: u16,
    pub mode: TransferMode,
    /// Body chunks handed to the transport, terminator excluded.
    pub chunks: usize,
    pub bytes: usize,
}

/// Owns the transport for one response and enforces the header policy.
pub struct ResponseEmitter {
    transport: Box<dyn Transport>,
    head: ResponseHead,
    mode: Option<TransferMode>,
    headers_sent: bool,
    body: BytesMut,
    chunks: usize,
    bytes: usize,
}

impl ResponseEmitter {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            head: ResponseHead::default(),
            mode: None,
            headers_sent: false,
            body: BytesMut::new(),
            chunks: 0,
            bytes: 0,
        }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Mutable access to the head; fails once it is on the wire.
    pub fn head_mut(&mut self) -> RenderResult<&mut ResponseHead> {
        if self.headers_sent {
            return Err(RenderError::HeadersSent);
        }
        Ok(&mut self.head)
    }

    pub fn set_status(&mut self, status: StatusCode) -> RenderResult<()> {
        self.head_mut()?.status = status;
        Ok(())
    }

    pub fn mode(&self) -> Option<TransferMode> {
        self.mode
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Fix the transfer mode. Must happen before the first body byte; once
    /// headers are out or body bytes are buffered the mode is locked.
    pub fn begin(&mut self, mode: TransferMode) -> RenderResult<()> {
        if let Some(committed) = self.mode {
            if committed == mode {
                return Ok(());
            }
            if self.headers_sent || !self.body.is_empty() {
                return Err(RenderError::ModeLocked {
                    committed,
                    requested: mode,
                });
            }
        }

        match mode {
            TransferMode::Chunked => {
                self.head
                    .headers
                    .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                self.head.headers.remove(CONTENT_LENGTH);
            }
            TransferMode::ContentLength => {
                self.head.headers.remove(TRANSFER_ENCODING);
            }
        }
        self.mode = Some(mode);
        debug!(?mode, status = self.head.status.as_u16(), "response mode selected");
        Ok(())
    }

    /// Hand one chunk of body to the response. Empty chunks are dropped.
    pub fn write_chunk(&mut self, chunk: Bytes) -> RenderResult<()> {
        let mode = self.mode.ok_or(RenderError::NotBegun)?;
        if chunk.is_empty() {
            return Ok(());
        }
        match mode {
            TransferMode::Chunked => {
                self.send_head()?;
                self.chunks += 1;
                self.bytes += chunk.len();
                debug!(chunk = self.chunks, bytes = chunk.len(), "chunk written");
                self.transport.send_chunk(chunk)?;
            }
            TransferMode::ContentLength => self.body.extend_from_slice(&chunk),
        }
        Ok(())
    }

    /// Complete the response: terminal chunk in chunked mode, the single
    /// sized body otherwise.
    pub fn finish(mut self) -> RenderResult<ResponseSummary> {
        let mode = self.mode.ok_or(RenderError::NotBegun)?;
        if mode == TransferMode::ContentLength {
            let len = self.body.len();
            self.head
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(len));
            self.send_head()?;
            if len > 0 {
                let body = self.body.split().freeze();
                self.chunks = 1;
                self.bytes = len;
                self.transport.send_chunk(body)?;
            }
        } else {
            self.send_head()?;
        }
        self.transport.finish()?;

        debug!(?mode, chunks = self.chunks, bytes = self.bytes, "response finished");
        Ok(ResponseSummary {
            status: self.head.status.as_u16(),
            mode,
            chunks: self.chunks,
            bytes: self.bytes,
        })
    }

    fn send_head(&mut self) -> RenderResult<()> {
        if !self.headers_sent {
            self.transport.send_head(&self.head)?;
            self.headers_sent = true;
        }
        Ok(())
    }
}
