//! Bridge from the blocking render to an async response body.
//!
//! The render runs on a blocking thread and writes through a
//! [`ChannelTransport`]; the handler awaits the head on a oneshot and
//! turns the chunk channel into a [`ChunkStream`] body. The channel is
//! bounded, so a slow client applies backpressure to the render.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;
use trickle_core::{ResponseHead, Transport, TransportError};

/// Chunks buffered between render and socket.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

type Chunk = Result<Bytes, io::Error>;

/// Transport half, moved into the render thread.
pub struct ChannelTransport {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: mpsc::Sender<Chunk>,
    aborted: Arc<AtomicBool>,
    finished: bool,
}

/// Handler half.
pub struct ResponseReceiver {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: ChunkStream,
}

pub fn channel(capacity: usize) -> (ChannelTransport, ResponseReceiver) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
    let aborted = Arc::new(AtomicBool::new(false));
    (
        ChannelTransport {
            head: Some(head_tx),
            body: body_tx,
            aborted: aborted.clone(),
            finished: false,
        },
        ResponseReceiver {
            head: head_rx,
            body: ChunkStream {
                rx: body_rx,
                aborted,
                done: false,
            },
        },
    )
}

impl Transport for ChannelTransport {
    fn send_head(&mut self, head: &ResponseHead) -> Result<(), TransportError> {
        let sender = self.head.take().ok_or(TransportError::Closed)?;
        sender.send(head.clone()).map_err(|_| TransportError::Closed)
    }

    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        trace!(bytes = chunk.len(), "chunk queued");
        self.body
            .blocking_send(Ok(chunk))
            .map_err(|_| TransportError::Closed)
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        if self.body.is_closed() {
            return Err(TransportError::Closed);
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for ChannelTransport {
    // The flag is set before the sender goes away, so the stream sees it
    // once the queued chunks are drained, however full the channel was.
    fn drop(&mut self) {
        if !self.finished {
            self.aborted.store(true, Ordering::Release);
        }
    }
}

/// Response body stream over the chunk channel. A render that stopped
/// without finishing ends the stream with an error instead of a clean end,
/// which aborts the connection rather than sending the terminal chunk.
pub struct ChunkStream {
    rx: mpsc::Receiver<Chunk>,
    aborted: Arc<AtomicBool>,
    done: bool,
}

impl ChunkStream {
    /// Next chunk, `None` once the render finished cleanly.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        std::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(chunk)),
            None => {
                self.done = true;
                if self.aborted.load(Ordering::Acquire) {
                    return Poll::Ready(Some(Err(io::Error::other("render aborted"))));
                }
                Poll::Ready(None)
            }
        }
    }
}

impl Stream for ChunkStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx)
    }
}
