//! trickle-http — serves a trickle [`App`] over HTTP with axum.
//!
//! Progressive responses reach the client chunk by chunk as the template
//! flushes; buffered responses are sent whole with a `Content-Length`.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/{controller}` | The controller's `index` action |
//! | GET | `/{controller}/{action}` | Any action |
//!
//! Unknown controllers, actions and templates answer 404; failures before
//! the first byte answer 500. A render that fails after its head was sent
//! aborts the connection.

pub mod handlers;
pub mod transport;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use trickle_core::App;

pub use transport::{ChannelTransport, ChunkStream, DEFAULT_CHANNEL_CAPACITY, ResponseReceiver};

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<App>,
    /// Chunks a render may run ahead of the client.
    pub channel_capacity: usize,
}

/// Build the router for `app`.
pub fn build_router(app: Arc<App>) -> Router {
    build_router_with_capacity(app, DEFAULT_CHANNEL_CAPACITY)
}

pub fn build_router_with_capacity(app: Arc<App>, channel_capacity: usize) -> Router {
    let state = HttpState {
        app,
        channel_capacity,
    };
    Router::new()
        .route("/{controller}", get(handlers::render_index))
        .route("/{controller}/{action}", get(handlers::render_action))
        .with_state(state)
}
