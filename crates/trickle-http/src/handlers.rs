//! Route handlers.
//!
//! Each request is dispatched on a blocking thread. The handler waits only
//! for the response head: chunked responses are returned straight away
//! with the chunk channel as their body, sized responses are collected
//! first so hyper can send them with their length.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use http::header::TRANSFER_ENCODING;
use tracing::{error, warn};
use trickle_core::{RenderError, RenderResult, RequestInfo, ResponseHead, ResponseSummary};

use crate::HttpState;
use crate::transport::{self, ChunkStream, ResponseReceiver};

/// GET /{controller}
pub async fn render_index(
    State(state): State<HttpState>,
    Path(controller): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = RequestInfo::new(method, uri.path(), headers);
    serve(state, request, controller, "index".to_string()).await
}

/// GET /{controller}/{action}
pub async fn render_action(
    State(state): State<HttpState>,
    Path((controller, action)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = RequestInfo::new(method, uri.path(), headers);
    serve(state, request, controller, action).await
}

async fn serve(state: HttpState, request: RequestInfo, controller: String, action: String) -> Response {
    let (transport, receiver) = transport::channel(state.channel_capacity);
    let app = state.app.clone();
    let render = tokio::task::spawn_blocking(move || {
        app.dispatch(&request, &controller, &action, Box::new(transport))
    });
    let ResponseReceiver { head, body } = receiver;

    let Ok(head) = head.await else {
        // No head means the render failed before its first byte.
        return match render.await {
            Ok(Err(err)) => error_response(&err),
            Ok(Ok(_)) => {
                error!("render finished without sending a head");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Err(err) => {
                error!(error = %err, "render task failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    };

    if head.is_chunked() {
        tokio::spawn(async move { log_outcome(render.await) });
        return build_response(head, Body::from_stream(body));
    }

    let collected = collect(body).await;
    log_outcome(render.await);
    match collected {
        Ok(bytes) => build_response(head, Body::from(bytes.freeze())),
        Err(err) => {
            error!(error = %err, "sized body failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn collect(mut body: ChunkStream) -> std::io::Result<BytesMut> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next_chunk().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

fn build_response(head: ResponseHead, body: Body) -> Response {
    let ResponseHead { status, mut headers } = head;
    // hyper frames streaming bodies itself.
    headers.remove(TRANSFER_ENCODING);
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn error_response(err: &RenderError) -> Response {
    if err.is_not_found() {
        return (StatusCode::NOT_FOUND, err.to_string()).into_response();
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

fn log_outcome(outcome: Result<RenderResult<ResponseSummary>, tokio::task::JoinError>) {
    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(err)) if err.is_transport() => warn!(error = %err, "client went away mid-render"),
        Ok(Err(err)) => error!(error = %err, "render failed after headers were sent"),
        Err(err) => error!(error = %err, "render task failed"),
    }
}
