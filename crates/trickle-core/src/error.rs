//! Error types for the rendering pipeline.

use thiserror::Error;

use crate::emitter::TransferMode;

/// Result type alias for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Failures raised by the layer beneath the response emitter.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while dispatching and rendering a request.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("parse error in {name} at byte {offset}: {message}")]
    Parse {
        name: String,
        offset: usize,
        message: String,
    },

    #[error("undefined local: {0}")]
    UndefinedLocal(String),

    #[error("yield called outside of a layout")]
    NothingToYield,

    #[error("no route for {controller}#{action}")]
    RouteNotFound { controller: String, action: String },

    #[error("response committed to {committed:?}, cannot switch to {requested:?}")]
    ModeLocked {
        committed: TransferMode,
        requested: TransferMode,
    },

    #[error("response headers already sent")]
    HeadersSent,

    #[error("response transfer mode was never selected")]
    NotBegun,

    #[error("render frame stack is empty")]
    FrameUnderflow,

    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("action failed: {0}")]
    Action(#[source] anyhow::Error),

    #[error("streaming hook failed: {0}")]
    Hook(#[source] anyhow::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RenderError {
    /// True when the client connection is gone; the request must be
    /// abandoned rather than retried.
    pub fn is_transport(&self) -> bool {
        matches!(self, RenderError::Transport(_))
    }

    /// True for lookups that should surface as a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RenderError::RouteNotFound { .. } | RenderError::TemplateNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        let err = RenderError::from(TransportError::Closed);
        assert!(err.is_transport());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "transport error: connection closed by peer");
    }

    #[test]
    fn lookups_are_not_found() {
        assert!(RenderError::TemplateNotFound("x".into()).is_not_found());
        assert!(
            RenderError::RouteNotFound {
                controller: "a".into(),
                action: "b".into(),
            }
            .is_not_found()
        );
        assert!(!RenderError::HeadersSent.is_not_found());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::other("boom");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
