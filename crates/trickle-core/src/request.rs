//! The parts of an incoming request the renderer looks at.

use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue, Method};

#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, HeaderMap::new())
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            self.headers.insert(USER_AGENT, value);
        }
        self
    }

    /// The User-Agent, if present and readable as text.
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }
}
