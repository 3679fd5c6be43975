//! Response builder for error pages produced by the proxy itself

use crate::{Error, Result};
use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::Full;

/// Body type alias
pub type Body = Full<Bytes>;

/// Response builder for convenient response construction
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
}

impl ResponseBuilder {
    /// Create a new response builder
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// Start a response describing `error`, with the status the error maps to
    pub fn from_error(error: &Error) -> Self {
        Self::new(error.to_status_code())
    }

    /// Build response with text body
    pub fn text(self, body: impl Into<String>) -> Result<Response<Body>> {
        Ok(Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(body.into())))?)
    }
}

/// Convenience functions for the responses a proxy emits on its own
pub mod responses {
    use super::*;

    /// Plain-text page for an error raised before any backend byte was written
    pub fn error_page(error: &Error) -> Result<Response<Body>> {
        ResponseBuilder::from_error(error).text(format!("Error: {error}"))
    }
}
