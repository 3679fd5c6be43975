//! # Relay Core
//!
//! Core types and error handling shared by the Relay crates:
//! - The [`ProxyTarget`] a resolver hands to the proxy engine
//! - The [`Error`] type and its mapping to HTTP status codes
//! - Plain-text error responses for the embedding server

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod response;
pub mod target;

pub use error::{BoxError, Error, ForwardError, ForwardErrorKind, Result};
pub use response::ResponseBuilder;
pub use target::{ProxyTarget, Scheme};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{BoxError, Error, ForwardError, ForwardErrorKind, Result};
    pub use crate::response::ResponseBuilder;
    pub use crate::target::{ProxyTarget, Scheme};
}
