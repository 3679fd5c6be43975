//! # Relay Proxy
//!
//! Reverse-proxy engine for a single logical backend service:
//! - Pooled, keep-alive HTTP client bound to one resolved backend
//! - Hop-by-hop header filtering with `Via` and `X-Forwarded-For` injection
//! - Streaming request and response bodies
//! - Periodic and failure-driven engine rotation behind an atomic swap

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod body;
pub mod client;
pub mod engine;
pub mod headers;
pub mod lifecycle;
pub mod rotation;

pub use body::{ResponseBody, CHUNK_SIZE};
pub use client::{ClientConfig, HttpClient, DEFAULT_USER_AGENT};
pub use engine::{ProxyConfig, ProxyEngine};
pub use headers::{filter_headers, is_hop_by_hop, HOP_BY_HOP_HEADERS};
pub use lifecycle::{LifecycleState, ProxyManager};
pub use rotation::{MaxAgePolicy, NeverRotate, RotationPolicy, TWO_MSL};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ClientConfig, HttpClient};
    pub use crate::engine::{ProxyConfig, ProxyEngine};
    pub use crate::lifecycle::{LifecycleState, ProxyManager};
    pub use crate::rotation::{MaxAgePolicy, NeverRotate, RotationPolicy};
}
