//! # Relay Runtime
//!
//! Serves a [`relay_proxy::ProxyManager`] over HTTP/1.1:
//! - Server lifecycle (startup, running, shutdown)
//! - Graceful shutdown with signal handling
//! - Plain-text error pages for requests that never reached a backend

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod handler;
pub mod server;
pub mod shutdown;

pub use handler::{ProxyBody, RequestHandler};
pub use server::{build_resolver, proxy_config, Server, ServerBuilder};
pub use shutdown::{ShutdownSignal, SignalHandler};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Server is initializing
    Initializing,
    /// Server is running
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server is stopped
    Stopped,
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::server::{Server, ServerBuilder};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::RuntimeState;
}
