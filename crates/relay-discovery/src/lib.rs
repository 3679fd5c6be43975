//! Backend resolution for Relay
//!
//! A resolver maps a logical service name to the single backend the proxy
//! should talk to right now. The proxy asks again every time it rebuilds its
//! connection pool, so a resolver that answers differently over time spreads
//! traffic across backends one pool at a time.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

#[cfg(feature = "dns")]
pub mod dns;
pub mod resolver;

pub use resolver::{BackendResolver, StaticResolver};

#[cfg(feature = "dns")]
pub use dns::{DnsConfig, DnsResolver};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::resolver::{BackendResolver, StaticResolver};

    #[cfg(feature = "dns")]
    pub use crate::dns::{DnsConfig, DnsResolver};
}
