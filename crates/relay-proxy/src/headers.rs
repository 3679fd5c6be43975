//! Hop-by-hop header handling
//!
//! Everything here is transport independent: plain functions over
//! [`HeaderMap`], so the filtering rules can be exercised without a network.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

/// `X-Forwarded-For`
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that only make sense for a single transport hop. Never forwarded
/// in either direction.
pub static HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
    header::PROXY_AUTHENTICATE,
    header::UPGRADE,
];

/// Whether `name` belongs to the fixed hop-by-hop set
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name)
}

/// Header names listed in the `Connection` header(s) of a message.
///
/// HTTP/1.1 lets a sender declare additional per-hop headers this way, e.g.
/// `Connection: close, X-Trace-Hop`. Tokens that are not valid header names
/// are skipped.
pub fn connection_tokens(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| HeaderName::from_bytes(token.as_bytes()).ok())
        .collect()
}

/// Copy `headers`, dropping the hop-by-hop set and any header named in
/// `connection_tokens`. Repeated headers keep all their values, in order.
pub fn filter_headers(headers: &HeaderMap, connection_tokens: &[HeaderName]) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_hop_by_hop(name) || connection_tokens.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}

/// Append this proxy's `Via` entry, keeping entries added by earlier hops
pub fn append_via(headers: &mut HeaderMap, via: &HeaderValue) {
    headers.append(header::VIA, via.clone());
}

/// Add `X-Forwarded-For` with the caller's address unless the request
/// already carries one. An existing value is never overwritten or extended.
pub fn ensure_forwarded_for(headers: &mut HeaderMap, remote: Option<IpAddr>) {
    if headers.contains_key(&X_FORWARDED_FOR) {
        return;
    }
    if let Some(ip) = remote {
        if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }
}
