//! Header manipulation for forwarded traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Add X-Forwarded-For, X-Forwarded-Proto and X-Gateway-Server outbound
//! - Name the gateway's own response headers
//!
//! Existing `X-Forwarded-*` values from the client are replaced, not appended.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_GATEWAY_SERVER: HeaderName = HeaderName::from_static("x-gateway-server");
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Headers that only apply to a single transport leg.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Add the forwarding headers to an outbound request.
pub fn apply_forwarded(headers: &mut HeaderMap, client_ip: &str, proto: &str, backend_id: &str) {
    set(headers, X_FORWARDED_FOR, client_ip);
    set(headers, X_FORWARDED_PROTO, proto);
    set(headers, X_GATEWAY_SERVER, backend_id);
}

/// Insert a header, skipping values that are not valid header text.
pub fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!(header = %name, "Skipping header with invalid value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic abc"));
        headers.insert("x-session-hint", HeaderValue::from_static("1"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["content-type"], "application/json");
    }

    #[test]
    fn test_forwarded_headers_replace_client_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("6.6.6.6"));

        apply_forwarded(&mut headers, "10.0.0.7", "https", "api-1");

        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.7");
        assert_eq!(headers[X_FORWARDED_PROTO], "https");
        assert_eq!(headers[X_GATEWAY_SERVER], "api-1");
    }

    #[test]
    fn test_invalid_value_skipped() {
        let mut headers = HeaderMap::new();
        set(&mut headers, X_GATEWAY_SERVER, "bad\nvalue");
        assert!(headers.get(X_GATEWAY_SERVER).is_none());
    }
}
