//! Runtime service endpoint helpers.

/// Extract the TCP port from a service URI such as `ws://127.0.0.1:1234/abc=/ws`.
///
/// Returns `None` when the URI has no explicit, valid port.
#[must_use]
pub fn port_of(uri: &str) -> Option<u16> {
    let after_scheme = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

    // Bracketed IPv6 literal: [::1]:8181
    let port = if let Some(rest) = host_port.strip_prefix('[') {
        rest.split_once("]:").map(|(_, port)| port)?
    } else {
        host_port.rsplit_once(':').map(|(_, port)| port)?
    };
    port.parse().ok()
}

/// Convert an `http(s)` service URI to its WebSocket form, appending `ws`.
///
/// URIs that already use `ws`/`wss` are returned unchanged.
#[must_use]
pub fn to_websocket_uri(uri: &str) -> String {
    if uri.starts_with("ws://") || uri.starts_with("wss://") {
        return uri.to_owned();
    }
    let (scheme, rest) = match uri.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", uri),
    };
    let rest = rest.trim_end_matches('/');
    format!("{scheme}://{rest}/ws")
}
