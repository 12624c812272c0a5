//! URL composition for the external widget-inspection UI.
//!
//! The UI process announces a base URL; the bridge only has to point it at
//! the running application by appending the runtime service port.

use crate::runtime::endpoint::port_of;
use crate::session::registry::SessionRegistry;

/// Append `port=<service port>` to `base`.
///
/// Returns `None` when `service_uri` carries no port.
#[must_use]
pub fn with_service_port(base: &str, service_uri: &str) -> Option<String> {
    let port = port_of(service_uri)?;
    let (without_fragment, fragment) = match base.split_once('#') {
        Some((head, tail)) => (head, Some(tail)),
        None => (base, None),
    };
    let separator = if without_fragment.contains('?') {
        if without_fragment.ends_with('?') || without_fragment.ends_with('&') {
            ""
        } else {
            "&"
        }
    } else {
        "?"
    };
    let mut url = format!("{without_fragment}{separator}port={port}");
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    Some(url)
}

/// Inspection UI URL for the active session, if it has a runtime endpoint.
#[must_use]
pub fn for_active_session(registry: &SessionRegistry, base: &str) -> Option<String> {
    let uri = registry.active_service_uri()?;
    with_service_port(base, &uri)
}
