//! Content-negotiation glue for the capability-advertisement document.
//!
//! The document's own schema is out of scope; deciding *whether* to serve
//! it instead of upgrading to the framed transport is not.

/// Media type a client sends in `Accept` to request the capability
/// document instead of the connection upgrade.
pub const CAPABILITY_MEDIA_TYPE: &str = "application/relay+json";

/// Whether an `Accept` header value indicates the client wants the
/// capability document rather than a transport upgrade.
pub fn wants_capability_document(accept_header: Option<&str>) -> bool {
    accept_header
        .map(|value| value.contains(CAPABILITY_MEDIA_TYPE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_header_does_not_want_document() {
        assert!(!wants_capability_document(None));
    }

    #[test]
    fn matching_media_type_wants_document() {
        assert!(wants_capability_document(Some(
            "text/html, application/relay+json"
        )));
    }

    #[test]
    fn unrelated_media_type_does_not_match() {
        assert!(!wants_capability_document(Some("application/json")));
    }
}
