//! Connection options for secondary clients.

use std::collections::HashMap;

use blockwatch_core::EndpointOptions;

use crate::error::{ExporterError, ExporterResult};

/// Logical service name of the identity API.
pub const IDENTITY_SERVICE: &str = "identity";

/// Pick the connection options for `preferred`, else for `fallback`.
///
/// Fails when neither key is present; no client is built in that case.
pub fn resolve_endpoint<'a>(
    endpoints: &'a HashMap<String, EndpointOptions>,
    preferred: &str,
    fallback: &str,
) -> ExporterResult<&'a EndpointOptions> {
    endpoints
        .get(preferred)
        .or_else(|| endpoints.get(fallback))
        .ok_or_else(|| {
            ExporterError::Resolution(format!(
                "no connection options for {preferred:?} or {fallback:?} available to build the {preferred} client"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(url: &str) -> EndpointOptions {
        EndpointOptions {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn preferred_wins() {
        let map = HashMap::from([
            ("identity".to_string(), options("A")),
            ("cinder".to_string(), options("B")),
        ]);
        let resolved = resolve_endpoint(&map, "identity", "cinder").unwrap();
        assert_eq!(resolved.url.as_deref(), Some("A"));
    }

    #[test]
    fn identity_only() {
        let map = HashMap::from([("identity".to_string(), options("A"))]);
        let resolved = resolve_endpoint(&map, "identity", "cinder").unwrap();
        assert_eq!(resolved.url.as_deref(), Some("A"));
    }

    #[test]
    fn falls_back() {
        let map = HashMap::from([("cinder".to_string(), options("B"))]);
        let resolved = resolve_endpoint(&map, "identity", "cinder").unwrap();
        assert_eq!(resolved.url.as_deref(), Some("B"));
    }

    #[test]
    fn empty_map_fails() {
        let err = resolve_endpoint(&HashMap::new(), "identity", "cinder").unwrap_err();
        assert!(matches!(err, ExporterError::Resolution(_)));
        assert!(err.to_string().contains("identity"));
    }
}
