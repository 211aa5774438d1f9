//! Location-based challenge dispatch.

use std::fmt;
use std::sync::Arc;

use super::challenge::{ChallengeRequest, ChallengeResponse};
use crate::core::ChallengeHandler;

/// Routes challenges to handlers registered for a location prefix.
///
/// The longest matching prefix whose handler can answer the challenge wins.
/// The prefix `"*"` matches every location.
#[derive(Default)]
pub struct DispatchChallengeHandler {
    routes: Vec<(String, Arc<dyn ChallengeHandler>)>,
}

impl DispatchChallengeHandler {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for locations starting with `prefix`.
    pub fn register(mut self, prefix: impl Into<String>, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.routes.push((prefix.into(), handler));
        self
    }

    /// Handler that would answer `request`.
    pub fn lookup(&self, request: &ChallengeRequest) -> Option<&Arc<dyn ChallengeHandler>> {
        self.routes
            .iter()
            .filter(|(prefix, handler)| {
                matches_prefix(prefix, request.location()) && handler.can_handle(request)
            })
            .max_by_key(|(prefix, _)| if prefix == "*" { 0 } else { prefix.len() })
            .map(|(_, handler)| handler)
    }
}

fn matches_prefix(prefix: &str, location: &str) -> bool {
    prefix == "*" || location.starts_with(prefix)
}

impl ChallengeHandler for DispatchChallengeHandler {
    fn can_handle(&self, request: &ChallengeRequest) -> bool {
        self.lookup(request).is_some()
    }

    fn handle(&self, request: &ChallengeRequest) -> Option<ChallengeResponse> {
        self.lookup(request)?.handle(request)
    }
}

impl fmt::Debug for DispatchChallengeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchChallengeHandler")
            .field(
                "routes",
                &self.routes.iter().map(|(prefix, _)| prefix).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static str);

    impl ChallengeHandler for Fixed {
        fn can_handle(&self, request: &ChallengeRequest) -> bool {
            request.base_scheme().eq_ignore_ascii_case(self.0)
        }

        fn handle(&self, _request: &ChallengeRequest) -> Option<ChallengeResponse> {
            Some(ChallengeResponse::new(self.1))
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let dispatch = DispatchChallengeHandler::new()
            .register("*", Arc::new(Fixed("basic", "any")))
            .register("http://example.com/", Arc::new(Fixed("basic", "site")))
            .register("http://example.com/admin", Arc::new(Fixed("basic", "admin")));

        let request = ChallengeRequest::new("http://example.com/admin/x", "Basic");
        assert_eq!(dispatch.handle(&request).unwrap().credentials(), "admin");

        let request = ChallengeRequest::new("http://example.com/user", "Basic");
        assert_eq!(dispatch.handle(&request).unwrap().credentials(), "site");

        let request = ChallengeRequest::new("http://other.com/", "Basic");
        assert_eq!(dispatch.handle(&request).unwrap().credentials(), "any");
    }

    #[test]
    fn test_scheme_filter() {
        let dispatch = DispatchChallengeHandler::new()
            .register("http://example.com/", Arc::new(Fixed("negotiate", "kerberos")))
            .register("*", Arc::new(Fixed("basic", "fallback")));

        let request = ChallengeRequest::new("http://example.com/", "Basic");
        assert_eq!(dispatch.handle(&request).unwrap().credentials(), "fallback");

        let request = ChallengeRequest::new("http://example.com/", "Digest");
        assert!(!dispatch.can_handle(&request));
        assert!(dispatch.handle(&request).is_none());
    }
}
