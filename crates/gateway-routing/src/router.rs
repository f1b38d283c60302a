//! Prefix route table.

use gateway_core::{GatewayError, GatewayResult, ServiceRoute};
use std::sync::Arc;

/// A matched route and the path to forward to it
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Matched route
    pub route: Arc<ServiceRoute>,
    /// Request path with the route prefix stripped
    pub forward_path: String,
}

/// Ordered list of routes; the first matching prefix wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<ServiceRoute>>,
}

impl RouteTable {
    /// Build a table, preserving the given order
    pub fn new(routes: impl IntoIterator<Item = ServiceRoute>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// All routes in match order
    #[must_use]
    pub fn routes(&self) -> &[Arc<ServiceRoute>] {
        &self.routes
    }

    /// Route by service name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ServiceRoute>> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// First route whose prefix starts the path
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&Arc<ServiceRoute>> {
        self.routes.iter().find(|r| path.starts_with(&r.path_prefix))
    }

    /// Match the path and compute the forwarded path
    pub fn resolve(&self, path: &str) -> GatewayResult<RouteMatch> {
        let route = self
            .match_path(path)
            .ok_or_else(|| GatewayError::route_not_found(path))?;
        Ok(RouteMatch {
            forward_path: rewrite_path(path, &route.path_prefix),
            route: Arc::clone(route),
        })
    }
}

/// Strip the prefix from the path; an empty remainder becomes `/`
#[must_use]
pub fn rewrite_path(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new([
            ServiceRoute::new("auth", "/api/auth"),
            ServiceRoute::new("users", "/api/users"),
            ServiceRoute::new("users-v2", "/api/users/v2"),
        ])
    }

    #[test]
    fn test_rewrite_path() {
        assert_eq!(rewrite_path("/api/users/123/profile", "/api/users"), "/123/profile");
        assert_eq!(rewrite_path("/api/courses", "/api/courses"), "/");
        assert_eq!(rewrite_path("/api/courses/", "/api/courses"), "/");
    }

    #[test]
    fn test_first_match_wins() {
        let table = table();
        let matched = table.resolve("/api/users/v2/me").unwrap();
        assert_eq!(matched.route.name, "users");
        assert_eq!(matched.forward_path, "/v2/me");
    }

    #[test]
    fn test_unmatched_path() {
        let err = table().resolve("/api/unknown").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_lookup_by_name() {
        let table = table();
        assert_eq!(table.get("auth").map(|r| r.path_prefix.as_str()), Some("/api/auth"));
        assert!(table.get("news").is_none());
        assert_eq!(table.routes().len(), 3);
    }
}
