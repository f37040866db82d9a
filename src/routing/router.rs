//! Route lookup.
//!
//! # Responsibilities
//! - Compile configured rules into an ordered rule list
//! - Find the first rule whose method filter and pattern accept a request
//! - Fall back to the catch-all rule when nothing else matches
//!
//! # Design Decisions
//! - Immutable after construction (shared across requests without locks)
//! - O(n) ordered scan, first match wins
//! - A rule whose pattern fails to compile is skipped, not fatal

use thiserror::Error;

use crate::config::{ResponseConfig, RouteConfig};
use crate::render::ResponseTemplate;
use crate::routing::matcher::{MatchedVars, RoutePattern};

/// Identifier reported for requests answered by the fallback rule.
pub const FALLBACK_ROUTE_ID: &str = "fallback";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("{configured} route rules configured but none could be compiled")]
    NoUsableRoutes { configured: usize },
}

/// A rule ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub id: String,
    pub source: String,
    pub pattern: RoutePattern,
    /// Uppercased method names; `None` accepts every method.
    pub methods: Option<Vec<String>>,
    pub response: ResponseTemplate,
    /// Set only on the router's own catch-all rule.
    pub fallback: bool,
}

impl CompiledRoute {
    fn accepts_method(&self, method: &str) -> bool {
        match &self.methods {
            Some(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
            None => true,
        }
    }
}

/// Result of a lookup: the rule that answered plus its captures.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a CompiledRoute,
    pub vars: MatchedVars,
}

impl RouteMatch<'_> {
    pub fn is_fallback(&self) -> bool {
        self.route.fallback
    }
}

/// Ordered rule list plus a catch-all fallback.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<CompiledRoute>,
    fallback: CompiledRoute,
}

impl Router {
    /// Compile rules in declaration order.
    pub fn from_config(routes: &[RouteConfig], fallback: &ResponseConfig) -> Result<Self, RouterError> {
        let mut compiled = Vec::with_capacity(routes.len());

        for (index, rule) in routes.iter().enumerate() {
            let id = rule
                .name
                .clone()
                .unwrap_or_else(|| format!("route-{index}"));

            let pattern = match RoutePattern::compile(&rule.pattern) {
                Ok(pattern) => pattern,
                Err(e) => {
                    tracing::error!(
                        route_id = %id,
                        pattern = %rule.pattern,
                        error = %e,
                        "Skipping route with invalid pattern"
                    );
                    continue;
                }
            };

            tracing::debug!(route_id = %id, kind = pattern.kind(), pattern = %rule.pattern, "Route compiled");

            compiled.push(CompiledRoute {
                id,
                source: rule.pattern.clone(),
                pattern,
                methods: rule
                    .methods
                    .as_ref()
                    .map(|methods| methods.iter().map(|m| m.to_ascii_uppercase()).collect()),
                response: ResponseTemplate::compile(&rule.response),
                fallback: false,
            });
        }

        if compiled.is_empty() {
            if !routes.is_empty() {
                return Err(RouterError::NoUsableRoutes {
                    configured: routes.len(),
                });
            }
            tracing::warn!("No route rules configured, every request gets the fallback response");
        }

        Ok(Self {
            routes: compiled,
            fallback: CompiledRoute {
                id: FALLBACK_ROUTE_ID.to_string(),
                source: "*".to_string(),
                pattern: RoutePattern::Any,
                methods: None,
                response: ResponseTemplate::compile(fallback),
                fallback: true,
            },
        })
    }

    /// First matching rule, or the fallback. Never fails.
    pub fn match_request(&self, method: &str, path: &str) -> RouteMatch<'_> {
        for route in &self.routes {
            if !route.accepts_method(method) {
                continue;
            }
            if let Some(vars) = route.pattern.captures(path) {
                return RouteMatch { route, vars };
            }
        }
        RouteMatch {
            route: &self.fallback,
            vars: MatchedVars::new(),
        }
    }

    /// Number of compiled rules, fallback excluded.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn rule(pattern: &str, status: u16) -> RouteConfig {
        RouteConfig {
            pattern: pattern.into(),
            name: None,
            methods: None,
            response: ResponseConfig {
                status,
                ..ResponseConfig::default()
            },
        }
    }

    fn fallback() -> ResponseConfig {
        ResponseConfig {
            status: 204,
            ..ResponseConfig::default()
        }
    }

    #[test]
    fn first_match_wins() {
        let router = Router::from_config(
            &[rule("/a/{x}", 201), rule("/a/b", 202), rule(r"r/\/a", 203)],
            &fallback(),
        )
        .unwrap();

        let m = router.match_request("GET", "/a/b");
        assert_eq!(m.route.id, "route-0");
        assert_eq!(m.vars.get("x").map(String::as_str), Some("b"));
        assert_eq!(m.route.response.status, StatusCode::CREATED);

        let m = router.match_request("GET", "/a/b/c");
        assert_eq!(m.route.id, "route-2");
    }

    #[test]
    fn unmatched_requests_use_fallback() {
        let router = Router::from_config(&[rule("/known", 200)], &fallback()).unwrap();
        let m = router.match_request("GET", "/unknown");
        assert!(m.is_fallback());
        assert!(m.vars.is_empty());
        assert_eq!(m.route.response.status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn method_filter_is_case_insensitive() {
        let mut post_only = rule("/login", 200);
        post_only.methods = Some(vec!["post".into()]);
        post_only.name = Some("login".into());
        let router = Router::from_config(&[post_only], &fallback()).unwrap();

        assert_eq!(router.match_request("POST", "/login").route.id, "login");
        assert_eq!(router.match_request("post", "/login").route.id, "login");
        assert!(router.match_request("GET", "/login").is_fallback());
    }

    #[test]
    fn invalid_rules_are_skipped() {
        let router = Router::from_config(
            &[rule("r/(unclosed", 500), rule("/ok", 200)],
            &fallback(),
        )
        .unwrap();
        assert_eq!(router.len(), 1);
        // Ids keep the configured position.
        assert_eq!(router.match_request("GET", "/ok").route.id, "route-1");
    }

    #[test]
    fn all_rules_invalid_is_an_error() {
        let result = Router::from_config(&[rule("r/(unclosed", 500)], &fallback());
        assert!(matches!(
            result,
            Err(RouterError::NoUsableRoutes { configured: 1 })
        ));
    }

    #[test]
    fn rule_named_fallback_is_not_the_fallback() {
        let mut named = rule("/decoy", 200);
        named.name = Some(FALLBACK_ROUTE_ID.into());
        let router = Router::from_config(&[named], &fallback()).unwrap();

        let m = router.match_request("GET", "/decoy");
        assert_eq!(m.route.id, FALLBACK_ROUTE_ID);
        assert!(!m.is_fallback());
        assert!(router.match_request("GET", "/other").is_fallback());
    }

    #[test]
    fn no_rules_means_fallback_only() {
        let router = Router::from_config(&[], &fallback()).unwrap();
        assert!(router.is_empty());
        assert!(router.match_request("DELETE", "/anything").is_fallback());
    }
}
