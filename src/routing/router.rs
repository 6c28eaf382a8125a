//! Route table construction and lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Detect duplicate (method, pattern) pairs at build time
//! - Look up the matching route for a request
//! - Distinguish not-found from method-not-allowed
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) literal lookup via HashMap, then an ordered scan of dynamic routes
//! - Explicit NotFound rather than silent default
//! - HEAD falls back to GET

use std::collections::HashMap;
use axum::http::Method;
use serde::Serialize;
use crate::routing::matcher::{decode_path, ParamSet, PathPattern, PatternError};

/// Methods accepted in explicit route names.
const ROUTE_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::CONNECT,
    Method::OPTIONS,
    Method::TRACE,
    Method::PATCH,
];

/// Where a route came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    /// Derived from a template file path.
    Implicit,
    /// Declared by a definition named `<METHOD> <pattern>`.
    Explicit,
}

/// A single route binding.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    /// Template rendered for this route.
    pub template: String,
    /// Root-relative file that declared the route.
    pub file: String,
    pub source: RouteSource,
}

/// Route table build failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("duplicate route {method} {pattern}: declared by {first} and {second}")]
    Duplicate {
        method: Method,
        pattern: String,
        first: String,
        second: String,
    },

    #[error("template `{template}` in {file}: {source}")]
    InvalidPattern {
        template: String,
        file: String,
        #[source]
        source: PatternError,
    },
}

/// Parse a template name of the form `<METHOD> <pattern>`.
///
/// Returns `None` when the name does not start with an upper-case method
/// followed by a space; such templates are ordinary named templates.
pub fn parse_route_name(name: &str) -> Option<Result<(Method, PathPattern), PatternError>> {
    let (verb, rest) = name.split_once(' ')?;
    let method = ROUTE_METHODS.iter().find(|m| m.as_str() == verb)?.clone();
    Some(PathPattern::parse(rest.trim()).map(|pattern| (method, pattern)))
}

/// Outcome of a lookup.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found { route: &'a Route, params: ParamSet },
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
    /// The path does not decode to UTF-8.
    BadPath,
}

/// Immutable route index.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    /// Literal path → indexes into `routes`.
    literal: HashMap<String, Vec<usize>>,
    /// Dynamic route indexes, most specific first.
    dynamic: Vec<usize>,
}

impl RouteTable {
    /// Build the table, failing on any duplicate (method, pattern) pair.
    pub fn build(routes: Vec<Route>) -> Result<Self, RouteError> {
        let mut seen: HashMap<(Method, String), usize> = HashMap::new();
        let mut literal: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dynamic = Vec::new();

        for (i, route) in routes.iter().enumerate() {
            let key = (route.method.clone(), route.pattern.normalized());
            if let Some(&prev) = seen.get(&key) {
                return Err(RouteError::Duplicate {
                    method: route.method.clone(),
                    pattern: route.pattern.to_string(),
                    first: routes[prev].file.clone(),
                    second: route.file.clone(),
                });
            }
            seen.insert(key, i);

            if route.pattern.is_literal() {
                literal.entry(route.pattern.normalized()).or_default().push(i);
            } else {
                dynamic.push(i);
            }
        }

        dynamic.sort_by(|&a, &b| routes[a].pattern.specificity_cmp(&routes[b].pattern));

        Ok(Self { routes, literal, dynamic })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a request.
    pub fn match_route(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let Ok(decoded) = decode_path(path) else {
            return RouteMatch::BadPath;
        };
        let parts: Vec<&str> = decoded.iter().map(String::as_str).collect();
        let mut allowed: Vec<Method> = Vec::new();

        // A decoded `/` inside a component must not reach a literal route
        // through the joined key, so literal hits are re-checked per segment.
        let literal_key = PathPattern::literal(&format!("/{}", parts.join("/"))).normalized();
        let literal = self
            .literal
            .get(&literal_key)
            .into_iter()
            .flatten()
            .filter(|&&i| self.routes[i].pattern.matches(&parts).is_some())
            .map(|&i| (i, ParamSet::default()));
        let dynamic = self
            .dynamic
            .iter()
            .filter_map(|&i| self.routes[i].pattern.matches(&parts).map(|params| (i, params)));

        // Candidates arrive most specific first; the first one for this
        // method wins, a GET candidate serves HEAD if no HEAD route matched.
        let mut head_fallback: Option<(usize, ParamSet)> = None;
        for (i, params) in literal.chain(dynamic) {
            let route = &self.routes[i];
            if route.method == *method {
                return RouteMatch::Found { route, params };
            }
            if *method == Method::HEAD && route.method == Method::GET && head_fallback.is_none() {
                head_fallback = Some((i, params));
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }

        if let Some((i, params)) = head_fallback {
            return RouteMatch::Found { route: &self.routes[i], params };
        }

        if allowed.is_empty() {
            return RouteMatch::NotFound;
        }
        if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
            allowed.push(Method::HEAD);
        }
        RouteMatch::MethodNotAllowed { allowed }
    }
}

/// Summary of one route for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub method: String,
    pub pattern: String,
    pub template: String,
    pub file: String,
    pub source: RouteSource,
}

impl From<&Route> for RouteSummary {
    fn from(route: &Route) -> Self {
        Self {
            method: route.method.to_string(),
            pattern: route.pattern.to_string(),
            template: route.template.clone(),
            file: route.file.clone(),
            source: route.source,
        }
    }
}
