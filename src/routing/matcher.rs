//! Path pattern parsing and matching.
//!
//! # Responsibilities
//! - Parse route patterns (`/blog/:slug`, `/files/*rest`) into segments
//! - Match a split request path against a pattern, capturing parameters
//! - Order patterns by specificity
//! - Produce the normalized form used for duplicate detection
//!
//! # Design Decisions
//! - Patterns are parsed once at build time, never per request
//! - Path matching is case-sensitive
//! - Parameters capture exactly one non-empty component
//! - A wildcard is only legal as the last segment
//! - Request paths are percent-decoded per component; `%2F` never splits

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::Serialize;

/// Name under which an unnamed wildcard is captured.
pub const WILDCARD_NAME: &str = "*";

/// One component of a parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

impl Segment {
    /// Rank used for left-to-right specificity ordering.
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Param(_) => 1,
            Segment::Wildcard(_) => 2,
        }
    }
}

/// A pattern failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid route pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl PatternError {
    fn new(pattern: &str, reason: impl Into<String>) -> Self {
        Self { pattern: pattern.to_string(), reason: reason.into() }
    }
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern such as `/contact/:id` or `/static/*path`.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| PatternError::new(raw, "must start with `/`"))?;

        let mut segments = Vec::new();
        if rest.is_empty() {
            return Ok(Self { raw: raw.to_string(), segments });
        }

        let parts: Vec<&str> = rest.split('/').collect();
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::new(raw, "parameter segment needs a name"));
                }
                if segments.iter().any(|s| matches!(s, Segment::Param(n) if n == name)) {
                    return Err(PatternError::new(raw, format!("parameter `{}` appears twice", name)));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if let Some(name) = part.strip_prefix('*') {
                if i != last {
                    return Err(PatternError::new(raw, "wildcard must be the last segment"));
                }
                let name = if name.is_empty() { WILDCARD_NAME } else { name };
                if segments.iter().any(|s| matches!(s, Segment::Param(n) if n == name)) {
                    return Err(PatternError::new(raw, format!("wildcard `{}` reuses a parameter name", name)));
                }
                segments.push(Segment::Wildcard(name.to_string()));
            } else if part.is_empty() && i != last {
                return Err(PatternError::new(raw, "empty path segment"));
            } else {
                // A trailing empty literal keeps `/blog/` distinct from `/blog`.
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self { raw: raw.to_string(), segments })
    }

    /// Build a pattern that matches `path` verbatim.
    pub fn literal(path: &str) -> Self {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').map(|s| Segment::Literal(s.to_string())).collect()
        };
        Self { raw: format!("/{}", trimmed), segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when every segment is literal.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard(_)))
    }

    fn param_count(&self) -> usize {
        self.segments.iter().filter(|s| matches!(s, Segment::Param(_))).count()
    }

    /// Form used for duplicate detection: parameter names are erased.
    pub fn normalized(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Param(_) => out.push(':'),
                Segment::Wildcard(_) => out.push('*'),
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Match the components of a request path (split on `/`, without the
    /// leading empty component).
    pub fn matches(&self, parts: &[&str]) -> Option<ParamSet> {
        let mut params = ParamSet::default();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Wildcard(name) => {
                    if parts.len() <= i {
                        return None;
                    }
                    params.insert(name.clone(), parts[i..].join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Most specific first: no wildcard before wildcard, fewer parameters
    /// first, then literal-before-parameter from left to right.
    pub fn specificity_cmp(&self, other: &Self) -> Ordering {
        self.has_wildcard()
            .cmp(&other.has_wildcard())
            .then_with(|| self.param_count().cmp(&other.param_count()))
            .then_with(|| {
                let left = self.segments.iter().map(Segment::rank);
                let right = other.segments.iter().map(Segment::rank);
                left.cmp(right)
            })
            .then_with(|| other.segments.len().cmp(&self.segments.len()))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a request path into the components a pattern matches against.
pub fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// The request path is not valid percent-encoded UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request path is not valid percent-encoded UTF-8")]
pub struct PathDecodeError;

/// Split a request path and percent-decode each component.
pub fn decode_path(path: &str) -> Result<Vec<String>, PathDecodeError> {
    split_path(path)
        .into_iter()
        .map(|part| {
            percent_decode_str(part)
                .decode_utf8()
                .map(Cow::into_owned)
                .map_err(|_| PathDecodeError)
        })
        .collect()
}

/// Ordered parameter captures from one match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParamSet(IndexMap<String, String>);

impl ParamSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
