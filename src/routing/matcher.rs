//! Route pattern matching logic.
//!
//! # Responsibilities
//! - Compile pattern strings into one of four pattern kinds
//! - Match a request path and capture variables
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Placeholder and percent-wildcard segments capture exactly one segment;
//!   segment counts must agree
//! - Regex patterns are anchored at the start of the path only, and only
//!   named groups are captured

use std::collections::BTreeMap;

use regex::Regex;

/// Prefix marking a pattern as a regular expression.
pub const REGEX_MARKER: &str = "r/";

/// Longest regex source accepted.
pub const MAX_REGEX_LEN: usize = 500;

/// Variables captured while matching.
pub type MatchedVars = BTreeMap<String, String>;

/// Why a pattern could not be compiled.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("regex pattern is {0} characters long, limit is {MAX_REGEX_LEN}")]
    RegexTooLong(usize),
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// One segment of a segmented pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture(String),
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub enum RoutePattern {
    /// Path equals the literal.
    Exact(String),
    /// `{name}` segments capture one path segment each.
    Placeholder(Vec<Segment>),
    /// `%NAME%` segments capture one path segment each.
    Wildcard(Vec<Segment>),
    /// Full regular expression; named groups become variables.
    Regex(Regex),
    /// Matches every path. Used only by the fallback rule.
    Any,
}

impl RoutePattern {
    /// Compile a configured pattern string.
    pub fn compile(raw: &str) -> Result<Self, PatternError> {
        if let Some(source) = raw.strip_prefix(REGEX_MARKER) {
            if source.len() > MAX_REGEX_LEN {
                return Err(PatternError::RegexTooLong(source.len()));
            }
            let anchored = Regex::new(&format!("^(?:{source})"))?;
            return Ok(RoutePattern::Regex(anchored));
        }

        let parts: Vec<&str> = raw.split('/').collect();
        if parts.iter().any(|p| wildcard_name(p).is_some()) {
            return Ok(RoutePattern::Wildcard(segments(&parts, wildcard_name)));
        }
        if parts.iter().any(|p| placeholder_name(p).is_some()) {
            return Ok(RoutePattern::Placeholder(segments(&parts, placeholder_name)));
        }
        Ok(RoutePattern::Exact(raw.to_string()))
    }

    /// Match `path`, returning captured variables on success.
    pub fn captures(&self, path: &str) -> Option<MatchedVars> {
        match self {
            RoutePattern::Any => Some(MatchedVars::new()),
            RoutePattern::Exact(literal) => (literal == path).then(MatchedVars::new),
            RoutePattern::Placeholder(segments) | RoutePattern::Wildcard(segments) => {
                match_segments(segments, path)
            }
            RoutePattern::Regex(regex) => {
                let caps = regex.captures(path)?;
                let vars = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                Some(vars)
            }
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RoutePattern::Exact(_) => "exact",
            RoutePattern::Placeholder(_) => "placeholder",
            RoutePattern::Wildcard(_) => "wildcard",
            RoutePattern::Regex(_) => "regex",
            RoutePattern::Any => "any",
        }
    }
}

fn placeholder_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

fn wildcard_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('%')
        .and_then(|s| s.strip_suffix('%'))
        .filter(|name| !name.is_empty())
}

fn segments(parts: &[&str], capture: fn(&str) -> Option<&str>) -> Vec<Segment> {
    parts
        .iter()
        .map(|part| match capture(part) {
            Some(name) => Segment::Capture(name.to_string()),
            None => Segment::Literal(part.to_string()),
        })
        .collect()
}

fn match_segments(segments: &[Segment], path: &str) -> Option<MatchedVars> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut vars = MatchedVars::new();
    for (segment, part) in segments.iter().zip(parts) {
        match segment {
            Segment::Literal(literal) if literal == part => {}
            Segment::Literal(_) => return None,
            Segment::Capture(name) => {
                vars.insert(name.clone(), part.to_string());
            }
        }
    }
    Some(vars)
}
