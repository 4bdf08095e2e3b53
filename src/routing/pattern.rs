//! Path patterns.
//!
//! # Syntax
//! - `users` literal segment, matched exactly (case-sensitive)
//! - `{id}` one non-empty segment, bound percent-decoded under `id`
//! - `{*rest}` the remaining segments (zero or more), only as the last segment
//!
//! Empty segments are ignored on both sides, so a missing leading slash and a
//! trailing slash make no difference.

use std::fmt;

use percent_encoding::percent_decode_str;

use crate::http::request::PathParams;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("parameter name is empty")]
    EmptyParamName,

    #[error("catch-all `{{*{0}}}` must be the last segment")]
    CatchAllNotLast(String),

    #[error("parameter `{0}` appears more than once")]
    DuplicateParam(String),

    #[error("segment `{0}` mixes literal text and a parameter")]
    MixedSegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

impl Segment {
    fn same_shape(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Param(_), Segment::Param(_)) => true,
            (Segment::CatchAll(_), Segment::CatchAll(_)) => true,
            _ => false,
        }
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let parts: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<&str> = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => {
                    let (catch_all, name) = match inner.strip_prefix('*') {
                        Some(name) => (true, name),
                        None => (false, inner),
                    };
                    if name.is_empty() {
                        return Err(PatternError::EmptyParamName);
                    }
                    if name.contains(['{', '}', '*']) {
                        return Err(PatternError::MixedSegment(part.to_string()));
                    }
                    if names.contains(&name) {
                        return Err(PatternError::DuplicateParam(name.to_string()));
                    }
                    names.push(name);
                    if catch_all {
                        if i + 1 != parts.len() {
                            return Err(PatternError::CatchAllNotLast(name.to_string()));
                        }
                        Segment::CatchAll(name.to_string())
                    } else {
                        Segment::Param(name.to_string())
                    }
                }
                None if part.contains(['{', '}']) => {
                    return Err(PatternError::MixedSegment(part.to_string()));
                }
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        let raw = format!("/{}", parts.join("/"));
        Ok(Self { raw, segments })
    }

    /// Normalized form, always starting with `/`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of literal segments; more literals means a more specific route.
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Whether both patterns match exactly the same paths.
    pub fn same_shape(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.same_shape(b))
    }

    /// Match pre-split path segments, returning bound parameters.
    pub fn matches(&self, path: &[&str]) -> Option<PathParams> {
        let mut params = PathParams::default();
        let mut rest = path;

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    let (first, tail) = rest.split_first()?;
                    if *first != text.as_str() {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Param(name) => {
                    let (first, tail) = rest.split_first()?;
                    params.push(name, decode(first));
                    rest = tail;
                }
                Segment::CatchAll(name) => {
                    let joined = rest.iter().map(|s| decode(s)).collect::<Vec<_>>().join("/");
                    params.push(name, joined);
                    rest = &[];
                }
            }
        }

        rest.is_empty().then_some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a path into its non-empty segments, ignoring any query string.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split('?').next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty())
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
