//! Path pattern matching.
//!
//! Two pattern forms:
//! - `/exact/path` matches only that path.
//! - `/prefix/**` matches `/prefix` and anything below it, on a segment
//!   boundary (`/prefix-other` does not match).
//!
//! No regex, matching is a single string comparison per pattern.

use std::fmt;

/// Error returned for patterns that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern '{0}' must start with '/'")]
    NotAbsolute(String),
    #[error("pattern '{0}' may only use '**' as its final segment")]
    MisplacedWildcard(String),
}

#[derive(Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute(raw.to_string()));
        }
        match raw.strip_suffix("/**") {
            Some(prefix) if !prefix.contains('*') => Ok(Self::Prefix(prefix.to_string())),
            Some(_) => Err(PatternError::MisplacedWildcard(raw.to_string())),
            None if raw.contains('*') => Err(PatternError::MisplacedWildcard(raw.to_string())),
            None => Ok(Self::Exact(raw.to_string())),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => path == expected,
            // "/**" compiles to an empty prefix and matches everything.
            Self::Prefix(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
                None => false,
            },
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "{p}"),
            Self::Prefix(p) => write!(f, "{p}/**"),
        }
    }
}

/// An ordered list of patterns; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    /// Compile every pattern, skipping invalid ones with a warning.
    ///
    /// Config validation rejects invalid patterns before they get here.
    pub fn compile<S: AsRef<str>>(raw: &[S]) -> Self {
        let patterns = raw
            .iter()
            .filter_map(|p| match PathPattern::parse(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring invalid path pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn first_match(&self, path: &str) -> Option<&PathPattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.first_match(path).is_some()
    }
}
