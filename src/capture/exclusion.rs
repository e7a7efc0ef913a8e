//! Exclusion filter for traffic capture.
//!
//! # Responsibilities
//! - Compile configured patterns once, at instance creation
//! - Decide whether an exchange is left out of dumps and detailed logs
//!
//! # Design Decisions
//! - Patterns are regular expressions matched against the raw request
//!   target (path plus query), unanchored unless the pattern anchors itself
//! - Invalid patterns are warned about and skipped, never fatal
//! - Read-only after construction, shared without locking

use regex::Regex;

/// Compiled set of exclusion patterns for one proxy instance.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile `patterns`, dropping (with a warning) any that fail to parse.
    pub fn compile<I, S>(port: u16, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match Regex::new(pattern) {
                Ok(rx) => compiled.push(rx),
                Err(e) => {
                    tracing::warn!(port, pattern, error = %e, "Ignoring invalid exclusion pattern");
                }
            }
        }
        Self { patterns: compiled }
    }

    /// True if `target` matches any pattern.
    pub fn is_excluded(&self, target: &str) -> bool {
        self.patterns.iter().any(|rx| rx.is_match(target))
    }

    /// Number of patterns that compiled.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
