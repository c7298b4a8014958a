//! Key-pattern matching
//!
//! Patterns are globs over key strings: `*` matches any run of characters
//! (including none), `?` matches exactly one character, everything else
//! matches literally. A pattern's literal prefix (the part before the first
//! wildcard) lets a scan seek directly to the first candidate key and stop
//! at the first key past the prefix, so a pattern scan costs
//! O(log n + matches) instead of a full traversal.

use serde::{Deserialize, Serialize};

/// A glob pattern restricting which keys participate in a scan or index
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern(String);

impl Pattern {
    /// Create a pattern from its glob source
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// The raw glob source
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a key matches this pattern
    ///
    /// An empty pattern matches every key, as does `*`.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.0.is_empty() || glob_match(&self.0, key)
    }

    /// The literal prefix before the first wildcard
    ///
    /// Every matching key starts with this prefix, which makes it a valid
    /// seek target and scan cutoff.
    #[must_use]
    pub fn literal_prefix(&self) -> &str {
        match self.0.find(['*', '?']) {
            Some(pos) => &self.0[..pos],
            None => &self.0,
        }
    }

    /// Whether the pattern contains no wildcards (matches a single key)
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self.0.contains(['*', '?'])
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Match a glob pattern against a key
///
/// Iterative with a single backtrack point: a mismatch rewinds to the most
/// recent `*` and lets it absorb one more key character. Linear in the key
/// length per star, never exponential, regardless of how many stars the
/// caller supplies.
fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0, 0);
    // Position after the last star, and the key position it matched to
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi + 1, ki));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if let Some((star_p, star_k)) = star {
            pi = star_p;
            ki = star_k + 1;
            star = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }
    // Only trailing stars may remain
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(Pattern::new("user:1").matches("user:1"));
        assert!(!Pattern::new("user:1").matches("user:12"));
        assert!(!Pattern::new("user:1").matches("user:"));
    }

    #[test]
    fn test_star_match() {
        let p = Pattern::new("user:*");
        assert!(p.matches("user:"));
        assert!(p.matches("user:1"));
        assert!(p.matches("user:1:name"));
        assert!(!p.matches("account:1"));

        assert!(Pattern::new("*").matches(""));
        assert!(Pattern::new("*").matches("anything"));
        assert!(Pattern::new("*:name").matches("user:1:name"));
    }

    #[test]
    fn test_question_match() {
        let p = Pattern::new("user:?");
        assert!(p.matches("user:1"));
        assert!(!p.matches("user:12"));
        assert!(!p.matches("user:"));
    }

    #[test]
    fn test_empty_pattern_matches_all() {
        assert!(Pattern::new("").matches("anything"));
        assert!(Pattern::new("").matches(""));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(Pattern::new("user:*").literal_prefix(), "user:");
        assert_eq!(Pattern::new("user:?:name").literal_prefix(), "user:");
        assert_eq!(Pattern::new("*").literal_prefix(), "");
        assert_eq!(Pattern::new("plain").literal_prefix(), "plain");
    }

    #[test]
    fn test_is_literal() {
        assert!(Pattern::new("user:1").is_literal());
        assert!(!Pattern::new("user:*").is_literal());
        assert!(!Pattern::new("user:?").is_literal());
    }

    #[test]
    fn test_star_backtracking() {
        assert!(Pattern::new("a*b*c").matches("axxbyyc"));
        assert!(Pattern::new("a*b*c").matches("abc"));
        assert!(!Pattern::new("a*b*c").matches("axxbyy"));
        assert!(Pattern::new("**").matches("x"));
        assert!(Pattern::new("*?*").matches("x"));
        assert!(!Pattern::new("*?*").matches(""));
        // A star in the key is ordinary data
        assert!(Pattern::new("*a").matches("*ba"));
    }

    #[test]
    fn test_many_stars_stay_fast() {
        // A star-heavy pattern against a long uniform key must not blow up
        // combinatorially
        let key = format!("{}!", "a".repeat(2000));
        let miss = Pattern::new("a*a*a*a*a*a*a*a*b");
        let hit = Pattern::new("a*a*a*a*a*a*a*a*!");
        assert!(!miss.matches(&key));
        assert!(hit.matches(&key));
    }
}
