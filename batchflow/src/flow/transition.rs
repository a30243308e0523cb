//! Transitions between flow states and their pattern matching.

use regex::Regex;
use std::cmp::{Ordering, Reverse};

use crate::errors::FlowValidationError;

/// Exit-code pattern: `*` matches any sequence, `?` exactly one character,
/// everything else literally.
#[derive(Debug, Clone)]
pub struct TransitionPattern {
    pattern: String,
    regex: Regex,
}

impl TransitionPattern {
    /// Compiles a pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, FlowValidationError> {
        let pattern = pattern.into();
        let mut source = String::with_capacity(pattern.len() + 2);
        source.push('^');
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');
        let regex = Regex::new(&source)
            .map_err(|e| FlowValidationError::new(format!("invalid transition pattern '{pattern}': {e}")))?;
        Ok(Self { pattern, regex })
    }

    /// The pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns true if `status` matches.
    #[must_use]
    pub fn matches(&self, status: &str) -> bool {
        self.regex.is_match(status)
    }

    /// True if the pattern has no wildcards.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }

    fn specificity(&self) -> (bool, usize, Reverse<usize>, usize) {
        let stars = self.pattern.matches('*').count();
        let questions = self.pattern.matches('?').count();
        let literals = self.pattern.chars().count() - stars - questions;
        (!self.is_exact(), stars, Reverse(literals), questions)
    }

    /// Orders patterns most specific first: exact patterns, then fewer `*`,
    /// then more literal characters, then fewer `?`.
    #[must_use]
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        self.specificity().cmp(&other.specificity())
    }
}

/// A transition `(from, pattern) -> to`.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Source state name.
    pub from: String,
    /// Exit-code pattern.
    pub pattern: TransitionPattern,
    /// Target state name.
    pub to: String,
}

impl Transition {
    /// Creates a transition.
    pub fn new(from: impl Into<String>, pattern: &str, to: impl Into<String>) -> Result<Self, FlowValidationError> {
        Ok(Self {
            from: from.into(),
            pattern: TransitionPattern::new(pattern)?,
            to: to.into(),
        })
    }
}

/// Sorts transitions most specific first; ties keep declaration order.
pub fn sort_by_specificity(transitions: &mut [Transition]) {
    transitions.sort_by(|a, b| a.pattern.cmp_specificity(&b.pattern));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> TransitionPattern {
        TransitionPattern::new(p).unwrap()
    }

    #[test]
    fn test_wildcards() {
        assert!(pattern("*").matches(""));
        assert!(pattern("*").matches("ANYTHING"));
        assert!(pattern("COMPLETED*").matches("COMPLETED_WITH_SKIPS"));
        assert!(pattern("C?T").matches("CAT"));
        assert!(!pattern("C?T").matches("CART"));
        assert!(!pattern("FAILED").matches("FAILED_HARD"));
        assert!(pattern("a.b").matches("a.b"));
        assert!(!pattern("a.b").matches("axb"));
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let mut transitions = vec![
            Transition::new("s", "*", "any").unwrap(),
            Transition::new("s", "COMP*", "prefix").unwrap(),
            Transition::new("s", "COMPLETED", "exact").unwrap(),
            Transition::new("s", "COMPLETE?", "single").unwrap(),
        ];
        sort_by_specificity(&mut transitions);
        let targets: Vec<_> = transitions.iter().map(|t| t.to.as_str()).collect();
        assert_eq!(targets, vec!["exact", "single", "prefix", "any"]);

        let chosen = transitions.iter().find(|t| t.pattern.matches("COMPLETED")).unwrap();
        assert_eq!(chosen.to, "exact");
    }
}
