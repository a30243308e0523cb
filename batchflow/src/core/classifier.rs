//! Most-specific-rule classification of dotted failure kinds.

use serde::{Deserialize, Serialize};

use crate::errors::kind_matches;

/// Maps failure kinds to values using prefix rules.
///
/// A rule for `io` matches `io` and every `io.*` descendant. When several
/// rules match, the one with the most dotted segments wins; among equally
/// specific rules the earliest one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindClassifier<T> {
    rules: Vec<(String, T)>,
    default: T,
}

impl<T: Clone> KindClassifier<T> {
    /// Creates a classifier returning `default` when nothing matches.
    #[must_use]
    pub const fn new(default: T) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, kind: impl Into<String>, value: T) -> Self {
        self.rules.push((kind.into(), value));
        self
    }

    /// Adds one rule per kind, all mapping to `value`.
    #[must_use]
    pub fn with_rules<I, S>(mut self, kinds: I, value: &T) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for kind in kinds {
            self.rules.push((kind.into(), value.clone()));
        }
        self
    }

    /// Returns the value of the most specific matching rule, if any.
    #[must_use]
    pub fn matching(&self, kind: &str) -> Option<&T> {
        let mut best: Option<(usize, &T)> = None;
        for (rule, value) in &self.rules {
            if kind_matches(rule, kind) {
                let depth = rule.split('.').count();
                if best.map_or(true, |(d, _)| depth > d) {
                    best = Some((depth, value));
                }
            }
        }
        best.map(|(_, v)| v)
    }

    /// Classifies a kind, falling back to the default.
    #[must_use]
    pub fn classify(&self, kind: &str) -> T {
        self.matching(kind).unwrap_or(&self.default).clone()
    }

    /// Returns the default value.
    #[must_use]
    pub const fn default_value(&self) -> &T {
        &self.default
    }

    /// Returns true if no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
