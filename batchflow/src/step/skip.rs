//! Classification of item failures into retry, skip or fatal.

use serde::{Deserialize, Serialize};

use crate::core::KindClassifier;
use crate::errors::{BatchError, ItemError};

/// How a failed item is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Try the same work again.
    Retry,
    /// Drop the item and continue.
    Skip,
    /// Fail the step.
    Fatal,
}

/// Where a skipped failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPhase {
    /// The reader failed.
    Read,
    /// The processor failed.
    Process,
    /// The writer failed.
    Write,
}

impl SkipPhase {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Process => "process",
            Self::Write => "write",
        }
    }
}

/// Classifies item failures by kind, enforcing the step's skip limit.
///
/// The most specific matching rule decides. Rules of equal specificity
/// resolve fatal first, then retry, then skip. The end-of-stream kind is
/// always fatal, and a skip that would exceed the limit becomes fatal.
#[derive(Debug, Clone)]
pub struct SkipClassifier {
    rules: KindClassifier<FailureClass>,
    exhausted_rules: KindClassifier<FailureClass>,
    skip_limit: usize,
}

impl Default for SkipClassifier {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SkipClassifier {
    /// Starts a classifier with no rules, a fatal default and no skips.
    #[must_use]
    pub fn builder() -> SkipClassifierBuilder {
        SkipClassifierBuilder::default()
    }

    /// The configured skip limit.
    #[must_use]
    pub const fn skip_limit(&self) -> usize {
        self.skip_limit
    }

    /// Classifies a fresh failure given the skips already consumed.
    #[must_use]
    pub fn classify(&self, error: &ItemError, skip_count: u64) -> FailureClass {
        if error.is_end_of_stream() {
            return FailureClass::Fatal;
        }
        self.enforce_limit(self.rules.classify(&error.kind), skip_count)
    }

    /// Classifies a failure whose retries are used up: skip or fatal.
    #[must_use]
    pub fn classify_exhausted(&self, error: &ItemError, skip_count: u64) -> FailureClass {
        if error.is_end_of_stream() {
            return FailureClass::Fatal;
        }
        self.enforce_limit(self.exhausted_rules.classify(&error.kind), skip_count)
    }

    /// Returns true if the kind would be skipped while allowance remains.
    #[must_use]
    pub fn is_skippable(&self, error: &ItemError) -> bool {
        !error.is_end_of_stream()
            && self.exhausted_rules.classify(&error.kind) == FailureClass::Skip
    }

    /// Converts a failure that ended the step into the step error.
    #[must_use]
    pub fn fatal_error(&self, error: ItemError) -> BatchError {
        if self.is_skippable(&error) {
            BatchError::SkipLimitExceeded {
                limit: self.skip_limit,
                source: error,
            }
        } else {
            BatchError::Item(error)
        }
    }

    fn enforce_limit(&self, class: FailureClass, skip_count: u64) -> FailureClass {
        if class == FailureClass::Skip && skip_count >= self.skip_limit as u64 {
            FailureClass::Fatal
        } else {
            class
        }
    }
}

/// Builder for [`SkipClassifier`].
#[derive(Debug, Clone)]
pub struct SkipClassifierBuilder {
    fatal: Vec<String>,
    retryable: Vec<String>,
    skippable: Vec<String>,
    default: FailureClass,
    skip_limit: usize,
}

impl Default for SkipClassifierBuilder {
    fn default() -> Self {
        Self {
            fatal: Vec::new(),
            retryable: Vec::new(),
            skippable: Vec::new(),
            default: FailureClass::Fatal,
            skip_limit: 0,
        }
    }
}

impl SkipClassifierBuilder {
    /// Kinds that fail the step.
    #[must_use]
    pub fn fatal<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fatal.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Kinds that are retried.
    #[must_use]
    pub fn retryable<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Kinds that are skipped.
    #[must_use]
    pub fn skippable<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skippable.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Class of kinds no rule matches.
    #[must_use]
    pub const fn default_class(mut self, class: FailureClass) -> Self {
        self.default = class;
        self
    }

    /// Maximum number of skips per step execution.
    #[must_use]
    pub const fn skip_limit(mut self, limit: usize) -> Self {
        self.skip_limit = limit;
        self
    }

    /// Builds the classifier.
    #[must_use]
    pub fn build(self) -> SkipClassifier {
        let exhausted_default = match self.default {
            FailureClass::Retry => FailureClass::Fatal,
            other => other,
        };
        let rules = KindClassifier::new(self.default)
            .with_rules(self.fatal.iter().cloned(), &FailureClass::Fatal)
            .with_rules(self.retryable.iter().cloned(), &FailureClass::Retry)
            .with_rules(self.skippable.iter().cloned(), &FailureClass::Skip);
        let exhausted_rules = KindClassifier::new(exhausted_default)
            .with_rules(self.fatal, &FailureClass::Fatal)
            .with_rules(self.skippable, &FailureClass::Skip);
        SkipClassifier {
            rules,
            exhausted_rules,
            skip_limit: self.skip_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SkipClassifier {
        SkipClassifier::builder()
            .skippable(["parse", "io"])
            .retryable(["io.timeout", "db"])
            .fatal(["parse.schema", "db"])
            .skip_limit(2)
            .build()
    }

    #[test]
    fn test_most_specific_rule_decides() {
        let c = classifier();
        assert_eq!(c.classify(&ItemError::new("parse.number", "x"), 0), FailureClass::Skip);
        assert_eq!(c.classify(&ItemError::new("parse.schema.v2", "x"), 0), FailureClass::Fatal);
        assert_eq!(c.classify(&ItemError::new("io.timeout", "x"), 0), FailureClass::Retry);
        assert_eq!(c.classify(&ItemError::new("io.disk", "x"), 0), FailureClass::Skip);
        assert_eq!(c.classify(&ItemError::new("unknown", "x"), 0), FailureClass::Fatal);
    }

    #[test]
    fn test_equal_specificity_prefers_fatal() {
        let c = classifier();
        assert_eq!(c.classify(&ItemError::new("db", "x"), 0), FailureClass::Fatal);
    }

    #[test]
    fn test_skip_limit_turns_skip_fatal() {
        let c = classifier();
        let err = ItemError::new("parse", "x");
        assert_eq!(c.classify(&err, 1), FailureClass::Skip);
        assert_eq!(c.classify(&err, 2), FailureClass::Fatal);
        assert!(matches!(
            c.fatal_error(err),
            BatchError::SkipLimitExceeded { limit: 2, .. }
        ));
    }

    #[test]
    fn test_exhausted_retry_falls_back_to_skip_rules() {
        let c = classifier();
        assert_eq!(
            c.classify_exhausted(&ItemError::new("io.timeout", "x"), 0),
            FailureClass::Skip
        );
        let only_retry = SkipClassifier::builder().retryable(["net"]).skip_limit(5).build();
        assert_eq!(
            only_retry.classify_exhausted(&ItemError::new("net", "x"), 0),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_end_of_stream_is_always_fatal() {
        let c = SkipClassifier::builder()
            .skippable(["batch"])
            .default_class(FailureClass::Skip)
            .skip_limit(100)
            .build();
        let err = ItemError::end_of_stream("done");
        assert_eq!(c.classify(&err, 0), FailureClass::Fatal);
        assert!(matches!(c.fatal_error(err), BatchError::Item(_)));
    }
}
