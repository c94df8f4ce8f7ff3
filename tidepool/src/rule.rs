//! Match rules: `(attribute key, predicate, expected value)`.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::predicate::{AttrValue, Comparison, Predicate};

/// An immutable rule testing one attribute of a resource.
///
/// A rule only speaks about observed attributes whose key equals
/// [`key`](Self::key); how absent keys are treated is decided by
/// [`ResourceConfiguration::matches`](crate::ResourceConfiguration::matches).
#[derive(Debug, Clone)]
pub struct MatchRule {
    key: String,
    predicate: Arc<dyn Predicate>,
    expected: AttrValue,
}

impl MatchRule {
    /// Creates a rule using one of the built-in comparisons.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidepool::{Comparison, MatchRule};
    ///
    /// let rule = MatchRule::new("service.name", Comparison::Eq, "scaphandre");
    /// assert!(rule.apply(&"scaphandre".into())?);
    /// assert!(!rule.apply(&"node-exporter".into())?);
    /// # Ok::<(), tidepool::TidepoolError>(())
    /// ```
    pub fn new(key: impl Into<String>, comparison: Comparison, expected: impl Into<AttrValue>) -> Self {
        Self::with_predicate(key, Arc::new(comparison), expected)
    }

    /// Creates a rule using any predicate, built-in or custom.
    pub fn with_predicate(
        key: impl Into<String>,
        predicate: Arc<dyn Predicate>,
        expected: impl Into<AttrValue>,
    ) -> Self {
        Self {
            key: key.into(),
            predicate,
            expected: expected.into(),
        }
    }

    /// Tests an observed value against this rule's expected value.
    ///
    /// # Errors
    ///
    /// Propagates the predicate's [`PredicateError`](crate::PredicateError),
    /// e.g. when the values are of incomparable kinds.
    pub fn apply(&self, observed: &AttrValue) -> Result<bool> {
        Ok(self.predicate.test(observed, &self.expected)?)
    }

    /// Returns the attribute key this rule tests.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the predicate.
    pub fn predicate(&self) -> &Arc<dyn Predicate> {
        &self.predicate
    }

    /// Returns the name of the predicate.
    pub fn predicate_name(&self) -> &str {
        self.predicate.name()
    }

    /// Returns the expected value.
    pub fn expected(&self) -> &AttrValue {
        &self.expected
    }
}

impl PartialEq for MatchRule {
    /// Predicates compare by name.
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.predicate.name() == other.predicate.name()
            && self.expected == other.expected
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key, self.predicate.name(), self.expected)
    }
}
