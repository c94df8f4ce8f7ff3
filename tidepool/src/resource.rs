//! Resource configurations: a named rule set plus the metrics it subscribes to.
//!
//! Every configuration describes one class of resources (for example "hosts
//! exporting Scaphandre power metrics") and the metric names worth keeping
//! for it. The ingestion side keeps one sliding window per configuration.

use std::collections::BTreeSet;

use crate::error::{RegistryError, Result};
use crate::predicate::AttrValue;
use crate::rule::MatchRule;
use crate::table::Row;

/// A named, ordered list of rules and a set of subscribed metric names.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfiguration {
    name: String,
    rules: Vec<MatchRule>,
    metric_names: BTreeSet<String>,
}

impl ResourceConfiguration {
    /// Creates a configuration with the given rules and no metrics.
    pub fn new(name: impl Into<String>, rules: Vec<MatchRule>) -> Self {
        Self {
            name: name.into(),
            rules,
            metric_names: BTreeSet::new(),
        }
    }

    /// Appends a rule (builder style).
    pub fn with_rule(mut self, rule: MatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Subscribes to a metric (builder style).
    pub fn with_metric(mut self, name: impl Into<String>) -> Self {
        self.add_metric(name);
        self
    }

    /// Checks whether a resource with the given attributes matches.
    ///
    /// Every rule must hold for every observed pair whose key equals the
    /// rule's key. A rule whose key is not observed at all holds vacuously,
    /// so partial telemetry never excludes a resource. When the same key is
    /// observed more than once, every occurrence must pass.
    ///
    /// # Errors
    ///
    /// Propagates a [`PredicateError`](crate::PredicateError) from the first
    /// rule that cannot compare an observed value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidepool::{AttrValue, Comparison, MatchRule, ResourceConfiguration};
    ///
    /// let rc = ResourceConfiguration::new(
    ///     "scaphandre-metrics",
    ///     vec![MatchRule::new("service.name", Comparison::Eq, "scaphandre")],
    /// );
    ///
    /// assert!(rc.matches(&[])?);
    /// assert!(rc.matches(&[("service.name".to_string(), AttrValue::from("scaphandre"))])?);
    /// assert!(!rc.matches(&[("service.name".to_string(), AttrValue::from("other"))])?);
    /// # Ok::<(), tidepool::TidepoolError>(())
    /// ```
    pub fn matches(&self, observed: &[(String, AttrValue)]) -> Result<bool> {
        for rule in &self.rules {
            for (key, value) in observed {
                if key == rule.key() && !rule.apply(value)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Subscribes to a metric. Adding a metric twice has no further effect.
    pub fn add_metric(&mut self, name: impl Into<String>) {
        self.metric_names.insert(name.into());
    }

    /// Unsubscribes from a metric.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MetricNotFound`] if the metric was not subscribed.
    pub fn remove_metric(&mut self, name: &str) -> Result<()> {
        if self.metric_names.remove(name) {
            Ok(())
        } else {
            Err(RegistryError::MetricNotFound {
                configuration: self.name.clone(),
                metric: name.to_string(),
            }
            .into())
        }
    }

    /// Returns a copy of `row` holding only the subscribed metrics.
    pub fn select_metrics(&self, row: &Row) -> Row {
        row.filtered(|metric| self.metric_names.contains(metric))
    }

    /// Returns `true` if the metric is subscribed.
    pub fn has_metric(&self, name: &str) -> bool {
        self.metric_names.contains(name)
    }

    /// Returns the configuration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the rules in evaluation order.
    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// Returns the subscribed metric names.
    pub fn metric_names(&self) -> &BTreeSet<String> {
        &self.metric_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TidepoolError;
    use crate::predicate::Comparison;

    fn kv(key: &str, value: impl Into<AttrValue>) -> (String, AttrValue) {
        (key.to_string(), value.into())
    }

    fn scaphandre() -> ResourceConfiguration {
        ResourceConfiguration::new(
            "scaphandre-metrics",
            vec![MatchRule::new("service.name", Comparison::Eq, "scaphandre")],
        )
    }

    #[test]
    fn test_vacuous_match() {
        let rc = scaphandre();

        assert!(rc.matches(&[]).unwrap());
        assert!(rc.matches(&[kv("host.name", "node-1")]).unwrap());
        assert!(rc.matches(&[kv("service.name", "scaphandre")]).unwrap());
        assert!(!rc.matches(&[kv("service.name", "other")]).unwrap());
    }

    #[test]
    fn test_duplicate_observed_keys_must_all_pass() {
        let rc = scaphandre();

        assert!(!rc
            .matches(&[
                kv("service.name", "scaphandre"),
                kv("service.name", "other"),
            ])
            .unwrap());
        assert!(rc
            .matches(&[
                kv("service.name", "scaphandre"),
                kv("service.name", "scaphandre"),
            ])
            .unwrap());
    }

    #[test]
    fn test_rules_are_anded() {
        let rc = scaphandre().with_rule(MatchRule::new("cpu.count", Comparison::Ge, 4i64));

        assert!(rc
            .matches(&[kv("service.name", "scaphandre"), kv("cpu.count", 8i64)])
            .unwrap());
        assert!(!rc
            .matches(&[kv("service.name", "scaphandre"), kv("cpu.count", 2i64)])
            .unwrap());
        // Second rule's key absent: vacuously satisfied.
        assert!(rc.matches(&[kv("service.name", "scaphandre")]).unwrap());
    }

    #[test]
    fn test_first_failing_rule_short_circuits() {
        // The second rule would error on a string, but the first already fails.
        let rc = ResourceConfiguration::new(
            "rc",
            vec![
                MatchRule::new("service.name", Comparison::Eq, "scaphandre"),
                MatchRule::new("service.name", Comparison::Gt, 1i64),
            ],
        );
        assert!(!rc.matches(&[kv("service.name", "other")]).unwrap());
        assert!(rc.matches(&[kv("service.name", "scaphandre")]).is_err());
    }

    #[test]
    fn test_add_metric_is_idempotent() {
        let mut rc = scaphandre();
        rc.add_metric("x");
        rc.add_metric("x");

        assert_eq!(rc.metric_names().len(), 1);
        assert!(rc.has_metric("x"));
    }

    #[test]
    fn test_remove_metric() {
        let mut rc = scaphandre().with_metric("x");
        rc.remove_metric("x").unwrap();
        assert!(!rc.has_metric("x"));

        match rc.remove_metric("x") {
            Err(err @ TidepoolError::Registry(RegistryError::MetricNotFound { .. })) => {
                assert!(err.is_not_found());
            }
            other => panic!("Expected MetricNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn test_select_metrics() {
        let rc = scaphandre()
            .with_metric("scaph_host_power_microwatts")
            .with_metric("scaph_host_load_avg_one");

        let row = Row::new(7)
            .with_metric("scaph_host_power_microwatts", 12_500_000.0)
            .with_metric("node_cpu_seconds_total", 3.0);

        let selected = rc.select_metrics(&row);
        assert_eq!(selected.timestamp_ns(), 7);
        assert_eq!(selected.metrics().len(), 1);
        assert_eq!(selected.get("scaph_host_power_microwatts"), Some(12_500_000.0));
    }
}
