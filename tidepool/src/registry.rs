//! The bridge configuration registry.
//!
//! The registry aggregates [`ResourceConfiguration`]s by name and answers
//! "which configurations apply to this resource?" for the ingestion path.
//!
//! # Overview
//!
//! - Entries are kept in insertion order (an `IndexMap`), so
//!   [`matching`](BridgeConfigurationRegistry::matching) returns results in a
//!   deterministic order.
//! - [`set`](BridgeConfigurationRegistry::set) is an upsert: the newer
//!   configuration replaces the older one wholesale, keeping its position.
//! - `dataframe_ttl` is stored and handed out for an external sweeper; the
//!   registry never acts on it.
//!
//! # Example
//!
//! ```rust
//! use tidepool::{
//!     AttrValue, BridgeConfigurationRegistry, Comparison, MatchRule, ResourceConfiguration,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = BridgeConfigurationRegistry::new();
//! registry.set(
//!     ResourceConfiguration::new(
//!         "scaphandre-metrics",
//!         vec![MatchRule::new("service.name", Comparison::Eq, "scaphandre")],
//!     )
//!     .with_metric("scaph_host_power_microwatts"),
//! );
//!
//! let observed = [("service.name".to_string(), AttrValue::from("scaphandre"))];
//! let names: Vec<_> = registry.matching(&observed)?.iter().map(|rc| rc.name()).collect();
//! assert_eq!(names, vec!["scaphandre-metrics"]);
//! # Ok(())
//! # }
//! ```

use indexmap::IndexMap;

use crate::error::{RegistryError, Result};
use crate::predicate::AttrValue;
use crate::resource::ResourceConfiguration;

/// Default time-to-live for per-configuration windows, in seconds.
pub const DEFAULT_DATAFRAME_TTL: u64 = 60;

/// Name-keyed, insertion-ordered collection of resource configurations.
///
/// # Thread Safety
///
/// The registry is a plain value. Wrap it in a lock (as
/// [`Bridge`](crate::Bridge) does) to share it between an administrative
/// writer and the ingestion path.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfigurationRegistry {
    /// Configurations by name, in insertion order.
    configurations: IndexMap<String, ResourceConfiguration>,
    /// Declared time-to-live in seconds; stored only.
    dataframe_ttl: u64,
}

impl BridgeConfigurationRegistry {
    /// Creates an empty registry with the default TTL.
    pub fn new() -> Self {
        Self {
            configurations: IndexMap::new(),
            dataframe_ttl: DEFAULT_DATAFRAME_TTL,
        }
    }

    /// Inserts a configuration, replacing any existing one with the same name.
    ///
    /// Returns the replaced configuration, if there was one. Rules and metrics
    /// are never merged: last write wins.
    pub fn set(&mut self, config: ResourceConfiguration) -> Option<ResourceConfiguration> {
        self.configurations.insert(config.name().to_string(), config)
    }

    /// Removes and returns the configuration registered under `name`.
    ///
    /// The relative order of the remaining entries is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConfigurationNotFound`] if `name` is absent.
    pub fn remove(&mut self, name: &str) -> Result<ResourceConfiguration> {
        self.configurations.shift_remove(name).ok_or_else(|| {
            RegistryError::ConfigurationNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Returns every configuration that matches the observed attributes,
    /// in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates the first [`PredicateError`](crate::PredicateError) raised
    /// while evaluating a configuration's rules.
    pub fn matching(&self, observed: &[(String, AttrValue)]) -> Result<Vec<&ResourceConfiguration>> {
        let mut matched = Vec::new();
        for config in self.configurations.values() {
            if config.matches(observed)? {
                matched.push(config);
            }
        }
        Ok(matched)
    }

    /// Returns the configuration registered under `name`.
    pub fn get(&self, name: &str) -> Option<&ResourceConfiguration> {
        self.configurations.get(name)
    }

    /// Returns a mutable reference to the configuration under `name`.
    ///
    /// Use it to add or remove metrics in place; the name must not change.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResourceConfiguration> {
        self.configurations.get_mut(name)
    }

    /// Returns the declared TTL in seconds.
    pub fn dataframe_ttl(&self) -> u64 {
        self.dataframe_ttl
    }

    /// Sets the declared TTL in seconds.
    pub fn set_dataframe_ttl(&mut self, seconds: u64) {
        self.dataframe_ttl = seconds;
    }

    /// Iterates over the configurations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceConfiguration> {
        self.configurations.values()
    }

    /// Iterates over the configuration names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }

    /// Returns the number of configurations.
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// Returns `true` if no configuration is registered.
    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

impl Default for BridgeConfigurationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TidepoolError;
    use crate::predicate::Comparison;
    use crate::rule::MatchRule;

    fn service(name: &str, service: &str) -> ResourceConfiguration {
        ResourceConfiguration::new(
            name,
            vec![MatchRule::new("service.name", Comparison::Eq, service)],
        )
    }

    fn observed(service: &str) -> Vec<(String, AttrValue)> {
        vec![("service.name".to_string(), AttrValue::from(service))]
    }

    #[test]
    fn test_upsert_replaces_wholesale() {
        let mut registry = BridgeConfigurationRegistry::new();

        assert!(registry.set(service("rc", "scaphandre").with_metric("a")).is_none());
        let previous = registry.set(service("rc", "kepler").with_metric("b"));

        assert_eq!(previous.map(|rc| rc.metric_names().len()), Some(1));
        assert_eq!(registry.len(), 1);

        let rc = registry.get("rc").unwrap();
        assert!(rc.has_metric("b"));
        assert!(!rc.has_metric("a"));
        assert_eq!(rc.rules()[0].expected(), &AttrValue::from("kepler"));
    }

    #[test]
    fn test_upsert_keeps_position() {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set(service("first", "a"));
        registry.set(service("second", "b"));
        registry.set(service("first", "c"));

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn test_remove() {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set(service("a", "x"));
        registry.set(service("b", "x"));
        registry.set(service("c", "x"));

        let removed = registry.remove("b").unwrap();
        assert_eq!(removed.name(), "b");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "c"]);

        match registry.remove("b") {
            Err(TidepoolError::Registry(RegistryError::ConfigurationNotFound { name })) => {
                assert_eq!(name, "b");
            }
            other => panic!("Expected ConfigurationNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn test_matching_in_insertion_order() {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set(service("zeta", "scaphandre"));
        registry.set(service("kepler", "kepler"));
        registry.set(ResourceConfiguration::new("catch-all", vec![]));
        registry.set(service("alpha", "scaphandre"));

        let names: Vec<_> = registry
            .matching(&observed("scaphandre"))
            .unwrap()
            .into_iter()
            .map(ResourceConfiguration::name)
            .collect();
        assert_eq!(names, vec!["zeta", "catch-all", "alpha"]);

        // Nothing observed: every configuration matches vacuously.
        assert_eq!(registry.matching(&[]).unwrap().len(), 4);
    }

    #[test]
    fn test_matching_propagates_predicate_errors() {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set(ResourceConfiguration::new(
            "big-hosts",
            vec![MatchRule::new("cpu.count", Comparison::Gt, 16i64)],
        ));

        let observed = vec![("cpu.count".to_string(), AttrValue::from("many"))];
        assert!(matches!(
            registry.matching(&observed),
            Err(TidepoolError::Predicate(_))
        ));
    }

    #[test]
    fn test_dataframe_ttl_is_stored_only() {
        let mut registry = BridgeConfigurationRegistry::new();
        assert_eq!(registry.dataframe_ttl(), DEFAULT_DATAFRAME_TTL);

        registry.set_dataframe_ttl(300);
        assert_eq!(registry.dataframe_ttl(), 300);
    }

    #[test]
    fn test_get_mut_edits_metrics_in_place() {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set(service("rc", "scaphandre"));

        registry.get_mut("rc").unwrap().add_metric("scaph_host_load_avg_one");
        assert!(registry.get("rc").unwrap().has_metric("scaph_host_load_avg_one"));
    }
}
