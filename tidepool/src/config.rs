//! Configuration types and the JSON registry document.
//!
//! A registry document describes a complete [`BridgeConfigurationRegistry`]
//! plus the window capacity used for each configuration:
//!
//! ```json
//! {
//!   "dataframe_ttl": 60,
//!   "window": { "max_rows": 300 },
//!   "resources": [
//!     {
//!       "name": "scaphandre-metrics",
//!       "rules": [ { "key": "service.name", "op": "eq", "value": "scaphandre" } ],
//!       "metrics": ["scaph_host_power_microwatts", "scaph_host_load_avg_one"]
//!     }
//!   ]
//! }
//! ```
//!
//! Predicates are referenced by name (`op`) and resolved through a
//! [`PredicateSet`], so custom predicates work as long as they are registered
//! before the document is turned into a registry.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::predicate::{AttrValue, PredicateSet};
use crate::registry::{BridgeConfigurationRegistry, DEFAULT_DATAFRAME_TTL};
use crate::resource::ResourceConfiguration;
use crate::rule::MatchRule;

/// Default window capacity.
///
/// Enough history for five minutes of prediction input at a three-second
/// scrape interval.
pub const DEFAULT_MAX_ROWS: usize = 300;

/// Sizing of the sliding windows created for each configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Maximum number of rows kept per window.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

fn default_dataframe_ttl() -> u64 {
    DEFAULT_DATAFRAME_TTL
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// Serialized form of a [`MatchRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    /// Attribute key the rule tests.
    pub key: String,
    /// Predicate name, e.g. `eq` or `ge`.
    pub op: String,
    /// Expected value.
    pub value: AttrValue,
}

/// Serialized form of a [`ResourceConfiguration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    /// Configuration name, unique within a registry.
    pub name: String,
    /// Rules, evaluated in order.
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
    /// Subscribed metric names.
    #[serde(default)]
    pub metrics: Vec<String>,
}

/// Serialized form of a whole registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Declared time-to-live in seconds.
    #[serde(default = "default_dataframe_ttl")]
    pub dataframe_ttl: u64,
    /// Window sizing.
    #[serde(default)]
    pub window: WindowConfig,
    /// Resource configurations, in registry order.
    #[serde(default)]
    pub resources: Vec<ResourceDocument>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            dataframe_ttl: DEFAULT_DATAFRAME_TTL,
            window: WindowConfig::default(),
            resources: Vec::new(),
        }
    }
}

impl RegistryDocument {
    /// Reads and validates a document from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not a valid document
    /// - [`ConfigError::Invalid`] if a value is unusable
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        json.parse()
    }

    /// Writes the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] or [`ConfigError::Write`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize { source: e })?;
        fs::write(path, json).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Checks values that parse but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on a zero window capacity or an empty
    /// configuration name.
    pub fn validate(&self) -> Result<()> {
        if self.window.max_rows == 0 {
            return Err(ConfigError::Invalid {
                reason: "window.max_rows must be > 0".to_string(),
            }
            .into());
        }

        if let Some(index) = self.resources.iter().position(|rc| rc.name.is_empty()) {
            return Err(ConfigError::Invalid {
                reason: format!("resources[{index}] has an empty name"),
            }
            .into());
        }

        Ok(())
    }

    /// Builds a registry, resolving predicate names through `predicates`.
    ///
    /// Configurations sharing a name are upserted in document order, so the
    /// last one wins.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::UnknownPredicate`](crate::PredicateError::UnknownPredicate)
    /// if a rule names a predicate the set does not know.
    pub fn to_registry(&self, predicates: &PredicateSet) -> Result<BridgeConfigurationRegistry> {
        let mut registry = BridgeConfigurationRegistry::new();
        registry.set_dataframe_ttl(self.dataframe_ttl);

        for resource in &self.resources {
            let mut rules = Vec::with_capacity(resource.rules.len());
            for rule in &resource.rules {
                let predicate = predicates.resolve(&rule.op)?;
                rules.push(MatchRule::with_predicate(
                    rule.key.clone(),
                    predicate,
                    rule.value.clone(),
                ));
            }

            let mut config = ResourceConfiguration::new(resource.name.clone(), rules);
            for metric in &resource.metrics {
                config.add_metric(metric.clone());
            }
            registry.set(config);
        }

        Ok(registry)
    }

    /// Captures a registry (and window sizing) as a document.
    pub fn from_registry(registry: &BridgeConfigurationRegistry, window: WindowConfig) -> Self {
        let resources = registry
            .iter()
            .map(|config| ResourceDocument {
                name: config.name().to_string(),
                rules: config
                    .rules()
                    .iter()
                    .map(|rule| RuleDocument {
                        key: rule.key().to_string(),
                        op: rule.predicate_name().to_string(),
                        value: rule.expected().clone(),
                    })
                    .collect(),
                metrics: config.metric_names().iter().cloned().collect(),
            })
            .collect();

        Self {
            dataframe_ttl: registry.dataframe_ttl(),
            window,
            resources,
        }
    }
}

impl FromStr for RegistryDocument {
    type Err = crate::error::TidepoolError;

    fn from_str(json: &str) -> Result<Self> {
        let document: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse { source: e })?;
        document.validate()?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PredicateError, TidepoolError};
    use crate::predicate::Comparison;

    const SCAPHANDRE: &str = r#"{
        "dataframe_ttl": 90,
        "window": { "max_rows": 120 },
        "resources": [
            {
                "name": "scaphandre-metrics",
                "rules": [ { "key": "service.name", "op": "eq", "value": "scaphandre" } ],
                "metrics": ["scaph_host_power_microwatts", "scaph_host_load_avg_one"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let document: RegistryDocument = SCAPHANDRE.parse().unwrap();

        assert_eq!(document.dataframe_ttl, 90);
        assert_eq!(document.window.max_rows, 120);
        assert_eq!(document.resources.len(), 1);
        assert_eq!(document.resources[0].rules[0].op, "eq");
    }

    #[test]
    fn test_defaults_apply() {
        let document: RegistryDocument = "{}".parse().unwrap();
        assert_eq!(document, RegistryDocument::default());
        assert_eq!(document.window.max_rows, DEFAULT_MAX_ROWS);
        assert_eq!(document.dataframe_ttl, DEFAULT_DATAFRAME_TTL);
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            "{ not json".parse::<RegistryDocument>(),
            Err(TidepoolError::Config(ConfigError::Parse { .. }))
        ));
        assert!(matches!(
            r#"{ "window": { "max_rows": 0 } }"#.parse::<RegistryDocument>(),
            Err(TidepoolError::Config(ConfigError::Invalid { .. }))
        ));
        assert!(matches!(
            r#"{ "resources": [ { "name": "" } ] }"#.parse::<RegistryDocument>(),
            Err(TidepoolError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_to_registry() {
        let document: RegistryDocument = SCAPHANDRE.parse().unwrap();
        let registry = document.to_registry(&PredicateSet::new()).unwrap();

        assert_eq!(registry.dataframe_ttl(), 90);
        let rc = registry.get("scaphandre-metrics").unwrap();
        assert_eq!(
            rc.rules()[0],
            MatchRule::new("service.name", Comparison::Eq, "scaphandre")
        );
        assert_eq!(rc.metric_names().len(), 2);
    }

    #[test]
    fn test_unknown_predicate_is_rejected() {
        let document: RegistryDocument = r#"{
            "resources": [ { "name": "rc", "rules": [ { "key": "k", "op": "regex", "value": ".*" } ] } ]
        }"#
        .parse()
        .unwrap();

        assert!(matches!(
            document.to_registry(&PredicateSet::new()),
            Err(TidepoolError::Predicate(PredicateError::UnknownPredicate { .. }))
        ));
    }

    #[test]
    fn test_duplicate_names_last_wins() {
        let document: RegistryDocument = r#"{
            "resources": [
                { "name": "rc", "metrics": ["a"] },
                { "name": "rc", "metrics": ["b"] }
            ]
        }"#
        .parse()
        .unwrap();

        let registry = document.to_registry(&PredicateSet::new()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("rc").unwrap().has_metric("b"));
    }

    #[test]
    fn test_registry_document_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let document: RegistryDocument = SCAPHANDRE.parse().unwrap();
        let registry = document.to_registry(&PredicateSet::new()).unwrap();
        RegistryDocument::from_registry(&registry, document.window)
            .save(&path)
            .unwrap();

        let reloaded = RegistryDocument::load(&path).unwrap();
        assert_eq!(
            reloaded.to_registry(&PredicateSet::new()).unwrap(),
            registry
        );
        assert_eq!(reloaded.window, document.window);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RegistryDocument::load(dir.path().join("absent.json")),
            Err(TidepoolError::Config(ConfigError::Read { .. }))
        ));
    }
}
