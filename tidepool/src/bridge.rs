//! Glue between the configuration registry and per-resource windows.
//!
//! The ingestion side observes a resource, asks the registry which
//! configurations apply, narrows each row batch to the metrics a
//! configuration subscribes to, and appends the result to the window kept for
//! that resource under that configuration. [`Bridge`] does exactly that and
//! nothing more: it owns no transport, no scraper and no persistence.
//!
//! Windows are keyed by `(resource, configuration)`. Two hosts matching the
//! same configuration never share a window, so their clocks never have to
//! agree.
//!
//! # Example
//!
//! ```rust
//! use tidepool::{
//!     AttrValue, Bridge, BridgeConfigurationRegistry, Comparison, MatchRule,
//!     ResourceConfiguration, Row, WindowConfig,
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
//! let bridge = Bridge::new(registry, WindowConfig { max_rows: 100 });
//! let observed = [("service.name".to_string(), AttrValue::from("scaphandre"))];
//! let rows = vec![
//!     Row::new(1)
//!         .with_metric("scaph_host_power_microwatts", 12_000_000.0)
//!         .with_metric("unrelated", 1.0),
//! ];
//!
//! let report = bridge.ingest("edge-1", &observed, &rows)?;
//! assert!(report.is_complete());
//! assert_eq!(report.updated, vec!["scaphandre-metrics".to_string()]);
//!
//! let window = bridge
//!     .window("edge-1", "scaphandre-metrics")
//!     .expect("created on ingest");
//! let table = window.snapshot().expect("appended");
//! assert_eq!(table.rows()[0].metrics().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, trace, warn};

use crate::config::WindowConfig;
use crate::error::{Result, TidepoolError};
use crate::predicate::AttrValue;
use crate::registry::BridgeConfigurationRegistry;
use crate::table::Row;
use crate::window::SlidingWindow;

/// Windows of one resource, by configuration name.
type ResourceWindows = HashMap<String, Arc<SlidingWindow>>;

/// Outcome of one [`Bridge::ingest`] call.
///
/// Every matching configuration is attempted; a failed append for one
/// configuration does not keep the others from receiving data.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Configurations whose window received rows, in registry order.
    pub updated: Vec<String>,
    /// Configurations whose append failed, with the reason, in registry order.
    pub failed: Vec<(String, TidepoolError)>,
}

impl IngestReport {
    /// Returns `true` if no configuration failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes observed resources to one sliding window per resource and matching
/// configuration.
///
/// # Thread Safety
///
/// `Bridge` is `Send + Sync`. Registry updates take a write lock; ingestion
/// and lookups take read locks. Windows are shared as `Arc<SlidingWindow>`, so
/// consumers can wait on them without holding any bridge lock.
#[derive(Debug)]
pub struct Bridge {
    /// Configurations deciding where data goes.
    registry: RwLock<BridgeConfigurationRegistry>,
    /// Sizing for windows created on first ingest.
    window_config: WindowConfig,
    /// Resource id -> configuration name -> window, created lazily.
    windows: RwLock<HashMap<String, ResourceWindows>>,
}

impl Bridge {
    /// Creates a bridge with no windows yet.
    pub fn new(registry: BridgeConfigurationRegistry, window_config: WindowConfig) -> Self {
        Self {
            registry: RwLock::new(registry),
            window_config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Appends `rows` observed on `resource` to that resource's window of
    /// every configuration matching `observed`.
    ///
    /// Each configuration receives only the metrics it subscribes to; rows
    /// left without any metric are dropped, and a configuration left with no
    /// rows is skipped. Appends that fail (out-of-order rows, a closed window)
    /// are collected in [`IngestReport::failed`] and do not stop the
    /// remaining configurations.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError`](crate::PredicateError) if a rule cannot
    /// evaluate an observed value; nothing is appended in that case.
    pub fn ingest(
        &self,
        resource: &str,
        observed: &[(String, AttrValue)],
        rows: &[Row],
    ) -> Result<IngestReport> {
        let batches: Vec<(String, Vec<Row>)> = {
            let registry = self.registry.read();
            registry
                .matching(observed)?
                .into_iter()
                .map(|config| {
                    let selected: Vec<Row> = rows
                        .iter()
                        .map(|row| config.select_metrics(row))
                        .filter(|row| !row.is_empty())
                        .collect();
                    (config.name().to_string(), selected)
                })
                .filter(|(_, selected)| !selected.is_empty())
                .collect()
        };

        let mut report = IngestReport::default();
        for (name, selected) in batches {
            trace!(resource, configuration = %name, rows = selected.len(), "routing batch");
            let appended = self
                .window_or_create(resource, &name)
                .and_then(|window| window.append(selected));

            match appended {
                Ok(()) => report.updated.push(name),
                Err(e) => {
                    warn!(resource, configuration = %name, error = %e, "append rejected");
                    report.failed.push((name, e));
                }
            }
        }

        debug!(
            resource,
            updated = report.updated.len(),
            failed = report.failed.len(),
            rows = rows.len(),
            "ingested batch"
        );
        Ok(report)
    }

    /// Returns the window of `resource` under `configuration`, if data was
    /// ever routed there.
    pub fn window(&self, resource: &str, configuration: &str) -> Option<Arc<SlidingWindow>> {
        self.windows
            .read()
            .get(resource)
            .and_then(|windows| windows.get(configuration))
            .cloned()
    }

    /// Returns the window of `resource` under `configuration`, creating it if
    /// needed.
    ///
    /// Consumers can call this before any data arrives and start waiting.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::InvalidCapacity`](crate::WindowError::InvalidCapacity)
    /// if the bridge was built with a zero capacity.
    pub fn window_or_create(
        &self,
        resource: &str,
        configuration: &str,
    ) -> Result<Arc<SlidingWindow>> {
        if let Some(window) = self.window(resource, configuration) {
            return Ok(window);
        }

        let mut windows = self.windows.write();
        let per_resource = windows.entry(resource.to_string()).or_default();
        if let Some(window) = per_resource.get(configuration) {
            return Ok(Arc::clone(window));
        }

        let window = Arc::new(SlidingWindow::from_config(&self.window_config)?);
        per_resource.insert(configuration.to_string(), Arc::clone(&window));
        debug!(resource, configuration, max_rows = window.max_rows(), "window created");
        Ok(window)
    }

    /// Returns the configuration names `resource` has windows for, sorted.
    pub fn configurations_of(&self, resource: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .windows
            .read()
            .get(resource)
            .map(|windows| windows.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Returns the resources that have at least one window, sorted.
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .windows
            .read()
            .iter()
            .filter(|(_, windows)| !windows.is_empty())
            .map(|(resource, _)| resource.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the total number of windows across all resources.
    pub fn window_count(&self) -> usize {
        self.windows.read().values().map(HashMap::len).sum()
    }

    /// Closes and drops every window of `resource`, returning how many there
    /// were.
    ///
    /// Consumers still holding one of those windows are released with
    /// [`WindowError::Closed`](crate::WindowError::Closed). A later ingest for
    /// the same resource starts over with fresh windows.
    pub fn forget_resource(&self, resource: &str) -> usize {
        let Some(windows) = self.windows.write().remove(resource) else {
            return 0;
        };
        for window in windows.values() {
            window.close();
        }
        debug!(resource, windows = windows.len(), "resource forgotten");
        windows.len()
    }

    /// Returns a read guard on the registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, BridgeConfigurationRegistry> {
        self.registry.read()
    }

    /// Runs `update` with exclusive access to the registry.
    ///
    /// Windows of removed configurations are left in place; tearing them down
    /// is up to the caller.
    pub fn update_registry<T>(&self, update: impl FnOnce(&mut BridgeConfigurationRegistry) -> T) -> T {
        update(&mut self.registry.write())
    }

    /// Returns the window sizing used for new windows.
    pub fn window_config(&self) -> WindowConfig {
        self.window_config
    }

    /// Closes every window, releasing all waiting consumers.
    pub fn close(&self) {
        for window in self.windows.read().values().flat_map(HashMap::values) {
            window.close();
        }
    }
}
