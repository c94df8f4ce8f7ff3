//! # tidepool
//!
//! In-memory sliding-window store and rule-matching registry for resource
//! metrics.
//!
//! tidepool buffers a continuous stream of timestamped metric rows in
//! fixed-capacity windows and lets any number of consumers block until new
//! data arrives. Alongside the windows it keeps a registry of named resource
//! configurations that decides, from a resource's observed attributes, which
//! metrics that resource should contribute.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bounded memory: each window keeps at most `max_rows` rows, evicting the
//!   oldest first
//! - Readers get immutable `Arc` snapshots; appends never edit a published table
//! - Broadcast wake-up: one append releases every waiting consumer with the
//!   same table
//! - Waits can time out, and windows can be closed to release everyone
//! - Rule matching tolerates partial telemetry: an unobserved key never fails
//!   a match
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tidepool::{
//!     AttrValue, BridgeConfigurationRegistry, Comparison, MatchRule, ResourceConfiguration,
//!     Row, SlidingWindow,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Decide which resources feed which metrics
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
//! assert_eq!(registry.matching(&observed)?.len(), 1);
//!
//! // Keep the last three rows of a resource
//! let window = SlidingWindow::new(3)?;
//! window.append(vec![Row::new(1), Row::new(2), Row::new(3)])?;
//! window.append(vec![Row::new(4)])?;
//!
//! let table = window.snapshot().expect("appended");
//! assert_eq!(table.timestamps().collect::<Vec<_>>(), vec![2, 3, 4]);
//!
//! // Nothing else is coming: the wait gives up instead of hanging
//! assert!(window.await_update_timeout(Duration::from_millis(10)).is_err());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SlidingWindow`] — capacity-bounded table with blocking consumers
//! - [`BridgeConfigurationRegistry`] — named [`ResourceConfiguration`]s with lookup-by-match
//! - [`MatchRule`] / [`Predicate`] — the comparison vocabulary
//! - [`Bridge`] — routes observed resources to one window per resource and configuration
//! - [`RegistryDocument`] — JSON form of a registry
//!
//! ## Modules
//!
//! - [`window`] — Sliding window and waiter handles
//! - [`table`] — Rows, tables and window diffs
//! - [`predicate`] — Attribute values, comparisons, custom predicates
//! - [`rule`] — Match rules
//! - [`resource`] — Resource configurations
//! - [`registry`] — The configuration registry
//! - [`bridge`] — Registry-to-window routing
//! - [`config`] — Window sizing and registry documents
//! - [`error`] — Error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod predicate;
pub mod registry;
pub mod resource;
pub mod rule;
pub mod table;
pub mod window;

// Re-export primary API types at crate root for convenience.
pub use bridge::{Bridge, IngestReport};
pub use config::{RegistryDocument, ResourceDocument, RuleDocument, WindowConfig};
pub use error::{
    ConfigError, PredicateError, RegistryError, Result, TidepoolError, WindowError,
};
pub use predicate::{AttrValue, Comparison, Predicate, PredicateSet};
pub use registry::BridgeConfigurationRegistry;
pub use resource::ResourceConfiguration;
pub use rule::MatchRule;
pub use table::{Row, Table, WindowDiff};
pub use window::{SlidingWindow, WaiterHandle};
