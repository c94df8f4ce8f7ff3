//! Row and table types held by a sliding window.
//!
//! A [`Row`] is one timestamped sample of several metrics. A [`Table`] is an
//! immutable, timestamp-ordered run of rows. Windows publish tables behind an
//! `Arc`, so a table a reader holds never changes underneath it; each append
//! produces a fresh table instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One timestamped sample: metric name to value.
///
/// Metric names are kept in a `BTreeMap` so iteration order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Timestamp in nanoseconds since the Unix epoch.
    timestamp_ns: u64,
    /// Metric values keyed by metric name.
    metrics: BTreeMap<String, f64>,
}

impl Row {
    /// Creates a row with no metrics.
    pub fn new(timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style variant of [`Row::insert`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidepool::Row;
    ///
    /// let row = Row::new(1_700_000_000_000_000_000)
    ///     .with_metric("scaph_host_load_avg_one", 0.42);
    /// assert_eq!(row.get("scaph_host_load_avg_one"), Some(0.42));
    /// ```
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a metric value, replacing any previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
    }

    /// Returns the value recorded for `name`, if any.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Returns the row timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Returns all metrics in name order.
    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Returns `true` if the row carries no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Returns a copy of this row holding only the metrics `keep` accepts.
    pub(crate) fn filtered(&self, mut keep: impl FnMut(&str) -> bool) -> Self {
        Self {
            timestamp_ns: self.timestamp_ns,
            metrics: self
                .metrics
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
        }
    }
}

/// An immutable run of rows ordered by ascending timestamp.
///
/// Equal timestamps are allowed and kept in insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    /// Wraps rows that the caller has already verified to be ordered.
    pub(crate) fn from_ordered(rows: Vec<Row>) -> Self {
        debug_assert!(
            rows.windows(2)
                .all(|w| w[0].timestamp_ns <= w[1].timestamp_ns)
        );
        Self { rows }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the rows, oldest first.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the oldest timestamp in the table.
    pub fn first_timestamp(&self) -> Option<u64> {
        self.rows.first().map(Row::timestamp_ns)
    }

    /// Returns the newest timestamp in the table.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.rows.last().map(Row::timestamp_ns)
    }

    /// Iterates over the row timestamps, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.iter().map(Row::timestamp_ns)
    }

    /// Iterates over `(timestamp, value)` for every row that carries `metric`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidepool::{Row, SlidingWindow};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let window = SlidingWindow::new(10)?;
    /// window.append(vec![
    ///     Row::new(1).with_metric("power", 10.0),
    ///     Row::new(2).with_metric("load", 0.5),
    ///     Row::new(3).with_metric("power", 12.0),
    /// ])?;
    ///
    /// let table = window.snapshot().expect("appended");
    /// let power: Vec<_> = table.column("power").collect();
    /// assert_eq!(power, vec![(1, 10.0), (3, 12.0)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn column<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = (u64, f64)> + 'a {
        self.rows
            .iter()
            .filter_map(move |row| row.get(metric).map(|value| (row.timestamp_ns, value)))
    }

    /// Returns every metric name present in at least one row.
    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.metrics.keys().map(String::as_str))
            .collect()
    }

    /// Compares this table with an earlier snapshot of the same window.
    ///
    /// Timestamps are compared as sets, so duplicate timestamps count once.
    pub fn diff(&self, previous: &Table) -> WindowDiff {
        let current: BTreeSet<u64> = self.timestamps().collect();
        let before: BTreeSet<u64> = previous.timestamps().collect();

        WindowDiff {
            added: current.difference(&before).copied().collect(),
            removed: before.difference(&current).copied().collect(),
        }
    }
}

/// Timestamps that entered and left a window between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowDiff {
    /// Timestamps present now but not before, ascending.
    pub added: Vec<u64>,
    /// Timestamps present before but evicted since, ascending.
    pub removed: Vec<u64>,
}

impl WindowDiff {
    /// Returns `true` if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
