//! Capacity-bounded sliding window with broadcast wake-up.
//!
//! A [`SlidingWindow`] keeps the most recent `max_rows` rows of one monitored
//! resource. A single producer appends batches; any number of consumers read
//! snapshots or block until the next append.
//!
//! # Design
//!
//! - The current table and the waiter set share one `parking_lot::Mutex`, so
//!   append's concatenate, evict and release steps are never interleaved with
//!   a registration or another append.
//! - Every append builds a new [`Table`] and swaps the `Arc`; readers holding an
//!   older snapshot keep an unchanging view.
//! - Each waiter owns a slot in the waiter set. An append fills every empty
//!   slot with the table it produced and then wakes all waiters on the shared
//!   condvar, so every waiter registered before that append receives the same
//!   `Arc<Table>`, however late it gets scheduled.
//! - Waits can be bounded by a timeout, and [`SlidingWindow::close`] releases
//!   everybody, so a stalled producer cannot hang a consumer forever.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! use tidepool::{Row, SlidingWindow};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let window = Arc::new(SlidingWindow::new(300)?);
//!
//! // Register before spawning the producer so the first batch is not missed.
//! let waiter = window.subscribe();
//!
//! let producer = Arc::clone(&window);
//! let handle = thread::spawn(move || {
//!     producer.append(vec![Row::new(1).with_metric("scaph_host_load_avg_one", 0.3)])
//! });
//!
//! let table = waiter.wait_timeout(Duration::from_secs(5))?;
//! assert_eq!(table.len(), 1);
//! handle.join().expect("producer panicked")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::WindowConfig;
use crate::error::{Result, WindowError};
use crate::table::{Row, Table};

/// A fixed-capacity, time-ordered window of rows.
///
/// # Thread Safety
///
/// `SlidingWindow` is `Send + Sync`; share it behind an `Arc`. All methods take
/// `&self`.
#[derive(Debug)]
pub struct SlidingWindow {
    /// Maximum number of rows retained.
    max_rows: usize,
    /// Table, waiter slots and lifecycle flags.
    state: Mutex<WindowState>,
    /// Signalled after an append released waiters, and on close.
    updated: Condvar,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Current table, `None` until the first append.
    table: Option<Arc<Table>>,
    /// Number of successful appends.
    generation: u64,
    /// Set once by `close()`.
    closed: bool,
    /// Id handed to the next waiter.
    next_waiter_id: u64,
    /// Waiter slots: `None` while waiting, `Some` once released by an append.
    waiters: HashMap<u64, Option<Arc<Table>>>,
}

impl WindowState {
    /// Takes the outcome for waiter `id` if it has one, deregistering it.
    fn take_outcome(&mut self, id: u64) -> Option<std::result::Result<Arc<Table>, WindowError>> {
        if let Some(Some(table)) = self.waiters.get(&id) {
            let table = Arc::clone(table);
            self.waiters.remove(&id);
            return Some(Ok(table));
        }

        if self.closed {
            self.waiters.remove(&id);
            return Some(Err(WindowError::Closed));
        }

        None
    }
}

impl SlidingWindow {
    /// Creates an empty window that keeps at most `max_rows` rows.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::InvalidCapacity`] if `max_rows` is zero.
    pub fn new(max_rows: usize) -> Result<Self> {
        if max_rows == 0 {
            return Err(WindowError::InvalidCapacity { max_rows }.into());
        }

        Ok(Self {
            max_rows,
            state: Mutex::new(WindowState::default()),
            updated: Condvar::new(),
        })
    }

    /// Creates an empty window from a [`WindowConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::InvalidCapacity`] if the configured capacity is zero.
    pub fn from_config(config: &WindowConfig) -> Result<Self> {
        Self::new(config.max_rows)
    }

    /// Appends a batch of rows and releases every registered waiter.
    ///
    /// The batch is concatenated after the current rows; if the result holds
    /// more than `max_rows` rows, the oldest are evicted. Rows with equal
    /// timestamps are all kept, in insertion order.
    ///
    /// # Errors
    ///
    /// - [`WindowError::EmptyBatch`] if `rows` is empty
    /// - [`WindowError::OutOfOrder`] if a timestamp in the batch decreases, or
    ///   the first one precedes the newest row already in the window
    /// - [`WindowError::Closed`] if the window has been closed
    ///
    /// On error the window is left exactly as it was.
    pub fn append(&self, rows: Vec<Row>) -> Result<()> {
        let Some(first_ns) = rows.first().map(Row::timestamp_ns) else {
            return Err(WindowError::EmptyBatch.into());
        };

        if let Some(pair) = rows
            .windows(2)
            .find(|pair| pair[1].timestamp_ns() < pair[0].timestamp_ns())
        {
            return Err(WindowError::OutOfOrder {
                previous_ns: pair[0].timestamp_ns(),
                timestamp_ns: pair[1].timestamp_ns(),
            }
            .into());
        }

        let incoming = rows.len();
        let mut state = self.state.lock();

        if state.closed {
            return Err(WindowError::Closed.into());
        }

        if let Some(last_ns) = state.table.as_ref().and_then(|table| table.last_timestamp())
            && first_ns < last_ns
        {
            return Err(WindowError::OutOfOrder {
                previous_ns: last_ns,
                timestamp_ns: first_ns,
            }
            .into());
        }

        let (table, evicted) = {
            let existing = state.table.as_deref().map_or(&[][..], Table::rows);
            let total = existing.len() + incoming;
            let evicted = total.saturating_sub(self.max_rows);

            let mut merged = Vec::with_capacity(total - evicted);
            merged.extend(existing.iter().skip(evicted).cloned());
            merged.extend(rows.into_iter().skip(evicted.saturating_sub(existing.len())));

            (Arc::new(Table::from_ordered(merged)), evicted)
        };

        state.table = Some(Arc::clone(&table));
        state.generation += 1;

        let mut released = 0usize;
        for slot in state.waiters.values_mut().filter(|slot| slot.is_none()) {
            *slot = Some(Arc::clone(&table));
            released += 1;
        }
        let generation = state.generation;
        drop(state);

        if released > 0 {
            self.updated.notify_all();
        }

        debug!(
            generation,
            appended = incoming,
            evicted,
            rows = table.len(),
            released,
            "window updated"
        );

        Ok(())
    }

    /// Returns the current table, or `None` if nothing was ever appended.
    ///
    /// Never blocks on producers; the returned table is never modified.
    pub fn snapshot(&self) -> Option<Arc<Table>> {
        self.state.lock().table.clone()
    }

    /// Registers a waiter that will be released by the next append.
    ///
    /// Subscribing before taking a [`snapshot`](Self::snapshot) guarantees no
    /// append can slip in between the two unnoticed. Dropping the handle
    /// without waiting withdraws the registration.
    pub fn subscribe(&self) -> WaiterHandle<'_> {
        let mut state = self.state.lock();
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state.waiters.insert(id, None);
        trace!(waiter = id, waiters = state.waiters.len(), "waiter registered");

        WaiterHandle {
            window: self,
            id,
            registered: true,
        }
    }

    /// Blocks until the next append and returns the table it produced.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Closed`] if the window is closed before an
    /// append happens. Without a producer and without `close()` this waits
    /// forever; prefer [`await_update_timeout`](Self::await_update_timeout).
    pub fn await_update(&self) -> Result<Arc<Table>> {
        self.subscribe().wait()
    }

    /// Like [`await_update`](Self::await_update), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - [`WindowError::Timeout`] if no append happened in time
    /// - [`WindowError::Closed`] if the window was closed first
    pub fn await_update_timeout(&self, timeout: Duration) -> Result<Arc<Table>> {
        self.subscribe().wait_timeout(timeout)
    }

    /// Closes the window.
    ///
    /// Pending and future waits fail with [`WindowError::Closed`], as do
    /// further appends. Snapshots keep returning the last table. Closing twice
    /// is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let pending = state.waiters.values().filter(|slot| slot.is_none()).count();
        drop(state);

        self.updated.notify_all();
        debug!(pending, "window closed");
    }

    /// Returns the capacity fixed at construction.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Returns the number of rows currently held.
    pub fn len(&self) -> usize {
        self.state.lock().table.as_ref().map_or(0, |table| table.len())
    }

    /// Returns `true` if the window holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of successful appends so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns the number of registered waiters, released or not.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// A registration for the next append on a [`SlidingWindow`].
///
/// Obtained from [`SlidingWindow::subscribe`]. Waiting consumes the handle;
/// dropping it unused withdraws the registration.
#[derive(Debug)]
#[must_use = "a waiter does nothing unless waited on"]
pub struct WaiterHandle<'a> {
    window: &'a SlidingWindow,
    id: u64,
    registered: bool,
}

impl WaiterHandle<'_> {
    /// Blocks until released by an append or by `close()`.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Closed`] if the window closed first.
    pub fn wait(self) -> Result<Arc<Table>> {
        self.wait_until(None, Instant::now())
    }

    /// Blocks for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Timeout`] or [`WindowError::Closed`].
    pub fn wait_timeout(self, timeout: Duration) -> Result<Arc<Table>> {
        let started = Instant::now();
        // A deadline too far out to represent is the same as no deadline.
        self.wait_until(started.checked_add(timeout), started)
    }

    /// Blocks until `deadline` at the latest.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Timeout`] or [`WindowError::Closed`].
    pub fn wait_deadline(self, deadline: Instant) -> Result<Arc<Table>> {
        self.wait_until(Some(deadline), Instant::now())
    }

    fn wait_until(mut self, deadline: Option<Instant>, started: Instant) -> Result<Arc<Table>> {
        let window = self.window;
        let mut state = window.state.lock();

        loop {
            if let Some(outcome) = state.take_outcome(self.id) {
                self.registered = false;
                if outcome.is_ok() {
                    trace!(waiter = self.id, "waiter released");
                }
                return outcome.map_err(Into::into);
            }

            match deadline {
                None => window.updated.wait(&mut state),
                Some(deadline) => {
                    if window.updated.wait_until(&mut state, deadline).timed_out() {
                        // An append may have released us right at the deadline.
                        if let Some(outcome) = state.take_outcome(self.id) {
                            self.registered = false;
                            return outcome.map_err(Into::into);
                        }

                        state.waiters.remove(&self.id);
                        self.registered = false;
                        let waited = started.elapsed();
                        debug!(waiter = self.id, ?waited, "wait timed out");
                        return Err(WindowError::Timeout { waited }.into());
                    }
                }
            }
        }
    }
}

impl Drop for WaiterHandle<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.window.state.lock().waiters.remove(&self.id);
            trace!(waiter = self.id, "waiter withdrawn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TidepoolError;

    fn rows(timestamps: &[u64]) -> Vec<Row> {
        timestamps
            .iter()
            .map(|&ts| Row::new(ts).with_metric("value", 1.0))
            .collect()
    }

    fn timestamps(window: &SlidingWindow) -> Vec<u64> {
        window
            .snapshot()
            .map(|table| table.timestamps().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        match SlidingWindow::new(0) {
            Err(TidepoolError::Window(WindowError::InvalidCapacity { max_rows: 0 })) => {}
            other => panic!("Expected InvalidCapacity, got: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_empty_before_first_append() {
        let window = SlidingWindow::new(3).unwrap();
        assert!(window.snapshot().is_none());
        assert!(window.is_empty());
        assert_eq!(window.generation(), 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let window = SlidingWindow::new(3).unwrap();

        window.append(rows(&[1, 2, 3])).unwrap();
        assert_eq!(timestamps(&window), vec![1, 2, 3]);

        window.append(rows(&[4])).unwrap();
        assert_eq!(timestamps(&window), vec![2, 3, 4]);
        assert_eq!(window.generation(), 2);
    }

    #[test]
    fn test_oversized_batch_keeps_newest_rows() {
        let window = SlidingWindow::new(3).unwrap();
        window.append(rows(&[1])).unwrap();
        window.append(rows(&[2, 3, 4, 5, 6])).unwrap();
        assert_eq!(timestamps(&window), vec![4, 5, 6]);
    }

    #[test]
    fn test_capacity_invariant_over_many_appends() {
        let window = SlidingWindow::new(7).unwrap();
        let mut ts = 0u64;

        for batch in 1..20u64 {
            let batch_rows: Vec<u64> = (0..batch % 5 + 1)
                .map(|_| {
                    ts += 1;
                    ts
                })
                .collect();
            window.append(rows(&batch_rows)).unwrap();

            assert!(window.len() <= window.max_rows());
            assert_eq!(window.snapshot().unwrap().last_timestamp(), Some(ts));
        }
    }

    #[test]
    fn test_duplicate_timestamps_are_kept() {
        let window = SlidingWindow::new(10).unwrap();
        window.append(rows(&[1, 2])).unwrap();
        window
            .append(vec![Row::new(2).with_metric("value", 9.0)])
            .unwrap();

        let table = window.snapshot().unwrap();
        assert_eq!(table.timestamps().collect::<Vec<_>>(), vec![1, 2, 2]);
        assert_eq!(table.rows()[2].get("value"), Some(9.0));
    }

    #[test]
    fn test_rejected_append_leaves_table_untouched() {
        let window = SlidingWindow::new(5).unwrap();
        window.append(rows(&[10, 20])).unwrap();
        let before = window.snapshot().unwrap();

        assert!(matches!(
            window.append(Vec::new()),
            Err(TidepoolError::Window(WindowError::EmptyBatch))
        ));
        assert!(matches!(
            window.append(rows(&[30, 25])),
            Err(TidepoolError::Window(WindowError::OutOfOrder {
                previous_ns: 30,
                timestamp_ns: 25
            }))
        ));
        assert!(matches!(
            window.append(rows(&[15])),
            Err(TidepoolError::Window(WindowError::OutOfOrder {
                previous_ns: 20,
                timestamp_ns: 15
            }))
        ));

        let after = window.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(window.generation(), 1);
    }

    #[test]
    fn test_snapshot_is_never_mutated() {
        let window = SlidingWindow::new(2).unwrap();
        window.append(rows(&[1, 2])).unwrap();
        let old = window.snapshot().unwrap();

        window.append(rows(&[3])).unwrap();

        assert_eq!(old.timestamps().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(timestamps(&window), vec![2, 3]);
    }

    #[test]
    fn test_released_waiter_gets_table_from_releasing_append() {
        let window = SlidingWindow::new(10).unwrap();
        let waiter = window.subscribe();

        window.append(rows(&[1])).unwrap();
        let first = window.snapshot().unwrap();
        window.append(rows(&[2])).unwrap();

        // The waiter was released by the first append, not the second.
        let table = waiter.wait().unwrap();
        assert!(Arc::ptr_eq(&table, &first));
        assert_eq!(window.waiter_count(), 0);
    }

    #[test]
    fn test_timeout_withdraws_waiter() {
        let window = SlidingWindow::new(10).unwrap();

        match window.await_update_timeout(Duration::from_millis(20)) {
            Err(TidepoolError::Window(WindowError::Timeout { waited })) => {
                assert!(waited >= Duration::from_millis(20));
            }
            other => panic!("Expected Timeout, got: {other:?}"),
        }
        assert_eq!(window.waiter_count(), 0);
    }

    #[test]
    fn test_dropped_handle_withdraws() {
        let window = SlidingWindow::new(10).unwrap();
        let waiter = window.subscribe();
        assert_eq!(window.waiter_count(), 1);

        drop(waiter);
        assert_eq!(window.waiter_count(), 0);
    }

    #[test]
    fn test_close_rejects_appends_and_waits() {
        let window = SlidingWindow::new(10).unwrap();
        window.append(rows(&[1])).unwrap();
        window.close();
        window.close();

        assert!(window.is_closed());
        assert!(matches!(
            window.append(rows(&[2])),
            Err(TidepoolError::Window(WindowError::Closed))
        ));
        assert!(matches!(
            window.await_update(),
            Err(TidepoolError::Window(WindowError::Closed))
        ));
        assert_eq!(timestamps(&window), vec![1]);
        assert_eq!(window.waiter_count(), 0);
    }

    #[test]
    fn test_from_config() {
        let window = SlidingWindow::from_config(&WindowConfig { max_rows: 42 }).unwrap();
        assert_eq!(window.max_rows(), 42);
        assert!(SlidingWindow::from_config(&WindowConfig { max_rows: 0 }).is_err());
    }
}
