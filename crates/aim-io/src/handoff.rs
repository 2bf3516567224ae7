//! Lock-free handoff of output tables from the compute thread to the audio
//! callback.
//!
//! The compute thread publishes one [`OutputTable`] at a time. Publishing
//! only happens once the callback has taken the previous table, so at most
//! one table waits in the slot and the compute thread stays one buffer ahead
//! of playback. The swap itself is a single atomic pointer exchange.
//!
//! ```text
//! compute:  process -> wait_for_room -> publish(N) -> process -> ...
//! callback:                  take() == N  (wakes compute) -> retire(N)
//! compute:  reclaim() drops N
//! ```
//!
//! Played tables travel back over a bounded return queue so their memory is
//! freed on the compute thread, not in the audio callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use aim_core::OutputTable;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, bounded};

/// Played tables that can wait for [`TableHandoff::reclaim`].
const RETIRED_CAPACITY: usize = 4;

/// Single-slot table exchange with publish/consume counters.
pub struct TableHandoff {
    slot: ArcSwapOption<OutputTable>,
    published: AtomicU64,
    consumed: AtomicU64,
    closed: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    retired_tx: Sender<Arc<OutputTable>>,
    retired_rx: Receiver<Arc<OutputTable>>,
}

impl std::fmt::Debug for TableHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandoff")
            .field("published", &self.published())
            .field("consumed", &self.consumed())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Default for TableHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl TableHandoff {
    /// Creates an empty, open handoff.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        let (retired_tx, retired_rx) = bounded(RETIRED_CAPACITY);
        Self {
            slot: ArcSwapOption::empty(),
            published: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake_tx,
            wake_rx,
            retired_tx,
            retired_rx,
        }
    }

    /// True when the previous table has been taken.
    pub fn has_room(&self) -> bool {
        self.published.load(Ordering::Acquire) == self.consumed.load(Ordering::Acquire)
    }

    /// Blocks the compute thread until the slot is free or `timeout` passes.
    pub fn wait_for_room(&self, timeout: Duration) -> bool {
        if self.has_room() {
            return true;
        }
        // A wake-up may belong to an earlier take; the counters decide.
        let _ = self.wake_rx.recv_timeout(timeout);
        self.has_room()
    }

    /// Publishes the next table.
    ///
    /// Refuses, returning the table, while the previous one is still waiting
    /// or after [`close`](Self::close).
    pub fn publish(&self, table: OutputTable) -> Result<(), OutputTable> {
        if !self.has_room() || self.is_closed() {
            return Err(table);
        }
        self.slot.store(Some(Arc::new(table)));
        self.published.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Takes the waiting table, if any. Called from the audio callback.
    pub fn take(&self) -> Option<Arc<OutputTable>> {
        let table = self.slot.swap(None)?;
        self.consumed.fetch_add(1, Ordering::AcqRel);
        let _ = self.wake_tx.try_send(());
        Some(table)
    }

    /// Hands a played table back to the compute thread. Called from the
    /// audio callback once the table has been mixed.
    ///
    /// When the return queue is full the table is dropped here instead.
    pub fn retire(&self, table: Arc<OutputTable>) {
        let _ = self.retired_tx.try_send(table);
    }

    /// Frees every retired table, returning how many there were.
    pub fn reclaim(&self) -> usize {
        self.retired_rx.try_iter().count()
    }

    /// Marks the end of the stream: no table will follow the waiting one.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tables published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Tables taken by the callback so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_core::{Content, Signal};

    fn table(value: f32) -> OutputTable {
        let mut t = OutputTable::new();
        t.insert("main".into(), Content::Signal(Signal::constant(4, value)));
        t
    }

    #[test]
    fn publish_waits_for_the_previous_take() {
        let handoff = TableHandoff::new();
        assert!(handoff.publish(table(1.0)).is_ok());
        assert!(handoff.publish(table(2.0)).is_err());

        let first = handoff.take().unwrap();
        assert_eq!(first.signal("main").unwrap().voices.len(), 1);
        assert!(handoff.take().is_none());
        assert!(handoff.wait_for_room(Duration::ZERO));
        assert!(handoff.publish(table(2.0)).is_ok());
        assert_eq!((handoff.published(), handoff.consumed()), (2, 1));
    }

    #[test]
    fn take_wakes_a_waiting_publisher() {
        let handoff = Arc::new(TableHandoff::new());
        handoff.publish(table(1.0)).unwrap();
        let consumer = {
            let handoff = Arc::clone(&handoff);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                handoff.take().is_some()
            })
        };
        assert!(handoff.wait_for_room(Duration::from_secs(5)));
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn retired_tables_are_freed_by_reclaim() {
        let handoff = TableHandoff::new();
        handoff.publish(table(1.0)).unwrap();
        let played = handoff.take().unwrap();
        let watch = Arc::downgrade(&played);
        handoff.retire(played);
        assert!(watch.upgrade().is_some());

        assert_eq!(handoff.reclaim(), 1);
        assert!(watch.upgrade().is_none());
        assert_eq!(handoff.reclaim(), 0);
    }

    #[test]
    fn full_return_queue_drops_in_place() {
        let handoff = TableHandoff::new();
        for _ in 0..RETIRED_CAPACITY {
            handoff.retire(Arc::new(table(0.0)));
        }
        let extra = Arc::new(table(1.0));
        let watch = Arc::downgrade(&extra);
        handoff.retire(extra);
        assert!(watch.upgrade().is_none());
        assert_eq!(handoff.reclaim(), RETIRED_CAPACITY);
    }

    #[test]
    fn closed_handoff_refuses_new_tables() {
        let handoff = TableHandoff::new();
        handoff.close();
        assert!(handoff.is_closed());
        assert!(handoff.publish(table(0.0)).is_err());
    }
}
