/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Engine-wide statistics.

use super::core::EngineState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Sentinel stored in the "last queue" fields before anything was recorded.
const NO_QUEUE: usize = usize::MAX;

/// Global counters, written by the worker threads and the producers'
/// push path, read by [`EngineStats`] snapshots.
#[derive(Debug)]
pub(crate) struct EngineCounters {
    pub(crate) out_of_order: AtomicU64,
    pub(crate) waiting_for_empty_queue: AtomicU64,
    pub(crate) overwait: AtomicU64,
    pub(crate) extractor_sleeps: AtomicU64,
    pub(crate) sorter_sleeps: AtomicU64,
    pub(crate) sort_passes: AtomicU64,
    pub(crate) popped: AtomicU64,
    pub(crate) output_dropped: AtomicU64,
    last_pushed_key: AtomicU64,
    last_pushed_queue: AtomicUsize,
    last_popped_key: AtomicU64,
    last_popped_queue: AtomicUsize,
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self {
            out_of_order: AtomicU64::new(0),
            waiting_for_empty_queue: AtomicU64::new(0),
            overwait: AtomicU64::new(0),
            extractor_sleeps: AtomicU64::new(0),
            sorter_sleeps: AtomicU64::new(0),
            sort_passes: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            output_dropped: AtomicU64::new(0),
            last_pushed_key: AtomicU64::new(0),
            last_pushed_queue: AtomicUsize::new(NO_QUEUE),
            last_popped_key: AtomicU64::new(0),
            last_popped_queue: AtomicUsize::new(NO_QUEUE),
        }
    }
}

impl EngineCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a push to a producer queue. The key never moves backwards.
    pub(crate) fn record_push(&self, index: usize, key: u64) {
        if self.last_pushed_key.fetch_max(key, Ordering::Relaxed) <= key {
            self.last_pushed_queue.store(index, Ordering::Relaxed);
        }
    }

    /// Records the key of a dispatched normed element. Returns `true` if it
    /// is below the highest key dispatched so far.
    pub(crate) fn record_pop(&self, index: usize, key: u64) -> bool {
        let highest = self.last_popped_key.fetch_max(key, Ordering::Relaxed);
        if key >= highest {
            self.last_popped_queue.store(index, Ordering::Relaxed);
        }
        let out_of_order = key < highest;
        if out_of_order {
            Self::bump(&self.out_of_order);
        }
        out_of_order
    }

    #[inline]
    pub(crate) fn last_popped_key(&self) -> u64 {
        self.last_popped_key.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(
        &self,
        state: EngineState,
        input_dropped: u64,
        active_queues: usize,
    ) -> EngineStats {
        let queue = |raw: usize| (raw != NO_QUEUE).then_some(raw);
        EngineStats {
            state,
            active_queues,
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            waiting_for_empty_queue: self.waiting_for_empty_queue.load(Ordering::Relaxed),
            overwait: self.overwait.load(Ordering::Relaxed),
            extractor_sleeps: self.extractor_sleeps.load(Ordering::Relaxed),
            sorter_sleeps: self.sorter_sleeps.load(Ordering::Relaxed),
            sort_passes: self.sort_passes.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            output_dropped: self.output_dropped.load(Ordering::Relaxed),
            input_dropped,
            last_pushed_key: self.last_pushed_key.load(Ordering::Relaxed),
            last_pushed_queue: queue(self.last_pushed_queue.load(Ordering::Relaxed)),
            last_popped_key: self.last_popped_key.load(Ordering::Relaxed),
            last_popped_queue: queue(self.last_popped_queue.load(Ordering::Relaxed)),
        }
    }
}

/// Copy of the engine statistics.
///
/// Every field is read independently with a relaxed load and no lock is
/// taken, so while the engine runs two fields (say `popped` and
/// `last_popped_key`) may reflect slightly different instants. Once
/// [`Sequencer::shutdown`](super::Sequencer::shutdown) has returned the
/// counters no longer move and a snapshot is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Lifecycle state at snapshot time.
    pub state: EngineState,
    /// Allocated queues currently marked active.
    pub active_queues: usize,
    /// Normed elements dispatched with a key below an earlier one.
    pub out_of_order: u64,
    /// Extractor cycles that held back the minimum for an empty queue.
    pub waiting_for_empty_queue: u64,
    /// Extractions made while an active queue was still empty.
    pub overwait: u64,
    /// Idle or budget sleeps taken by the extractor.
    pub extractor_sleeps: u64,
    /// Idle sleeps taken by the sorter.
    pub sorter_sleeps: u64,
    /// Partial or full sorts that published elements.
    pub sort_passes: u64,
    /// Elements handed to the dispatch callback.
    pub popped: u64,
    /// Elements discarded at extraction (instant drop).
    pub output_dropped: u64,
    /// Elements refused at push time, summed over all queues.
    pub input_dropped: u64,
    /// Highest key pushed to a producer queue.
    pub last_pushed_key: u64,
    /// Queue that received `last_pushed_key`.
    pub last_pushed_queue: Option<usize>,
    /// Highest normed key dispatched.
    pub last_popped_key: u64,
    /// Queue that delivered `last_popped_key`.
    pub last_popped_queue: Option<usize>,
}

impl EngineStats {
    /// Serializes the snapshot for an external status renderer.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
