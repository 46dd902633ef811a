/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Per-queue bookkeeping.
//!
//! A [`RegistryEntry`] is created with its queue slot and lives as long as
//! the engine. The owning producer updates the push-side fields, the
//! extractor updates the activity flag and the pop-side fields. All fields
//! are atomics so a diagnostics reader can take a [`QueueStats`] snapshot
//! at any time.

use super::element::Category;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Role of a queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueKind {
    /// Plain FIFO producer queue.
    Normal,
    /// Producer queue kept approximately ordered by the sorter.
    Sorted,
    /// One of the two reserved queues (time pulses, periodic timers).
    Event,
}

/// Live bookkeeping for one queue.
#[derive(Debug)]
pub(crate) struct RegistryEntry {
    kind: QueueKind,
    capacity: usize,
    owning_thread_id: usize,
    active: AtomicBool,
    pushing: AtomicBool,
    last_pushed_key: AtomicU64,
    last_pushed_category: AtomicU8,
    last_popped_key: AtomicU64,
    last_popped_category: AtomicU8,
    pushed: AtomicU64,
    popped: AtomicU64,
    input_dropped: AtomicU64,
    out_of_order: AtomicU64,
}

impl RegistryEntry {
    pub(crate) fn new(kind: QueueKind, capacity: usize, owning_thread_id: usize) -> Self {
        Self {
            kind,
            capacity,
            owning_thread_id,
            active: AtomicBool::new(true),
            pushing: AtomicBool::new(false),
            last_pushed_key: AtomicU64::new(0),
            last_pushed_category: AtomicU8::new(Category::Undefined.as_u8()),
            last_popped_key: AtomicU64::new(0),
            last_popped_category: AtomicU8::new(Category::Undefined.as_u8()),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            input_dropped: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Sets the activity flag, returning the previous value.
    ///
    /// A swap that reads the producer's `true` also sees the element the
    /// producer pushed before setting it.
    #[inline]
    pub(crate) fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel)
    }

    /// Marks a push as started. Paired with the engine state check so that
    /// shutdown can wait for pushes that were admitted before it.
    #[inline]
    pub(crate) fn begin_push(&self) {
        self.pushing.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn end_push(&self) {
        self.pushing.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn push_in_progress(&self) -> bool {
        self.pushing.load(Ordering::SeqCst)
    }

    /// Records an accepted push. The last pushed key never moves backwards.
    pub(crate) fn record_push(&self, key: u64, category: Category) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if self.last_pushed_key.fetch_max(key, Ordering::Relaxed) <= key {
            self.last_pushed_category
                .store(category.as_u8(), Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_input_drop(&self) {
        self.input_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dispatched normed element. Returns `true` if its key is
    /// smaller than the highest key this queue delivered before.
    pub(crate) fn record_pop(&self, key: u64, category: Category) -> bool {
        self.popped.fetch_add(1, Ordering::Relaxed);
        let highest = self.last_popped_key.fetch_max(key, Ordering::Relaxed);
        if key >= highest {
            self.last_popped_category
                .store(category.as_u8(), Ordering::Relaxed);
        }
        let out_of_order = key < highest;
        if out_of_order {
            self.out_of_order.fetch_add(1, Ordering::Relaxed);
        }
        out_of_order
    }

    /// Records an element that left the queue without key bookkeeping
    /// (instant pass or instant drop).
    #[inline]
    pub(crate) fn record_instant_pop(&self) {
        self.popped.fetch_add(1, Ordering::Relaxed);
    }

    /// Highest key this queue ever delivered.
    #[inline]
    pub(crate) fn last_popped_key(&self) -> u64 {
        self.last_popped_key.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn input_dropped(&self) -> u64 {
        self.input_dropped.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of every field.
    pub(crate) fn snapshot(&self, index: usize, used: usize) -> QueueStats {
        QueueStats {
            index,
            kind: self.kind,
            active: self.active.load(Ordering::Relaxed),
            capacity: self.capacity,
            used,
            owning_thread_id: self.owning_thread_id,
            last_pushed_key: self.last_pushed_key.load(Ordering::Relaxed),
            last_pushed_category: Category::from_u8(
                self.last_pushed_category.load(Ordering::Relaxed),
            ),
            last_popped_key: self.last_popped_key.load(Ordering::Relaxed),
            last_popped_category: Category::from_u8(
                self.last_popped_category.load(Ordering::Relaxed),
            ),
            pushed_count: self.pushed.load(Ordering::Relaxed),
            popped_count: self.popped.load(Ordering::Relaxed),
            input_dropped_count: self.input_dropped.load(Ordering::Relaxed),
            out_of_order_count: self.out_of_order.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one queue's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Slot index of the queue.
    pub index: usize,
    /// Role of the queue.
    pub kind: QueueKind,
    /// Whether the extractor currently waits on this queue when it is empty.
    pub active: bool,
    /// Maximum number of buffered elements.
    pub capacity: usize,
    /// Buffered elements at snapshot time.
    pub used: usize,
    /// Dense id of the producer thread that allocated the queue.
    pub owning_thread_id: usize,
    /// Highest key pushed so far.
    pub last_pushed_key: u64,
    /// Category of the element that carried `last_pushed_key`.
    pub last_pushed_category: Category,
    /// Highest key delivered so far.
    pub last_popped_key: u64,
    /// Category of the element that carried `last_popped_key`.
    pub last_popped_category: Category,
    /// Elements accepted into the queue.
    pub pushed_count: u64,
    /// Elements that left the queue (dispatched or instant-dropped).
    pub popped_count: u64,
    /// Elements refused at push time.
    pub input_dropped_count: u64,
    /// Elements delivered with a key below one delivered earlier.
    pub out_of_order_count: u64,
}
