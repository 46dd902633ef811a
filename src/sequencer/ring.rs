/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Bounded single-producer / single-consumer ring buffer.
//!
//! The buffer keeps `capacity + 1` slots so that a full buffer and an empty
//! buffer are told apart by the indices alone:
//!
//! - empty iff `read_index == write_index`
//! - full iff advancing `write_index` would land on `read_index`
//!
//! # Memory ordering
//!
//! The producer fills the slot at `write_index` and then publishes the new
//! `write_index` with `Release`. The consumer loads `write_index` with
//! `Acquire` before touching any slot, takes the element, and publishes the
//! new `read_index` with `Release`, which the producer reads with `Acquire`
//! before deciding the buffer is not full.
//!
//! Only one thread may push and only one thread may pop at any time. The
//! sequencer upholds this: a queue's owning producer is the only pusher and
//! the extractor is the only consumer.

use super::element::{Category, DecoratedElement};
use super::sortable::SortableRingBuffer;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Operations the engine performs on any queue, plain or sortable.
///
/// The consumer-side methods (`front`, `pop`, `is_empty`) only expose the
/// part of the buffer that is ready for extraction.
pub(crate) trait SequenceQueue<T>: Send + Sync {
    /// Moves `element` into the buffer, handing it back if the buffer is full.
    fn try_push(&self, element: DecoratedElement<T>) -> Result<(), DecoratedElement<T>>;

    /// Key and category of the next extractable element.
    fn front(&self) -> Option<(u64, Category)>;

    /// Removes and returns the next extractable element.
    fn pop(&self) -> Option<DecoratedElement<T>>;

    /// Returns `true` if nothing is extractable right now.
    fn is_empty(&self) -> bool;

    /// Number of occupied slots, extractable or not.
    fn used(&self) -> usize;

    /// Maximum number of elements the buffer holds.
    fn capacity(&self) -> usize;

    /// Free slots left, computed from a single snapshot of `used`.
    fn capacity_remaining(&self) -> usize {
        self.capacity().saturating_sub(self.used())
    }

    /// Free room in percent of capacity.
    fn free_percent(&self) -> u8 {
        percent_of(self.capacity_remaining(), self.capacity())
    }

    /// Access to the sortable variant, used by the sorter.
    fn as_sortable(&self) -> Option<&SortableRingBuffer<T>> {
        None
    }
}

/// Fixed-capacity circular queue of decorated elements.
pub(crate) struct RingBuffer<T> {
    slots: Box<[UnsafeCell<Option<DecoratedElement<T>>>]>,
    read: CachePadded<AtomicUsize>,
    write: CachePadded<AtomicUsize>,
}

// SAFETY: slots are only reached through the index protocol described in
// the module docs, so each slot is accessed by one thread at a time and
// elements only ever move between threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer holding up to `capacity` elements.
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..=capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            read: CachePadded::new(AtomicUsize::new(0)),
            write: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Index `by` positions after `index`, modulo the slot count.
    #[inline]
    pub(crate) fn advance(&self, index: usize, by: usize) -> usize {
        (index + by) % self.slots.len()
    }

    /// Number of positions from `from` forward to `to`.
    #[inline]
    pub(crate) fn distance(&self, from: usize, to: usize) -> usize {
        let n = self.slots.len();
        (to + n - from) % n
    }

    #[inline]
    pub(crate) fn read_index(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn write_index(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    /// Producer side. Fails with the element when the buffer is full.
    pub(crate) fn try_push(
        &self,
        element: DecoratedElement<T>,
    ) -> Result<(), DecoratedElement<T>> {
        let write = self.write.load(Ordering::Relaxed);
        let next = self.advance(write, 1);
        if next == self.read.load(Ordering::Acquire) {
            return Err(element);
        }
        // SAFETY: `write` lies outside `[read, write)`, no other thread
        // reads or writes it until the store below publishes it.
        unsafe {
            *self.slots[write].get() = Some(element);
        }
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side: peeks at the head if it lies before `boundary`.
    pub(crate) fn front_until(&self, boundary: usize) -> Option<(u64, Category)> {
        let read = self.read.load(Ordering::Relaxed);
        if read == boundary {
            return None;
        }
        // SAFETY: `read` lies in `[read, boundary)`, owned by the consumer.
        unsafe { (*self.slots[read].get()).as_ref() }.map(|e| (e.key, e.category))
    }

    /// Consumer side: takes the head if it lies before `boundary`.
    pub(crate) fn pop_until(&self, boundary: usize) -> Option<DecoratedElement<T>> {
        let read = self.read.load(Ordering::Relaxed);
        if read == boundary {
            return None;
        }
        // SAFETY: as in `front_until`.
        let element = unsafe { (*self.slots[read].get()).take() };
        self.read.store(self.advance(read, 1), Ordering::Release);
        element
    }

    /// Key stored at `index`.
    ///
    /// # Safety
    ///
    /// The caller must own `index`: no other thread may push into, pop from
    /// or reorder that slot for the duration of the call.
    #[inline]
    pub(crate) unsafe fn key_at(&self, index: usize) -> u64 {
        unsafe { (*self.slots[index].get()).as_ref() }.map_or(u64::MAX, |e| e.key)
    }

    /// Exchanges the contents of two slots.
    ///
    /// # Safety
    ///
    /// The caller must own both slots, as for [`RingBuffer::key_at`].
    #[inline]
    pub(crate) unsafe fn swap_slots(&self, a: usize, b: usize) {
        if a != b {
            unsafe { std::ptr::swap(self.slots[a].get(), self.slots[b].get()) };
        }
    }
}

impl<T: Send> SequenceQueue<T> for RingBuffer<T> {
    fn try_push(&self, element: DecoratedElement<T>) -> Result<(), DecoratedElement<T>> {
        RingBuffer::try_push(self, element)
    }

    fn front(&self) -> Option<(u64, Category)> {
        self.front_until(self.write_index())
    }

    fn pop(&self) -> Option<DecoratedElement<T>> {
        self.pop_until(self.write_index())
    }

    fn is_empty(&self) -> bool {
        let read = self.read_index();
        let write = self.write_index();
        read == write
    }

    fn used(&self) -> usize {
        // Both indices are loaded once; the other side may move either.
        let read = self.read_index();
        let write = self.write_index();
        self.distance(read, write)
    }

    fn capacity(&self) -> usize {
        RingBuffer::capacity(self)
    }
}

/// `part` as a percentage of `whole`, clamped to 100.
#[inline]
pub(crate) fn percent_of(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 100;
    }
    ((part.min(whole) * 100) / whole) as u8
}
