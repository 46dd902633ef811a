/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Ring buffer with a bounded in-place partial sort.
//!
//! A third index, `sort_index`, splits the occupied region in two:
//!
//! ```text
//!   read_index        sort_index          write_index
//!       |  sorted, visible  |  unsorted, hidden  |
//! ```
//!
//! The consumer only sees `[read_index, sort_index)`; the buffer reports
//! empty once `read_index == sort_index`. The sorting thread owns
//! `[sort_index, write_index)` and publishes sorted elements by advancing
//! `sort_index` with `Release`.

use super::element::{Category, DecoratedElement};
use super::ring::{RingBuffer, SequenceQueue, percent_of};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A [`RingBuffer`] whose newest elements stay hidden until sorted.
pub(crate) struct SortableRingBuffer<T> {
    ring: RingBuffer<T>,
    sort: CachePadded<AtomicUsize>,
    max_disorder: usize,
}

impl<T> SortableRingBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// `disorder_tolerance_percent` of the capacity is left unsorted at the
    /// tail by every [`partial_sort`](Self::partial_sort).
    pub(crate) fn new(capacity: usize, disorder_tolerance_percent: u8) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            sort: CachePadded::new(AtomicUsize::new(0)),
            max_disorder: capacity * usize::from(disorder_tolerance_percent) / 100,
        }
    }

    /// Number of trailing elements a partial sort leaves alone.
    #[inline]
    pub(crate) fn max_disorder_size(&self) -> usize {
        self.max_disorder
    }

    /// Number of pushed elements not yet visible to the consumer.
    pub(crate) fn unsorted(&self) -> usize {
        let sort = self.sort.load(Ordering::Acquire);
        let write = self.ring.write_index();
        self.ring.distance(sort, write)
    }

    /// Hidden elements in percent of capacity.
    pub(crate) fn unsorted_percent(&self) -> u8 {
        percent_of(self.unsorted(), self.ring.capacity())
    }

    /// Sorts all but the newest `max_disorder_size` hidden elements.
    ///
    /// The sorted prefix receives the smallest keys of the whole hidden
    /// region, in ascending order, and becomes visible. Returns the number
    /// of elements published.
    ///
    /// Must only be called from the single sorting thread.
    pub(crate) fn partial_sort(&self) -> usize {
        let sort = self.sort.load(Ordering::Relaxed);
        let write = self.ring.write_index();
        let unsorted = self.ring.distance(sort, write);
        let tolerated = self.max_disorder_size();
        if unsorted <= tolerated {
            return 0;
        }
        let settled = unsorted - tolerated;
        // SAFETY: `[sort, write)` belongs to the sorting thread; the producer
        // only writes at or after `write` and the consumer stops at `sort`.
        let mut span = unsafe { RingSpan::new(&self.ring, sort, unsorted) };
        span.partial_sort(settled);
        debug_assert!(span.keys().take(settled).is_sorted());
        self.sort
            .store(self.ring.advance(sort, settled), Ordering::Release);
        settled
    }

    /// Sorts every hidden element and makes all of them visible.
    ///
    /// Used once the producer has stopped, so nothing stays hidden for the
    /// final flush. Returns the number of elements published.
    pub(crate) fn sort(&self) -> usize {
        let sort = self.sort.load(Ordering::Relaxed);
        let write = self.ring.write_index();
        let unsorted = self.ring.distance(sort, write);
        if unsorted == 0 {
            return 0;
        }
        // SAFETY: as in `partial_sort`.
        let mut span = unsafe { RingSpan::new(&self.ring, sort, unsorted) };
        span.partial_sort(unsorted);
        self.sort.store(write, Ordering::Release);
        unsorted
    }
}

impl<T: Send> SequenceQueue<T> for SortableRingBuffer<T> {
    fn try_push(&self, element: DecoratedElement<T>) -> Result<(), DecoratedElement<T>> {
        self.ring.try_push(element)
    }

    fn front(&self) -> Option<(u64, Category)> {
        self.ring.front_until(self.sort.load(Ordering::Acquire))
    }

    fn pop(&self) -> Option<DecoratedElement<T>> {
        self.ring.pop_until(self.sort.load(Ordering::Acquire))
    }

    fn is_empty(&self) -> bool {
        let read = self.ring.read_index();
        let sort = self.sort.load(Ordering::Acquire);
        read == sort
    }

    fn used(&self) -> usize {
        SequenceQueue::used(&self.ring)
    }

    fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    fn as_sortable(&self) -> Option<&SortableRingBuffer<T>> {
        Some(self)
    }
}

/// Random-access view over `len` consecutive ring slots starting at `start`,
/// hiding the wrap-around.
pub(crate) struct RingSpan<'a, T> {
    ring: &'a RingBuffer<T>,
    start: usize,
    len: usize,
}

impl<'a, T> RingSpan<'a, T> {
    /// # Safety
    ///
    /// The caller must own every slot of the span for the lifetime of the
    /// view (see [`RingBuffer::key_at`]).
    pub(crate) unsafe fn new(ring: &'a RingBuffer<T>, start: usize, len: usize) -> Self {
        Self { ring, start, len }
    }

    #[inline]
    fn slot(&self, position: usize) -> usize {
        self.ring.advance(self.start, position)
    }

    #[inline]
    fn key(&self, position: usize) -> u64 {
        // SAFETY: ownership of the span is a precondition of `new`.
        unsafe { self.ring.key_at(self.slot(position)) }
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        // SAFETY: as in `key`.
        unsafe { self.ring.swap_slots(self.slot(a), self.slot(b)) }
    }

    /// Keys of the span in ring order.
    pub(crate) fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).map(move |position| self.key(position))
    }

    /// Places the `middle` smallest keys of the span, ascending, in its first
    /// `middle` positions. The rest end up in unspecified order. Equal keys
    /// keep no particular order.
    pub(crate) fn partial_sort(&mut self, middle: usize) {
        let middle = middle.min(self.len);
        if middle == 0 {
            return;
        }
        for root in (0..middle / 2).rev() {
            self.sift_down(root, middle);
        }
        for position in middle..self.len {
            if self.key(position) < self.key(0) {
                self.swap(0, position);
                self.sift_down(0, middle);
            }
        }
        for end in (1..middle).rev() {
            self.swap(0, end);
            self.sift_down(0, end);
        }
    }

    /// Restores the max-heap property below `root` within `[0, end)`.
    fn sift_down(&mut self, mut root: usize, end: usize) {
        loop {
            let left = 2 * root + 1;
            if left >= end {
                break;
            }
            let right = left + 1;
            let child = if right < end && self.key(right) > self.key(left) {
                right
            } else {
                left
            };
            if self.key(child) <= self.key(root) {
                break;
            }
            self.swap(root, child);
            root = child;
        }
    }
}
