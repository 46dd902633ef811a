/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Extractor loop.
//!
//! Each cycle the extractor:
//!
//! 1. dispatches one pending time pulse, ahead of everything else
//!    (skipped while flushing);
//! 2. scans the merge queues (index 1 on), dispatching instant-pass heads,
//!    discarding instant-drop heads and collecting every queue whose normed
//!    head ties for the smallest key;
//! 3. extracts the tied heads, unless an active queue is empty and every
//!    queue still has more free room than the backpressure threshold, in
//!    which case it sleeps briefly and looks again;
//! 4. backs off when nothing was available or the per-loop budget ran out.
//!
//! After the stop flag is raised it runs [`final_flush`], which repeats
//! steps 2 and 3 without ever waiting until the queues are empty.

use super::core::{EngineState, PERIODIC_TIMER_QUEUE, Shared, TIME_PULSE_QUEUE};
use super::element::{DecoratedElement, END_OF_TIME};
use super::stats::EngineCounters;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::debug;

/// First queue taking part in the merge. Queue 0 is served out of band.
const FIRST_MERGED_QUEUE: usize = PERIODIC_TIMER_QUEUE;

/// Application callbacks, owned by whichever thread is extracting.
pub(crate) struct Callbacks<T> {
    dispatch: Box<dyn FnMut(T) + Send>,
    idle: Option<Box<dyn FnMut() + Send>>,
}

impl<T> Callbacks<T> {
    pub(crate) fn new(
        dispatch: Box<dyn FnMut(T) + Send>,
        idle: Option<Box<dyn FnMut() + Send>>,
    ) -> Self {
        Self { dispatch, idle }
    }

    #[inline]
    fn dispatch(&mut self, element: DecoratedElement<T>) {
        (self.dispatch)(element.into_payload());
    }

    #[inline]
    fn idle(&mut self) {
        if let Some(idle) = self.idle.as_mut() {
            idle();
        }
    }
}

/// Result of one pass over the merge queues.
#[derive(Debug, Default)]
struct Scan {
    /// Queues whose head carries `minimum`.
    tied: Vec<usize>,
    minimum: Option<u64>,
    /// An active queue had nothing to offer.
    active_empty: bool,
    /// Smallest free room across the scanned queues, in percent.
    min_free_percent: u8,
}

impl Scan {
    fn reset(&mut self) {
        self.tied.clear();
        self.minimum = None;
        self.active_empty = false;
        self.min_free_percent = 100;
    }

    fn offer(&mut self, index: usize, key: u64) {
        match self.minimum {
            Some(minimum) if key > minimum => {}
            Some(minimum) if key == minimum => self.tied.push(index),
            _ => {
                self.minimum = Some(key);
                self.tied.clear();
                self.tied.push(index);
            }
        }
    }
}

/// Body of the extractor thread.
pub(crate) fn run<T: Send + 'static>(shared: &Shared<T>, callbacks: &mut Callbacks<T>) {
    debug!(name = %shared.name, "extractor started");
    let config = &shared.config;
    let counters = &shared.counters;
    let mut scan = Scan::default();
    let mut consumed = 0usize;

    while !shared.extractor_stop.load(Ordering::Acquire) {
        let flushing = shared.state() == EngineState::Flushing;
        let mut handled = 0;

        if !flushing {
            handled += dispatch_time_pulse(shared, callbacks);
        }

        handled += scan_queues(shared, callbacks, &mut scan);

        if scan.minimum.is_some() {
            if !flushing
                && scan.active_empty
                && scan.min_free_percent > config.backpressure_free_percent
            {
                EngineCounters::bump(&counters.waiting_for_empty_queue);
                thread::sleep(config.backpressure_sleep());
                consumed = 0;
                continue;
            }
            if scan.active_empty && !flushing {
                EngineCounters::bump(&counters.overwait);
            }
            handled += extract_tied(shared, callbacks, &scan);
        }

        if flushing {
            if handled == 0 {
                thread::yield_now();
            }
            continue;
        }

        consumed += handled;
        if handled == 0 {
            EngineCounters::bump(&counters.extractor_sleeps);
            thread::sleep(config.long_sleep());
            callbacks.idle();
            consumed = 0;
        } else if config.max_consumables_per_loop > 0 && consumed >= config.max_consumables_per_loop
        {
            EngineCounters::bump(&counters.extractor_sleeps);
            thread::sleep(config.short_sleep());
            callbacks.idle();
            consumed = 0;
        }
    }

    let flushed = final_flush(shared, callbacks);
    debug!(name = %shared.name, flushed, "extractor stopped");
}

/// Dispatches the head of the time pulse queue, if any.
fn dispatch_time_pulse<T: Send + 'static>(shared: &Shared<T>, callbacks: &mut Callbacks<T>) -> usize {
    let Some(slot) = shared.slot(TIME_PULSE_QUEUE) else {
        return 0;
    };
    let Some(pulse) = slot.buffer.pop() else {
        return 0;
    };
    slot.entry.record_pop(pulse.key, pulse.category);
    let end_of_time = pulse.key == END_OF_TIME;
    EngineCounters::bump(&shared.counters.popped);
    callbacks.dispatch(pulse);
    if end_of_time {
        debug!(name = %shared.name, "end-of-time pulse dispatched");
        shared.begin_flush();
    }
    1
}

/// Whether a queue whose highest delivered key is `delivered` trails the
/// engine's `horizon` by more than `staleness`.
#[inline]
fn is_stale(delivered: u64, horizon: u64, staleness: u64) -> bool {
    delivered.saturating_add(staleness) < horizon
}

/// One pass over the merge queues. Handles instant heads on the spot and
/// records the normed minimum in `scan`. Returns the number of elements
/// dispatched or discarded.
fn scan_queues<T: Send + 'static>(
    shared: &Shared<T>,
    callbacks: &mut Callbacks<T>,
    scan: &mut Scan,
) -> usize {
    scan.reset();
    let counters = &shared.counters;
    let horizon = counters.last_popped_key();
    let staleness = shared.config.max_allowed_staleness;
    let mut handled = 0;

    for (index, slot) in shared.queues_from(FIRST_MERGED_QUEUE) {
        let (buffer, entry) = (&slot.buffer, &slot.entry);
        scan.min_free_percent = scan.min_free_percent.min(buffer.free_percent());

        match buffer.front() {
            None => {
                if index == PERIODIC_TIMER_QUEUE {
                    continue;
                }
                if entry.is_active()
                    && buffer.used() == 0
                    && is_stale(entry.last_popped_key(), horizon, staleness)
                {
                    entry.set_active(false);
                    if buffer.used() > 0 {
                        // A push landed after the check above.
                        entry.set_active(true);
                    } else {
                        debug!(name = %shared.name, queue = index, horizon, "queue deactivated");
                    }
                }
                scan.active_empty |= entry.is_active();
            }
            Some((_, category)) if category.is_instant_pass() => {
                if let Some(element) = buffer.pop() {
                    entry.record_instant_pop();
                    EngineCounters::bump(&counters.popped);
                    callbacks.dispatch(element);
                    handled += 1;
                }
            }
            Some((_, category)) if category.is_instant_drop() => {
                if buffer.pop().is_some() {
                    entry.record_instant_pop();
                    EngineCounters::bump(&counters.output_dropped);
                    handled += 1;
                }
            }
            Some((key, _)) => scan.offer(index, key),
        }
    }
    handled
}

/// Pops and dispatches the head of every queue tied for the minimum.
fn extract_tied<T: Send + 'static>(
    shared: &Shared<T>,
    callbacks: &mut Callbacks<T>,
    scan: &Scan,
) -> usize {
    let mut handled = 0;
    for &index in &scan.tied {
        let Some(slot) = shared.slot(index) else {
            continue;
        };
        let Some(element) = slot.buffer.pop() else {
            continue;
        };
        slot.entry.record_pop(element.key, element.category);
        shared.counters.record_pop(index, element.key);
        EngineCounters::bump(&shared.counters.popped);
        callbacks.dispatch(element);
        handled += 1;
    }
    handled
}

/// Drains every queue without waiting on lagging producers.
///
/// Publishes whatever sortable queues still hide, merges the queues until
/// all are empty, then empties the time pulse queue. Only valid once the
/// sorter has stopped and producer queues no longer accept pushes.
pub(crate) fn drain<T: Send + 'static>(shared: &Shared<T>, callbacks: &mut Callbacks<T>) -> usize {
    for (_, slot) in shared.queues_from(FIRST_MERGED_QUEUE) {
        if let Some(sortable) = slot.buffer.as_sortable()
            && sortable.sort() > 0
        {
            EngineCounters::bump(&shared.counters.sort_passes);
        }
    }

    let mut scan = Scan::default();
    let mut drained = 0;
    loop {
        let handled = scan_queues(shared, callbacks, &mut scan);
        if scan.minimum.is_none() && handled == 0 {
            break;
        }
        drained += handled + extract_tied(shared, callbacks, &scan);
    }

    while dispatch_time_pulse(shared, callbacks) > 0 {
        drained += 1;
    }
    drained
}

/// [`drain`], followed by one last idle notification.
pub(crate) fn final_flush<T: Send + 'static>(
    shared: &Shared<T>,
    callbacks: &mut Callbacks<T>,
) -> usize {
    let drained = drain(shared, callbacks);
    callbacks.idle();
    drained
}
