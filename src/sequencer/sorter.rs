/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Sorter loop.
//!
//! Started with the first sortable queue. Keeps every sortable queue's
//! hidden tail below the sort trigger by running partial sorts, and on stop
//! fully sorts each queue so nothing stays hidden for the final flush.

use super::core::{RESERVED_QUEUES, Shared};
use super::stats::EngineCounters;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::debug;

/// Body of the sorter thread.
pub(crate) fn run<T: Send + 'static>(shared: &Shared<T>) {
    debug!(name = %shared.name, "sorter started");
    let trigger = shared.config.sort_trigger_percent;
    let counters = &shared.counters;

    while !shared.sorter_stop.load(Ordering::Acquire) {
        let mut sorted = 0;
        for (_, slot) in shared.queues_from(RESERVED_QUEUES) {
            let Some(queue) = slot.buffer.as_sortable() else {
                continue;
            };
            if queue.unsorted_percent() > trigger && queue.partial_sort() > 0 {
                EngineCounters::bump(&counters.sort_passes);
                sorted += 1;
            }
        }
        if sorted == 0 {
            EngineCounters::bump(&counters.sorter_sleeps);
            thread::sleep(shared.config.long_sleep());
        }
    }

    let mut published = 0;
    for (_, slot) in shared.queues_from(RESERVED_QUEUES) {
        if let Some(queue) = slot.buffer.as_sortable() {
            published += queue.sort();
        }
    }
    debug!(name = %shared.name, published, "sorter stopped");
}
