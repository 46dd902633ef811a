/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Thread identity service.
//!
//! The sequencer uses a dense small-integer id per producer thread to find
//! that thread's queue and to attribute queues in diagnostics. The host
//! application can inject its own numbering through [`ThreadIdentity`].

use std::sync::atomic::{AtomicUsize, Ordering};

/// Supplies a dense id for the calling thread.
///
/// Any `Fn() -> usize` closure is a thread identity service.
pub trait ThreadIdentity: Send + Sync {
    /// Id of the calling thread. Must be stable for the thread's lifetime.
    fn current_thread_id(&self) -> usize;
}

impl<F> ThreadIdentity for F
where
    F: Fn() -> usize + Send + Sync,
{
    #[inline]
    fn current_thread_id(&self) -> usize {
        self()
    }
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Default service: numbers threads 0, 1, 2, ... in order of first use,
/// process wide.
///
/// # Examples
///
/// ```
/// use event_sequencer::{DenseThreadIds, ThreadIdentity};
///
/// let ids = DenseThreadIds;
/// assert_eq!(ids.current_thread_id(), ids.current_thread_id());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseThreadIds;

impl ThreadIdentity for DenseThreadIds {
    #[inline]
    fn current_thread_id(&self) -> usize {
        THREAD_ID.with(|id| *id)
    }
}
