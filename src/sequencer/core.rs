/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Core Sequencer implementation.
//!
//! This module provides the [`Sequencer`] that owns the queue slots, the
//! engine state machine and the two worker threads, and exposes the
//! producer-facing push and queue-allocation API.

use super::config::{ConfigError, EngineConfig, OverloadStrategy};
use super::element::{Category, Classifier, DecoratedElement, DefaultClassifier};
use super::error::SequencerError;
use super::extractor::{self, Callbacks};
use super::identity::{DenseThreadIds, ThreadIdentity};
use super::registry::{QueueKind, QueueStats, RegistryEntry};
use super::ring::{RingBuffer, SequenceQueue};
use super::sortable::SortableRingBuffer;
use super::sorter;
use super::stats::{EngineCounters, EngineStats};
use crossbeam::utils::Backoff;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, trace, warn};

/// Index of the reserved queue carrying time pulses.
pub const TIME_PULSE_QUEUE: usize = 0;

/// Index of the reserved queue carrying periodic timer events.
pub const PERIODIC_TIMER_QUEUE: usize = 1;

/// Number of reserved queue slots in front of the producer queues.
pub const RESERVED_QUEUES: usize = 2;

/// Lifecycle of a sequencer. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum EngineState {
    /// Being constructed.
    Idle = 0,
    /// Accepting pushes and queue allocations.
    Running = 1,
    /// Draining; only the reserved queues still accept pushes.
    Flushing = 2,
    /// Terminal; nothing is accepted.
    Stopping = 3,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Flushing,
            _ => Self::Stopping,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Flushing => write!(f, "flushing"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// A queue together with its bookkeeping and owner.
pub(crate) struct QueueSlot<T> {
    pub(crate) buffer: Box<dyn SequenceQueue<T>>,
    pub(crate) entry: RegistryEntry,
    owner: Option<ThreadId>,
}

/// Clears the entry's push-in-progress flag when the push returns.
struct PushFence<'a>(&'a RegistryEntry);

impl<'a> PushFence<'a> {
    fn new(entry: &'a RegistryEntry) -> Self {
        entry.begin_push();
        Self(entry)
    }
}

impl Drop for PushFence<'_> {
    fn drop(&mut self) {
        self.0.end_push();
    }
}

/// State shared between the producers and the worker threads.
pub(crate) struct Shared<T> {
    pub(crate) name: String,
    pub(crate) config: EngineConfig,
    classifier: Box<dyn Classifier<T>>,
    identity: Box<dyn ThreadIdentity>,
    state: AtomicU8,
    slots: Box<[OnceLock<QueueSlot<T>>]>,
    allocated: AtomicUsize,
    per_thread: DashMap<(usize, QueueKind), usize>,
    time_source: OnceLock<ThreadId>,
    timer_lock: Mutex<()>,
    pub(crate) counters: EngineCounters,
    pub(crate) extractor_stop: AtomicBool,
    pub(crate) sorter_stop: AtomicBool,
}

impl<T: Send + 'static> Shared<T> {
    #[inline]
    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves the state forward to `next`; never moves it back.
    pub(crate) fn advance_state(&self, next: EngineState) -> bool {
        let previous = EngineState::from_u8(self.state.fetch_max(next as u8, Ordering::SeqCst));
        if previous < next {
            info!(name = %self.name, from = %previous, to = %next, "sequencer state changed");
            true
        } else {
            false
        }
    }

    /// Running engines start flushing; later states are left alone.
    pub(crate) fn begin_flush(&self) {
        if self.state() == EngineState::Running {
            self.advance_state(EngineState::Flushing);
        }
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> Option<&QueueSlot<T>> {
        if index >= self.allocated.load(Ordering::Acquire) {
            return None;
        }
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Allocated slots from `start` on, in index order.
    pub(crate) fn queues_from(&self, start: usize) -> impl Iterator<Item = (usize, &QueueSlot<T>)> {
        let allocated = self.allocated.load(Ordering::Acquire);
        self.slots[..allocated]
            .iter()
            .enumerate()
            .skip(start)
            .filter_map(|(index, slot)| slot.get().map(|slot| (index, slot)))
    }

    /// Whether `state` lets a push into queue `index` through.
    #[inline]
    fn admits(index: usize, state: EngineState) -> bool {
        match state {
            EngineState::Running => true,
            EngineState::Flushing => index < RESERVED_QUEUES,
            EngineState::Idle | EngineState::Stopping => false,
        }
    }

    /// Classifies and enqueues `element`, applying the overload strategy.
    fn enqueue(&self, index: usize, slot: &QueueSlot<T>, element: T) -> Result<(), SequencerError> {
        let entry = &slot.entry;
        let (key, category) = self.classifier.classify(&element);
        if category == Category::Undefined {
            entry.record_input_drop();
            trace!(queue = index, "element with undefined category dropped");
            return Err(SequencerError::UndefinedClassification);
        }

        let _fence = PushFence::new(entry);
        let state = self.state();
        if !Self::admits(index, state) {
            entry.record_input_drop();
            trace!(queue = index, %state, "push refused");
            return Err(SequencerError::InvalidEngineState { state });
        }

        let mut pending = DecoratedElement::new(key, category, element);
        loop {
            match slot.buffer.try_push(pending) {
                Ok(()) => break,
                Err(rejected) => {
                    if self.config.overload_strategy == OverloadStrategy::Drop
                        || !Self::admits(index, self.state())
                    {
                        entry.record_input_drop();
                        trace!(queue = index, key, "queue full, element dropped");
                        return Err(SequencerError::PushRejected { index });
                    }
                    pending = rejected;
                    thread::sleep(self.config.push_wait_sleep());
                }
            }
        }

        entry.record_push(key, category);
        // Always after the element landed, never check-then-set.
        if !entry.set_active(true) {
            debug!(queue = index, "queue reactivated");
        }
        if index >= RESERVED_QUEUES {
            self.counters.record_push(index, key);
        }
        Ok(())
    }

    /// Waits until no push into a queue from `start` on is in progress.
    fn wait_for_pushes(&self, start: usize) {
        for (_, slot) in self.queues_from(start) {
            let backoff = Backoff::new();
            while slot.entry.push_in_progress() {
                backoff.snooze();
            }
        }
    }
}

/// Handles of the lazily started worker threads.
struct Workers<T> {
    callbacks: Arc<Mutex<Callbacks<T>>>,
    extractor: Option<JoinHandle<()>>,
    sorter: Option<JoinHandle<()>>,
    extractor_started: bool,
}

/// Merges per-producer queues into approximate global key order.
///
/// Producers push into their own bounded queue; a dedicated extractor thread
/// repeatedly picks the smallest head key across all queues and hands the
/// element to the dispatch callback. Sortable queues are kept approximately
/// ordered by a sorter thread. Both threads start with the first queue
/// allocation and are joined by [`shutdown`](Self::shutdown).
///
/// Queue 0 carries time pulses and queue 1 periodic timer events; they are
/// reached through [`push_time_pulse`](Self::push_time_pulse) and
/// [`push_periodic_timer`](Self::push_periodic_timer).
///
/// # Examples
///
/// ```
/// use event_sequencer::{Category, Sequencer};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let sequencer = Sequencer::<u64>::builder("doc", move |key| sink.lock().unwrap().push(key))
///     .classifier(|key: &u64| (*key, Category::NormedElement))
///     .build()
///     .expect("default config is valid");
///
/// let queue = sequencer.add_queue().expect("engine is running");
/// for key in [1, 2, 3] {
///     sequencer.push(queue, key).expect("queue has room");
/// }
/// sequencer.shutdown();
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
/// ```
pub struct Sequencer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Workers<T>>,
}

impl<T: Send + 'static> Sequencer<T> {
    /// Starts building a sequencer named `name` that hands every extracted
    /// element to `dispatch`, on the extractor thread.
    pub fn builder<F>(name: impl Into<String>, dispatch: F) -> SequencerBuilder<T>
    where
        F: FnMut(T) + Send + 'static,
    {
        SequencerBuilder {
            name: name.into(),
            config: EngineConfig::default(),
            dispatch: Box::new(dispatch),
            idle: None,
            classifier: Box::new(DefaultClassifier),
            identity: Box::new(DenseThreadIds),
        }
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Allocates a plain producer queue owned by the calling thread.
    ///
    /// # Errors
    ///
    /// [`SequencerError::InvalidEngineState`] unless the engine is running,
    /// [`SequencerError::QueueCapacityExhausted`] when no slot is left.
    pub fn add_queue(&self) -> Result<usize, SequencerError> {
        self.allocate(QueueKind::Normal)
    }

    /// Allocates a sortable producer queue owned by the calling thread.
    ///
    /// # Errors
    ///
    /// As for [`add_queue`](Self::add_queue).
    pub fn add_sortable_queue(&self) -> Result<usize, SequencerError> {
        self.allocate(QueueKind::Sorted)
    }

    fn allocate(&self, kind: QueueKind) -> Result<usize, SequencerError> {
        let mut workers = self.workers.lock();
        let shared = &self.shared;

        let state = shared.state();
        if state != EngineState::Running {
            trace!(name = %shared.name, %state, "queue allocation refused");
            return Err(SequencerError::InvalidEngineState { state });
        }

        let limit = shared.config.max_runtime_queues;
        let index = shared.allocated.load(Ordering::Relaxed);
        if index >= shared.slots.len() {
            debug!(name = %shared.name, limit, "queue slots exhausted");
            return Err(SequencerError::QueueCapacityExhausted { limit });
        }

        let capacity = shared.config.queue_capacity;
        let buffer: Box<dyn SequenceQueue<T>> = match kind {
            QueueKind::Sorted => Box::new(SortableRingBuffer::new(
                capacity,
                shared.config.disorder_tolerance_percent,
            )),
            QueueKind::Normal | QueueKind::Event => Box::new(RingBuffer::new(capacity)),
        };
        let owning_thread_id = shared.identity.current_thread_id();
        let slot = QueueSlot {
            buffer,
            entry: RegistryEntry::new(kind, capacity, owning_thread_id),
            owner: Some(thread::current().id()),
        };
        if shared.slots[index].set(slot).is_err() {
            return Err(SequencerError::QueueCapacityExhausted { limit });
        }
        shared.allocated.store(index + 1, Ordering::Release);
        debug!(name = %shared.name, queue = index, ?kind, owning_thread_id, "queue allocated");

        self.start_extractor(&mut workers);
        if kind == QueueKind::Sorted {
            self.start_sorter(&mut workers);
        }
        Ok(index)
    }

    fn start_extractor(&self, workers: &mut Workers<T>) {
        if workers.extractor.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let callbacks = Arc::clone(&workers.callbacks);
        let spawned = thread::Builder::new()
            .name(format!("{}-extractor", self.shared.name))
            .spawn(move || {
                let mut callbacks = callbacks.lock();
                extractor::run(&shared, &mut callbacks);
            });
        match spawned {
            Ok(handle) => {
                workers.extractor = Some(handle);
                workers.extractor_started = true;
            }
            Err(error) => warn!(name = %self.shared.name, %error, "could not start extractor"),
        }
    }

    fn start_sorter(&self, workers: &mut Workers<T>) {
        if workers.sorter.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-sorter", self.shared.name))
            .spawn(move || sorter::run(&shared));
        match spawned {
            Ok(handle) => workers.sorter = Some(handle),
            Err(error) => warn!(name = %self.shared.name, %error, "could not start sorter"),
        }
    }

    /// Pushes `element` into producer queue `index`.
    ///
    /// Under [`OverloadStrategy::Wait`] this blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`SequencerError::ReservedQueue`] for indices 0 and 1
    /// - [`SequencerError::UnknownQueue`] if no queue was allocated at `index`
    /// - [`SequencerError::NotQueueOwner`] if another thread allocated it
    /// - [`SequencerError::UndefinedClassification`],
    ///   [`SequencerError::InvalidEngineState`] or
    ///   [`SequencerError::PushRejected`] if the element was dropped
    pub fn push(&self, index: usize, element: T) -> Result<(), SequencerError> {
        if index < RESERVED_QUEUES {
            return Err(SequencerError::ReservedQueue { index });
        }
        let slot = self
            .shared
            .slot(index)
            .ok_or(SequencerError::UnknownQueue { index })?;
        if slot.owner != Some(thread::current().id()) {
            return Err(SequencerError::NotQueueOwner { index });
        }
        self.shared.enqueue(index, slot, element)
    }

    /// Pushes into the calling thread's own plain queue, allocating it on
    /// the first call.
    ///
    /// # Errors
    ///
    /// As for [`add_queue`](Self::add_queue) and [`push`](Self::push).
    pub fn per_thread_push(&self, element: T) -> Result<(), SequencerError> {
        let index = self.thread_queue(QueueKind::Normal)?;
        self.push(index, element)
    }

    /// Pushes into the calling thread's own sortable queue, allocating it on
    /// the first call.
    ///
    /// # Errors
    ///
    /// As for [`add_sortable_queue`](Self::add_sortable_queue) and
    /// [`push`](Self::push).
    pub fn per_thread_sorted_push(&self, element: T) -> Result<(), SequencerError> {
        let index = self.thread_queue(QueueKind::Sorted)?;
        self.push(index, element)
    }

    fn thread_queue(&self, kind: QueueKind) -> Result<usize, SequencerError> {
        let key = (self.shared.identity.current_thread_id(), kind);
        if let Some(index) = self.shared.per_thread.get(&key) {
            return Ok(*index);
        }
        let index = self.allocate(kind)?;
        self.shared.per_thread.insert(key, index);
        Ok(index)
    }

    /// Pushes a time pulse into reserved queue 0.
    ///
    /// The first thread to call this becomes the only accepted time source;
    /// pulses from any other thread are ignored and `Ok(false)` is returned.
    ///
    /// # Errors
    ///
    /// As for [`push`](Self::push), for elements that were dropped.
    pub fn push_time_pulse(&self, element: T) -> Result<bool, SequencerError> {
        let current = thread::current().id();
        if *self.shared.time_source.get_or_init(|| current) != current {
            trace!(name = %self.shared.name, "time pulse from unauthorized thread ignored");
            return Ok(false);
        }
        let slot = self
            .shared
            .slot(TIME_PULSE_QUEUE)
            .ok_or(SequencerError::UnknownQueue { index: TIME_PULSE_QUEUE })?;
        self.shared.enqueue(TIME_PULSE_QUEUE, slot, element)?;
        Ok(true)
    }

    /// Pushes a periodic timer event into reserved queue 1. Any thread may
    /// call this.
    ///
    /// # Errors
    ///
    /// As for [`push`](Self::push), for elements that were dropped.
    pub fn push_periodic_timer(&self, element: T) -> Result<(), SequencerError> {
        let slot = self
            .shared
            .slot(PERIODIC_TIMER_QUEUE)
            .ok_or(SequencerError::UnknownQueue { index: PERIODIC_TIMER_QUEUE })?;
        let _producer = self.shared.timer_lock.lock();
        self.shared.enqueue(PERIODIC_TIMER_QUEUE, slot, element)
    }

    /// Number of producer queues currently marked active.
    #[must_use]
    pub fn number_of_active_queues(&self) -> usize {
        self.shared
            .queues_from(RESERVED_QUEUES)
            .filter(|(_, slot)| slot.entry.is_active())
            .count()
    }

    /// Number of allocated queues, reserved ones included.
    #[must_use]
    pub fn number_of_queues(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }

    /// Snapshot of the engine-wide statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let input_dropped = self
            .shared
            .queues_from(0)
            .map(|(_, slot)| slot.entry.input_dropped())
            .sum();
        self.shared.counters.snapshot(
            self.shared.state(),
            input_dropped,
            self.number_of_active_queues(),
        )
    }

    /// Snapshot of one queue's bookkeeping.
    #[must_use]
    pub fn queue_stats(&self, index: usize) -> Option<QueueStats> {
        self.shared
            .slot(index)
            .map(|slot| slot.entry.snapshot(index, slot.buffer.used()))
    }

    /// Snapshots of every allocated queue, reserved ones first.
    #[must_use]
    pub fn all_queue_stats(&self) -> Vec<QueueStats> {
        self.shared
            .queues_from(0)
            .map(|(index, slot)| slot.entry.snapshot(index, slot.buffer.used()))
            .collect()
    }

    /// Stops the engine and drains every queue.
    ///
    /// Stops the sorter (which publishes everything still hidden), moves to
    /// [`EngineState::Flushing`], stops the extractor after its final flush,
    /// and moves to [`EngineState::Stopping`]. Blocks until all of this has
    /// happened. Calling it again does nothing.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock();
        let shared = &self.shared;
        if shared.state() == EngineState::Stopping {
            return;
        }
        info!(name = %shared.name, "sequencer shutting down");

        shared.sorter_stop.store(true, Ordering::Release);
        if let Some(sorter) = workers.sorter.take()
            && sorter.join().is_err()
        {
            warn!(name = %shared.name, "sorter thread panicked");
        }

        shared.advance_state(EngineState::Flushing);
        shared.wait_for_pushes(RESERVED_QUEUES);

        shared.extractor_stop.store(true, Ordering::Release);
        if let Some(extractor) = workers.extractor.take()
            && extractor.join().is_err()
        {
            warn!(name = %shared.name, "extractor thread panicked");
        }

        shared.advance_state(EngineState::Stopping);
        shared.wait_for_pushes(0);

        let mut callbacks = workers.callbacks.lock();
        let residue = if workers.extractor_started {
            extractor::drain(shared, &mut callbacks)
        } else {
            extractor::final_flush(shared, &mut callbacks)
        };
        drop(callbacks);

        let stats = self.stats();
        info!(
            name = %shared.name,
            residue,
            popped = stats.popped,
            input_dropped = stats.input_dropped,
            output_dropped = stats.output_dropped,
            out_of_order = stats.out_of_order,
            "sequencer stopped"
        );
    }
}

impl<T: Send + 'static> Drop for Sequencer<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Send + 'static> fmt::Debug for Sequencer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .field("queues", &self.number_of_queues())
            .finish()
    }
}

/// Builder for a [`Sequencer`].
///
/// Obtained from [`Sequencer::builder`].
pub struct SequencerBuilder<T> {
    name: String,
    config: EngineConfig,
    dispatch: Box<dyn FnMut(T) + Send>,
    idle: Option<Box<dyn FnMut() + Send>>,
    classifier: Box<dyn Classifier<T>>,
    identity: Box<dyn ThreadIdentity>,
}

impl<T: Send + 'static> SequencerBuilder<T> {
    /// Uses `config` instead of [`EngineConfig::default`].
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `classifier` instead of [`DefaultClassifier`].
    #[must_use]
    pub fn classifier<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<T> + 'static,
    {
        self.classifier = Box::new(classifier);
        self
    }

    /// Called on the extractor thread whenever it goes idle.
    #[must_use]
    pub fn idle_callback<F>(mut self, idle: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.idle = Some(Box::new(idle));
        self
    }

    /// Uses `identity` instead of [`DenseThreadIds`].
    #[must_use]
    pub fn thread_identity<I>(mut self, identity: I) -> Self
    where
        I: ThreadIdentity + 'static,
    {
        self.identity = Box::new(identity);
        self
    }

    /// Validates the configuration, creates the two reserved queues and
    /// returns a running sequencer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn build(self) -> Result<Sequencer<T>, ConfigError> {
        self.config.validate()?;

        let capacity = self.config.queue_capacity;
        let builder_thread = self.identity.current_thread_id();
        let reserved = (0..RESERVED_QUEUES).map(|_| {
            OnceLock::from(QueueSlot {
                buffer: Box::new(RingBuffer::new(capacity)) as Box<dyn SequenceQueue<T>>,
                entry: RegistryEntry::new(QueueKind::Event, capacity, builder_thread),
                owner: None,
            })
        });
        let slots = reserved
            .chain((0..self.config.max_runtime_queues).map(|_| OnceLock::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Shared {
            name: self.name,
            config: self.config,
            classifier: self.classifier,
            identity: self.identity,
            state: AtomicU8::new(EngineState::Idle as u8),
            slots,
            allocated: AtomicUsize::new(RESERVED_QUEUES),
            per_thread: DashMap::new(),
            time_source: OnceLock::new(),
            timer_lock: Mutex::new(()),
            counters: EngineCounters::default(),
            extractor_stop: AtomicBool::new(false),
            sorter_stop: AtomicBool::new(false),
        };
        shared.advance_state(EngineState::Running);

        Ok(Sequencer {
            shared: Arc::new(shared),
            workers: Mutex::new(Workers {
                callbacks: Arc::new(Mutex::new(Callbacks::new(self.dispatch, self.idle))),
                extractor: None,
                sorter: None,
                extractor_started: false,
            }),
        })
    }
}
