/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Runtime errors returned by the sequencer API.
//!
//! None of these are fatal. An element refused by a queue has already been
//! counted as input-dropped by the time the error is returned.

use super::core::EngineState;
use thiserror::Error;

/// Errors returned by push and queue-allocation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequencerError {
    /// The classifier returned [`Category::Undefined`](super::Category::Undefined).
    #[error("element classified as undefined")]
    UndefinedClassification,

    /// The queue is full and the overload strategy is `Drop`, or a waiting
    /// push gave up because the engine stopped accepting elements.
    #[error("queue {index} is full")]
    PushRejected {
        /// Index of the full queue.
        index: usize,
    },

    /// All runtime-addable queue slots are in use.
    #[error("no free queue slot left (limit {limit})")]
    QueueCapacityExhausted {
        /// Number of runtime-addable slots.
        limit: usize,
    },

    /// The engine is not in a state that accepts the operation.
    #[error("sequencer is {state}")]
    InvalidEngineState {
        /// State at the time of the call.
        state: EngineState,
    },

    /// No queue has been allocated at this index.
    #[error("queue {index} does not exist")]
    UnknownQueue {
        /// Requested index.
        index: usize,
    },

    /// The index belongs to a reserved event queue; use the dedicated push.
    #[error("queue {index} is reserved")]
    ReservedQueue {
        /// Requested index.
        index: usize,
    },

    /// The calling thread did not allocate the queue.
    #[error("queue {index} belongs to another producer thread")]
    NotQueueOwner {
        /// Requested index.
        index: usize,
    },
}
