/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # event-sequencer
//!
//! A real-time event sequencing engine. Many producer threads push
//! time-stamped events into their own bounded ring buffers; a single
//! extractor thread merges them into approximate global key order and hands
//! each element to an application supplied dispatch callback.
//!
//! See the [`sequencer`] module for the architecture and the public API.
//!
//! ```no_run
//! use event_sequencer::{Category, EngineConfig, Sequencer};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sequencer = Sequencer::<u64>::builder("probe", |key: u64| println!("{key}"))
//!     .config(EngineConfig::default())
//!     .classifier(|key: &u64| (*key, Category::NormedElement))
//!     .build()?;
//!
//! sequencer.per_thread_push(42)?;
//! sequencer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod sequencer;

pub use sequencer::{
    Category, Classifier, ConfigError, DecoratedElement, DefaultClassifier, DenseThreadIds,
    END_OF_TIME, EngineConfig, EngineState, EngineStats, OverloadStrategy, PERIODIC_TIMER_QUEUE,
    QueueKind, QueueStats, RESERVED_QUEUES, Sequencer, SequencerBuilder, SequencerError,
    TIME_PULSE_QUEUE, ThreadIdentity,
};
