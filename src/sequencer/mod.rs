/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Sequencer module for merging per-producer event queues in key order.
//!
//! Producer threads push time-stamped elements into their own bounded ring
//! buffers. A single extractor thread merges the buffers by ordering key and
//! hands each element to a dispatch callback; a sorter thread keeps
//! sortable buffers approximately ordered.
//!
//! # Architecture
//!
//! - A [`Classifier`] maps every pushed element to `(key, category)` once,
//!   on the producer's thread
//! - Each producer owns one single-producer / single-consumer ring buffer;
//!   sortable buffers hide their newest elements until the sorter has
//!   placed them
//! - Queue 0 carries time pulses from a single authorized thread and is
//!   served ahead of everything; queue 1 carries periodic timer events
//! - The extractor dispatches instant-pass heads immediately, discards
//!   instant-drop heads and extracts the smallest normed key, briefly
//!   holding back while an active producer's queue is empty
//! - [`Sequencer::shutdown`] stops the sorter, flushes every queue and
//!   joins the extractor
//!
//! # Examples
//!
//! ```no_run
//! use event_sequencer::{Category, EngineConfig, Sequencer};
//! use std::sync::Arc;
//! use std::thread;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sequencer = Arc::new(
//!     Sequencer::<(u64, String)>::builder("probe", |(ts, pdu)| println!("{ts}: {pdu}"))
//!         .config(EngineConfig::default())
//!         .classifier(|event: &(u64, String)| (event.0, Category::NormedElement))
//!         .build()?,
//! );
//!
//! let producers: Vec<_> = (0..4)
//!     .map(|id| {
//!         let sequencer = Arc::clone(&sequencer);
//!         thread::spawn(move || {
//!             for ts in 0..100 {
//!                 sequencer.per_thread_push((ts, format!("producer {id}"))).ok();
//!             }
//!         })
//!     })
//!     .collect();
//! for producer in producers {
//!     producer.join().ok();
//! }
//!
//! sequencer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod element;
pub mod error;
pub(crate) mod extractor;
pub mod identity;
pub mod registry;
pub(crate) mod ring;
pub(crate) mod sortable;
pub(crate) mod sorter;
pub mod stats;

#[cfg(test)]
mod tests;

// Re-export main types
pub use config::{ConfigError, EngineConfig, OverloadStrategy};
pub use core::{
    EngineState, PERIODIC_TIMER_QUEUE, RESERVED_QUEUES, Sequencer, SequencerBuilder,
    TIME_PULSE_QUEUE,
};
pub use element::{Category, Classifier, DecoratedElement, DefaultClassifier, END_OF_TIME};
pub use error::SequencerError;
pub use identity::{DenseThreadIds, ThreadIdentity};
pub use registry::{QueueKind, QueueStats};
pub use stats::EngineStats;
