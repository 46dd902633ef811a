/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Engine configuration.
//!
//! [`EngineConfig`] is built once and never changes afterwards. Every field
//! has a default, so a JSON document only needs to name what it overrides.
//!
//! The sleep durations are plain polling intervals: the extractor and the
//! sorter back off with `thread::sleep` rather than waiting on a condition
//! variable, trading a bounded amount of idle polling for wake-up latency.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What a push does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadStrategy {
    /// Sleep in short increments until a slot frees up.
    #[default]
    Wait,
    /// Refuse the element and count it as input-dropped.
    Drop,
}

/// Errors raised while building or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Queues must hold at least one element.
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,

    /// The unsorted tail left by a partial sort must be smaller than the
    /// fill level that triggers it.
    #[error(
        "disorder tolerance ({tolerance}%) must be lower than the sort trigger ({trigger}%)"
    )]
    DisorderAboveTrigger {
        /// Configured disorder tolerance percent.
        tolerance: u8,
        /// Configured sort trigger percent.
        trigger: u8,
    },

    /// A percentage field is above 100.
    #[error("{field} must be a percentage between 0 and 100, got {value}")]
    PercentOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u8,
    },

    /// The sorter only runs once the hidden tail exceeds the trigger, and
    /// the tail never exceeds 100% of capacity.
    #[error("sort trigger must be below 100%, got {trigger}%")]
    SortTriggerUnreachable {
        /// Configured sort trigger percent.
        trigger: u8,
    },

    /// The JSON document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of a sequencer.
///
/// # Examples
///
/// ```
/// use event_sequencer::{EngineConfig, OverloadStrategy};
///
/// let config = EngineConfig::from_json_str(r#"{ "queue_capacity": 128, "overload_strategy": "drop" }"#)
///     .expect("valid config");
/// assert_eq!(config.queue_capacity, 128);
/// assert_eq!(config.overload_strategy, OverloadStrategy::Drop);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Elements each queue can hold.
    pub queue_capacity: usize,

    /// Behaviour of a push on a full queue.
    pub overload_strategy: OverloadStrategy,

    /// Elements the extractor may dispatch before it yields with a short
    /// sleep. Zero means no limit.
    pub max_consumables_per_loop: usize,

    /// The extractor holds back the minimum while an active queue is empty
    /// only as long as every queue has more than this percentage free.
    pub backpressure_free_percent: u8,

    /// An empty queue whose highest delivered key trails the engine's last
    /// delivered key by more than this is no longer waited for.
    pub max_allowed_staleness: u64,

    /// Hidden fraction of a sortable queue, in percent of capacity, at which
    /// the sorter runs a partial sort.
    pub sort_trigger_percent: u8,

    /// Fraction of a sortable queue, in percent of capacity, left unsorted
    /// at the tail by a partial sort.
    pub disorder_tolerance_percent: u8,

    /// Producer queues that can be added at runtime, on top of the two
    /// reserved ones.
    pub max_runtime_queues: usize,

    /// Idle sleep when nothing was available, in microseconds.
    pub long_sleep_us: u64,

    /// Sleep after the per-loop dispatch budget ran out, in microseconds.
    pub short_sleep_us: u64,

    /// Sleep while waiting for a lagging queue, in microseconds.
    pub backpressure_sleep_us: u64,

    /// Retry interval of a push waiting for room, in microseconds.
    pub push_wait_sleep_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            overload_strategy: OverloadStrategy::Wait,
            max_consumables_per_loop: 1024,
            backpressure_free_percent: 50,
            max_allowed_staleness: 5_000_000,
            sort_trigger_percent: 20,
            disorder_tolerance_percent: 5,
            max_runtime_queues: 64,
            long_sleep_us: 1_000,
            short_sleep_us: 100,
            backpressure_sleep_us: 100,
            push_wait_sleep_us: 50,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document on top of the defaults and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any error of
    /// [`EngineConfig::validate`].
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a sequencer relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the capacity is zero, a percentage exceeds
    /// 100, `sort_trigger_percent` is 100, or
    /// `disorder_tolerance_percent >= sort_trigger_percent`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        for (field, value) in [
            ("backpressure_free_percent", self.backpressure_free_percent),
            ("sort_trigger_percent", self.sort_trigger_percent),
            ("disorder_tolerance_percent", self.disorder_tolerance_percent),
        ] {
            if value > 100 {
                return Err(ConfigError::PercentOutOfRange { field, value });
            }
        }
        if self.sort_trigger_percent >= 100 {
            return Err(ConfigError::SortTriggerUnreachable {
                trigger: self.sort_trigger_percent,
            });
        }
        if self.disorder_tolerance_percent >= self.sort_trigger_percent {
            return Err(ConfigError::DisorderAboveTrigger {
                tolerance: self.disorder_tolerance_percent,
                trigger: self.sort_trigger_percent,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn long_sleep(&self) -> Duration {
        Duration::from_micros(self.long_sleep_us)
    }

    #[inline]
    pub fn short_sleep(&self) -> Duration {
        Duration::from_micros(self.short_sleep_us)
    }

    #[inline]
    pub fn backpressure_sleep(&self) -> Duration {
        Duration::from_micros(self.backpressure_sleep_us)
    }

    #[inline]
    pub fn push_wait_sleep(&self) -> Duration {
        Duration::from_micros(self.push_wait_sleep_us)
    }
}
