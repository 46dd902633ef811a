/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Tests for rejected pushes, queue allocation limits and invalid
//! configurations.

#[cfg(test)]
mod tests {
    use crate::sequencer::{
        Category, ConfigError, END_OF_TIME, EngineConfig, EngineState, OverloadStrategy,
        Sequencer, SequencerError, TIME_PULSE_QUEUE,
    };
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Ev {
        key: u64,
        category: Category,
    }

    fn normed(key: u64) -> Ev {
        Ev {
            key,
            category: Category::NormedElement,
        }
    }

    fn classify(ev: &Ev) -> (u64, Category) {
        (ev.key, ev.category)
    }

    fn recording_sequencer(config: EngineConfig) -> (Sequencer<Ev>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sequencer = Sequencer::builder("errors", move |ev: Ev| {
            sink.lock().unwrap().push(ev.key);
        })
        .config(config)
        .classifier(classify)
        .build()
        .unwrap();
        (sequencer, seen)
    }

    #[test]
    fn test_undefined_category_is_rejected() {
        let (sequencer, seen) = recording_sequencer(EngineConfig::default());
        let queue = sequencer.add_queue().unwrap();

        let result = sequencer.push(
            queue,
            Ev {
                key: 1,
                category: Category::Undefined,
            },
        );
        assert_eq!(result, Err(SequencerError::UndefinedClassification));
        sequencer.shutdown();

        assert!(seen.lock().unwrap().is_empty());
        let queue_stats = sequencer.queue_stats(queue).unwrap();
        assert_eq!(queue_stats.input_dropped_count, 1);
        assert_eq!(queue_stats.pushed_count, 0);
        assert_eq!(sequencer.stats().input_dropped, 1);
    }

    #[test]
    fn test_default_classifier_passes_everything_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sequencer = Sequencer::builder("default", move |value: u32| {
            sink.lock().unwrap().push(value);
        })
        .build()
        .unwrap();
        sequencer.per_thread_push(7).unwrap();
        sequencer.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_reserved_and_unknown_indices() {
        let (sequencer, _seen) = recording_sequencer(EngineConfig::default());
        assert_eq!(
            sequencer.push(0, normed(1)),
            Err(SequencerError::ReservedQueue { index: 0 })
        );
        assert_eq!(
            sequencer.push(1, normed(1)),
            Err(SequencerError::ReservedQueue { index: 1 })
        );
        assert_eq!(
            sequencer.push(40, normed(1)),
            Err(SequencerError::UnknownQueue { index: 40 })
        );
    }

    #[test]
    fn test_push_from_foreign_thread_is_refused() {
        let (sequencer, _seen) = recording_sequencer(EngineConfig::default());
        let queue = sequencer.add_queue().unwrap();

        let result = thread::scope(|scope| {
            scope
                .spawn(|| sequencer.push(queue, normed(1)))
                .join()
                .unwrap()
        });
        assert_eq!(result, Err(SequencerError::NotQueueOwner { index: queue }));
        assert_eq!(sequencer.queue_stats(queue).unwrap().pushed_count, 0);
    }

    #[test]
    fn test_queue_slots_run_out() {
        let config = EngineConfig {
            max_runtime_queues: 2,
            ..EngineConfig::default()
        };
        let (sequencer, _seen) = recording_sequencer(config);

        assert_eq!(sequencer.add_queue(), Ok(2));
        assert_eq!(sequencer.add_sortable_queue(), Ok(3));
        assert_eq!(
            sequencer.add_queue(),
            Err(SequencerError::QueueCapacityExhausted { limit: 2 })
        );
        assert_eq!(sequencer.number_of_queues(), 4);
    }

    #[test]
    fn test_full_queue_drops_under_drop_strategy() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        // The first dispatch parks the extractor until released.
        let mut gate = Some((entered_tx, release_rx));
        let sequencer = Sequencer::builder("drop", move |ev: Ev| {
            if let Some((entered, release)) = gate.take() {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            sink.lock().unwrap().push(ev.key);
        })
        .config(EngineConfig {
            queue_capacity: 4,
            overload_strategy: OverloadStrategy::Drop,
            ..EngineConfig::default()
        })
        .classifier(classify)
        .build()
        .unwrap();
        let queue = sequencer.add_queue().unwrap();

        sequencer.push(queue, normed(1)).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let results: Vec<_> = (2..=7)
            .map(|key| sequencer.push(queue, normed(key)))
            .collect();
        assert!(results[..4].iter().all(Result::is_ok));
        assert_eq!(results[4], Err(SequencerError::PushRejected { index: queue }));
        assert_eq!(results[5], Err(SequencerError::PushRejected { index: queue }));

        let queue_stats = sequencer.queue_stats(queue).unwrap();
        assert_eq!(queue_stats.used, 4);
        assert_eq!(queue_stats.used, queue_stats.capacity);
        assert_eq!(queue_stats.input_dropped_count, 2);

        release_tx.send(()).unwrap();
        sequencer.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        let stats = sequencer.stats();
        assert_eq!(stats.popped + stats.input_dropped, 7);
    }

    #[test]
    fn test_invalid_config_is_rejected_at_build() {
        let config = EngineConfig {
            sort_trigger_percent: 20,
            disorder_tolerance_percent: 30,
            ..EngineConfig::default()
        };
        let built = Sequencer::builder("invalid", |_: Ev| {})
            .config(config)
            .build();
        assert!(matches!(
            built,
            Err(ConfigError::DisorderAboveTrigger {
                tolerance: 30,
                trigger: 20
            })
        ));

        let built = Sequencer::builder("empty", |_: Ev| {})
            .config(EngineConfig {
                queue_capacity: 0,
                ..EngineConfig::default()
            })
            .build();
        assert!(matches!(built, Err(ConfigError::ZeroCapacity)));

        let built = Sequencer::builder("unsorted", |_: Ev| {})
            .config(EngineConfig {
                sort_trigger_percent: 100,
                disorder_tolerance_percent: 0,
                ..EngineConfig::default()
            })
            .build();
        assert!(matches!(
            built,
            Err(ConfigError::SortTriggerUnreachable { trigger: 100 })
        ));
    }

    #[test]
    fn test_pushes_after_shutdown_are_refused() {
        let (sequencer, _seen) = recording_sequencer(EngineConfig::default());
        let queue = sequencer.add_queue().unwrap();
        sequencer.shutdown();

        let stopping = Err(SequencerError::InvalidEngineState {
            state: EngineState::Stopping,
        });
        assert_eq!(sequencer.push(queue, normed(1)), stopping);
        assert_eq!(sequencer.push_periodic_timer(normed(1)), stopping);
        assert_eq!(sequencer.push_time_pulse(normed(1)).map(|_| ()), stopping);
        assert_eq!(sequencer.add_queue().map(|_| ()), stopping);
        assert_eq!(sequencer.stats().input_dropped, 3);
    }

    #[test]
    fn test_end_of_time_pulse_starts_flushing() {
        let (sequencer, seen) = recording_sequencer(EngineConfig::default());
        let queue = sequencer.add_queue().unwrap();
        sequencer.push(queue, normed(5)).unwrap();

        let end = Ev {
            key: END_OF_TIME,
            category: Category::NormedEvent,
        };
        assert_eq!(sequencer.push_time_pulse(end), Ok(true));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sequencer.state() != EngineState::Flushing && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sequencer.state(), EngineState::Flushing);

        assert_eq!(
            sequencer.push(queue, normed(6)),
            Err(SequencerError::InvalidEngineState {
                state: EngineState::Flushing
            })
        );
        assert_eq!(sequencer.push_time_pulse(normed(7)), Ok(true));
        assert!(sequencer.add_queue().is_err());

        sequencer.shutdown();
        assert_eq!(sequencer.state(), EngineState::Stopping);
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&5));
        assert!(seen.contains(&END_OF_TIME));
        assert_eq!(seen.last(), Some(&7));
        assert_eq!(
            sequencer.queue_stats(TIME_PULSE_QUEUE).unwrap().popped_count,
            2
        );
    }
}
