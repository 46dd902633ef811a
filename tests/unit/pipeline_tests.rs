use event_sequencer::{Category, EngineConfig, EngineState, Sequencer, SequencerError};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, PartialEq)]
struct Packet {
    timestamp: u64,
    kind: PacketKind,
    source: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PacketKind {
    Data,
    Control,
    Noise,
    Malformed,
}

fn classify(packet: &Packet) -> (u64, Category) {
    let category = match packet.kind {
        PacketKind::Data => Category::NormedElement,
        PacketKind::Control => Category::InstantPassEvent,
        PacketKind::Noise => Category::InstantDropElement,
        PacketKind::Malformed => Category::Undefined,
    };
    (packet.timestamp, category)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn pipeline(config: EngineConfig) -> (Arc<Sequencer<Packet>>, Arc<Mutex<Vec<Packet>>>) {
        init_tracing();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sequencer = Sequencer::builder("pipeline", move |packet: Packet| {
            sink.lock().unwrap().push(packet);
        })
        .config(config)
        .classifier(classify)
        .build()
        .unwrap();
        (Arc::new(sequencer), seen)
    }

    #[test]
    fn test_mixed_traffic_from_several_capture_threads() {
        const SOURCES: usize = 3;
        const PER_SOURCE: u64 = 400;
        let (sequencer, seen) = pipeline(EngineConfig {
            queue_capacity: 32,
            long_sleep_us: 100,
            ..EngineConfig::default()
        });

        let handles: Vec<_> = (0..SOURCES)
            .map(|source| {
                let sequencer = Arc::clone(&sequencer);
                thread::spawn(move || {
                    let mut rejected: u64 = 0;
                    for n in 0..PER_SOURCE {
                        let kind = match n % 10 {
                            3 => PacketKind::Control,
                            6 => PacketKind::Noise,
                            9 => PacketKind::Malformed,
                            _ => PacketKind::Data,
                        };
                        let packet = Packet {
                            timestamp: n * SOURCES as u64 + source as u64,
                            kind,
                            source,
                        };
                        match sequencer.per_thread_push(packet) {
                            Ok(()) => {}
                            Err(SequencerError::UndefinedClassification) => rejected += 1,
                            Err(other) => panic!("unexpected push error: {other}"),
                        }
                    }
                    rejected
                })
            })
            .collect();
        let rejected: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        sequencer.shutdown();

        let seen = seen.lock().unwrap();
        let per_source_malformed = PER_SOURCE / 10;
        let per_source_noise = PER_SOURCE / 10;
        assert_eq!(rejected, SOURCES as u64 * per_source_malformed);
        assert_eq!(
            seen.len() as u64,
            SOURCES as u64 * (PER_SOURCE - per_source_malformed - per_source_noise)
        );
        assert!(seen.iter().all(|p| p.kind != PacketKind::Noise));

        // Per source, data packets leave in the order they were captured.
        for source in 0..SOURCES {
            let timestamps: Vec<u64> = seen
                .iter()
                .filter(|p| p.source == source && p.kind == PacketKind::Data)
                .map(|p| p.timestamp)
                .collect();
            assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        }

        let stats = sequencer.stats();
        assert_eq!(stats.state, EngineState::Stopping);
        assert_eq!(stats.output_dropped, SOURCES as u64 * per_source_noise);
        assert_eq!(stats.input_dropped, rejected);
        assert_eq!(stats.popped, seen.len() as u64);
    }

    #[test]
    fn test_time_pulses_and_timers_interleave_with_data() {
        let (sequencer, seen) = pipeline(EngineConfig::default());
        let queue = sequencer.add_queue().unwrap();

        for timestamp in [10, 20, 30] {
            sequencer
                .push(
                    queue,
                    Packet {
                        timestamp,
                        kind: PacketKind::Data,
                        source: 0,
                    },
                )
                .unwrap();
        }
        sequencer
            .push_periodic_timer(Packet {
                timestamp: 25,
                kind: PacketKind::Data,
                source: 99,
            })
            .unwrap();
        assert_eq!(
            sequencer.push_time_pulse(Packet {
                timestamp: 5,
                kind: PacketKind::Data,
                source: 100,
            }),
            Ok(true)
        );
        sequencer.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().any(|p| p.source == 99));
        assert!(seen.iter().any(|p| p.source == 100));
        let data: Vec<u64> = seen
            .iter()
            .filter(|p| p.source == 0)
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(data, vec![10, 20, 30]);
    }

    #[test]
    fn test_queue_stats_describe_every_queue() {
        let (sequencer, _seen) = pipeline(EngineConfig::default());
        let plain = sequencer.add_queue().unwrap();
        let sorted = sequencer.add_sortable_queue().unwrap();
        sequencer.shutdown();

        let all = sequencer.all_queue_stats();
        assert_eq!(all.len(), 4);
        assert_eq!(all[plain].index, plain);
        assert_eq!(all[sorted].index, sorted);
        let json = serde_json::to_string(&all).unwrap();
        assert!(json.contains("\"Sorted\""));
    }
}
