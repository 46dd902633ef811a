use event_sequencer::{ConfigError, EngineConfig, OverloadStrategy};
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    // --- defaults ---

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.overload_strategy, OverloadStrategy::Wait);
        assert!(config.disorder_tolerance_percent < config.sort_trigger_percent);
    }

    #[test]
    fn test_sleep_durations_are_microseconds() {
        let config = EngineConfig {
            long_sleep_us: 1_500,
            short_sleep_us: 20,
            backpressure_sleep_us: 7,
            push_wait_sleep_us: 3,
            ..EngineConfig::default()
        };
        assert_eq!(config.long_sleep(), Duration::from_micros(1_500));
        assert_eq!(config.short_sleep(), Duration::from_micros(20));
        assert_eq!(config.backpressure_sleep(), Duration::from_micros(7));
        assert_eq!(config.push_wait_sleep(), Duration::from_micros(3));
    }

    // --- JSON documents ---

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_document_overrides_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"queue_capacity": 256, "overload_strategy": "drop", "max_runtime_queues": 8}"#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.overload_strategy, OverloadStrategy::Drop);
        assert_eq!(config.max_runtime_queues, 8);
        assert_eq!(
            config.sort_trigger_percent,
            EngineConfig::default().sort_trigger_percent
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig {
            queue_capacity: 32,
            backpressure_free_percent: 10,
            ..EngineConfig::default()
        };
        let document = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfig::from_json_str(&document).unwrap(), config);
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let error = EngineConfig::from_json_str("{queue_capacity: 3").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));

        let error = EngineConfig::from_json_str(r#"{"overload_strategy": "retry"}"#).unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    // --- validation ---

    #[test]
    fn test_zero_capacity_is_rejected() {
        let error = EngineConfig::from_json_str(r#"{"queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(error, ConfigError::ZeroCapacity));
    }

    #[test]
    fn test_percent_above_hundred_is_rejected() {
        let config = EngineConfig {
            backpressure_free_percent: 101,
            ..EngineConfig::default()
        };
        match config.validate() {
            Err(ConfigError::PercentOutOfRange { field, value }) => {
                assert_eq!(field, "backpressure_free_percent");
                assert_eq!(value, 101);
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn test_sort_trigger_of_hundred_is_rejected() {
        let error = EngineConfig::from_json_str(
            r#"{"sort_trigger_percent": 100, "disorder_tolerance_percent": 0}"#,
        )
        .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::SortTriggerUnreachable { trigger: 100 }
        ));

        let config = EngineConfig {
            sort_trigger_percent: 99,
            disorder_tolerance_percent: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tolerance_must_stay_below_trigger() {
        let config = EngineConfig {
            sort_trigger_percent: 10,
            disorder_tolerance_percent: 10,
            ..EngineConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::DisorderAboveTrigger {
                tolerance: 10,
                trigger: 10
            }
        ));
        assert!(error.to_string().contains("10"));
    }
}
