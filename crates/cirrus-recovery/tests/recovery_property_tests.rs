//! Property tests for backoff and classification

use std::time::Duration;

use cirrus_recovery::{ErrorClassifier, RetryConfig};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_delay_never_exceeds_cap_plus_jitter(
        base_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        multiplier in 1.0f64..4.0,
        jitter_ms in 0u64..2_000,
        attempt in 1u32..40,
    ) {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            multiplier,
            jitter_ms,
        };

        let delay = config.delay_with_jitter(attempt);
        prop_assert!(delay >= config.calculate_delay(attempt));
        prop_assert!(delay <= Duration::from_millis(max_ms + jitter_ms));
    }

    #[test]
    fn prop_delay_is_monotonic(
        base_ms in 1u64..5_000,
        multiplier in 1.0f64..4.0,
        attempt in 1u32..30,
    ) {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(base_ms))
            .with_multiplier(multiplier);

        prop_assert!(config.calculate_delay(attempt + 1) >= config.calculate_delay(attempt));
    }

    #[test]
    fn prop_classification_ignores_case(message in "[a-zA-Z ]{0,20}") {
        let classifier = ErrorClassifier::default();
        prop_assert_eq!(
            classifier.is_retryable(&message.to_uppercase()),
            classifier.is_retryable(&message.to_lowercase())
        );
    }
}
