// Unit tests for error module

use crate::error::SidecarAppError;

use sidecar_core::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Verifies app errors print their message and where they were raised.
///
/// **WHY THIS MATTERS**: The process prints the error to stderr before exiting; operators
/// need the location to find the failing step.
///
/// **BUG THIS CATCHES**: Would catch the location being dropped from the Display format.
#[test]
fn given_logger_error_when_displayed_then_contains_message_and_location() {
    // GIVEN: A logger error
    let err = SidecarAppError::Logger {
        message: String::from("disk full"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Formatting it
    let text = err.to_string();

    // THEN: Message and source file present
    assert!(text.starts_with("Logger Error: disk full"), "{text}");
    assert!(text.contains("error.rs"), "{text}");
}

/// **VALUE**: Verifies config errors pass through unchanged.
///
/// **BUG THIS CATCHES**: Would catch the wrapper hiding which config value was invalid.
#[test]
fn given_config_error_when_converted_then_displays_transparently() {
    // GIVEN: A config validation error
    let config_error = ConfigError::ValidationError {
        location: ErrorLocation::from(Location::caller()),
        reason: String::from("batch_size must be greater than 0"),
    };
    let expected = config_error.to_string();

    // WHEN: Converting into the app error
    let err = SidecarAppError::from(config_error);

    // THEN: Same text, config variant
    assert_eq!(err.to_string(), expected);
    assert!(matches!(err, SidecarAppError::Config(_)));
}
