use crate::ErrorLocation;
use std::panic::Location;

/// **VALUE**: Verifies that `ErrorLocation::from()` captures the file and a real line/column.
///
/// **WHY THIS MATTERS**: Every error variant in the workspace carries an ErrorLocation.
/// Without an accurate capture, KMS and framing failures in the logs lose the one clue
/// that points back to the failing call site.
///
/// **BUG THIS CATCHES**: Would catch if file path or line/column extraction breaks.
#[test]
fn given_location_caller_when_error_location_created_then_captures_file_line_column() {
    // GIVEN: A helper that captures its caller
    #[track_caller]
    fn capture() -> ErrorLocation {
        ErrorLocation::from(Location::caller())
    }

    // WHEN: Capturing from this test
    let expected_line = line!() + 1;
    let location = capture();

    // THEN: Should point at this file and line
    assert!(location.file.contains("error_location.rs"));
    assert_eq!(location.line, expected_line);
    assert!(location.column > 0);
}

/// **VALUE**: Verifies that ErrorLocation Display produces `[file:line:column]`.
///
/// **WHY THIS MATTERS**: Every error message ends with this suffix; log scraping depends on it.
///
/// **BUG THIS CATCHES**: Would catch a Display change that drops brackets or fields.
#[test]
fn given_error_location_when_formatted_then_produces_bracketed_format() {
    // GIVEN: A fixed location
    let location = ErrorLocation {
        file: "src/kms/session.rs",
        line: 42,
        column: 7,
    };

    // WHEN: Formatting
    let formatted = location.to_string();

    // THEN: Bracketed triple
    assert_eq!(formatted, "[src/kms/session.rs:42:7]");
}

/// **VALUE**: Verifies that `#[track_caller]` gives distinct call sites distinct lines.
///
/// **WHY THIS MATTERS**: Error constructors are `#[track_caller]`; if propagation breaks every
/// error would report the constructor's line instead of where it was raised.
///
/// **BUG THIS CATCHES**: Would catch removal of `#[track_caller]` from the capture path.
#[test]
fn given_multiple_call_sites_when_capturing_location_then_each_has_unique_line() {
    // GIVEN: A helper function that captures location
    #[track_caller]
    fn capture_location() -> ErrorLocation {
        ErrorLocation::from(Location::caller())
    }

    // WHEN: Capturing location from different call sites
    let loc1 = capture_location();
    let loc2 = capture_location();

    // THEN: Should have same file but sequential line numbers
    assert_eq!(loc1.file, loc2.file);
    assert_eq!(loc1.line + 1, loc2.line);
}
