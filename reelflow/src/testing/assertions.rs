//! Assertions over progress event streams.

use crate::core::{ProgressEvent, ProjectStatus};

/// Statuses carried by the `status_change` events, in order.
#[must_use]
pub fn statuses(events: &[ProgressEvent]) -> Vec<ProjectStatus> {
    events.iter().filter_map(ProgressEvent::status).collect()
}

/// Asserts the `status_change` events carry exactly `expected`.
pub fn assert_status_path(events: &[ProgressEvent], expected: &[ProjectStatus]) {
    let actual = statuses(events);
    assert_eq!(
        actual, expected,
        "Expected status path {expected:?}, got {actual:?}"
    );
}

/// Asserts the observed statuses follow the happy path in order, optionally
/// ending in a single `failed` or `cancelled`.
pub fn assert_status_subsequence(events: &[ProgressEvent]) {
    let observed = statuses(events);
    let mut last_rank = None;
    for (i, status) in observed.iter().enumerate() {
        match status.happy_path_rank() {
            Some(rank) => {
                assert!(
                    last_rank.map_or(true, |last| rank > last),
                    "Status {status} out of order in {observed:?}"
                );
                last_rank = Some(rank);
            }
            None => assert_eq!(
                i + 1,
                observed.len(),
                "Terminal status {status} is not last in {observed:?}"
            ),
        }
    }
}

/// Asserts the progress values of `status_change` events never decrease and
/// stay within `[0, 1]`.
pub fn assert_progress_monotonic(events: &[ProgressEvent]) {
    let mut last = 0.0_f64;
    for progress in events.iter().filter_map(ProgressEvent::progress) {
        assert!(
            (0.0..=1.0).contains(&progress),
            "Progress {progress} outside [0, 1]"
        );
        assert!(progress >= last, "Progress went from {last} to {progress}");
        last = progress;
    }
}

/// Asserts no event of type `event_type` was emitted.
pub fn assert_no_event(events: &[ProgressEvent], event_type: &str) {
    assert!(
        events.iter().all(|e| e.event_type() != event_type),
        "Unexpected {event_type} event in {events:?}"
    );
}
