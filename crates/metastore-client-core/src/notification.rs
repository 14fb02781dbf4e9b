//! Change-event feed types and the contiguity check applied to each page.
//!
//! Event ids are strictly increasing. A page that skips an id means the
//! server's event cleaner has already removed events the caller never saw,
//! which is reported as [`ClientError::MissingEvents`] unless the caller
//! explicitly tolerates gaps.

use tracing::{debug, error};

use crate::error::{ClientError, Result};

/// One change event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationEvent {
    pub event_id: i64,
    pub event_time: i32,
    pub event_type: String,
    pub db_name: Option<String>,
    pub table_name: Option<String>,
    pub message: String,
    pub message_format: Option<String>,
    pub cat_name: Option<String>,
}

/// Request for the page of events following `last_event`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationEventRequest {
    pub last_event: i64,
    pub max_events: Option<i32>,
    /// Server-side filter: event types to leave out.
    pub event_type_skip_list: Vec<String>,
    /// Server-side filter: only events of this database.
    pub db_name: Option<String>,
    /// Server-side filter: only events of these tables.
    pub table_names: Vec<String>,
}

impl NotificationEventRequest {
    #[must_use]
    pub fn new(last_event: i64, max_events: Option<i32>) -> Self {
        Self {
            last_event,
            max_events,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationEventResponse {
    pub events: Vec<NotificationEvent>,
}

/// Request for the number of events after `from_event_id` in one database.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationEventsCountRequest {
    pub from_event_id: i64,
    pub db_name: String,
}

/// Client-side event predicate. Only matching events reach the caller.
pub type NotificationFilter = dyn Fn(&NotificationEvent) -> bool + Send + Sync;

/// Events delivered to the caller plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationBatch {
    pub events: Vec<NotificationEvent>,
    /// Highest id seen in the unfiltered page, or the request cursor if the page was empty.
    pub last_event_id: i64,
}

/// Check that `events` continue contiguously from `last_seen`, then apply `filter`.
///
/// The contiguity check runs over the unfiltered sequence.
///
/// # Errors
///
/// Returns [`ClientError::MissingEvents`] on the first skipped id unless
/// `allow_gaps` is set.
pub fn check_event_sequence(
    last_seen: i64,
    events: Vec<NotificationEvent>,
    allow_gaps: bool,
    filter: Option<&NotificationFilter>,
) -> Result<NotificationBatch> {
    let mut expected = last_seen + 1;
    let mut cursor = last_seen;
    let mut delivered = Vec::with_capacity(events.len());

    for event in events {
        if !allow_gaps && event.event_id != expected {
            error!(
                expected,
                actual = event.event_id,
                "Requested events are found missing in NOTIFICATION_LOG table. \
                 Probably, cleaner would've cleaned it up. Try setting a higher \
                 event TTL and also ensure the client consumes events before the \
                 cleaner removes them"
            );
            return Err(ClientError::MissingEvents {
                expected,
                actual: event.event_id,
            });
        }
        expected = event.event_id + 1;
        cursor = cursor.max(event.event_id);
        if filter.map_or(true, |accept| accept(&event)) {
            delivered.push(event);
        }
    }

    debug!(
        last_seen,
        cursor,
        delivered = delivered.len(),
        "Checked notification event page"
    );
    Ok(NotificationBatch {
        events: delivered,
        last_event_id: cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(ids: &[i64]) -> Vec<NotificationEvent> {
        ids.iter()
            .map(|&id| NotificationEvent {
                event_id: id,
                event_type: if id % 2 == 0 { "CREATE_TABLE" } else { "INSERT" }.to_string(),
                message: format!("event {id}"),
                ..NotificationEvent::default()
            })
            .collect()
    }

    #[test]
    fn test_contiguous_page() {
        let batch = check_event_sequence(10, events(&[11, 12, 13]), false, None).unwrap();
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.last_event_id, 13);
    }

    #[test]
    fn test_gap_is_fatal() {
        let err = check_event_sequence(10, events(&[11, 13]), false, None).unwrap_err();
        assert!(matches!(
            err,
            ClientError::MissingEvents {
                expected: 12,
                actual: 13
            }
        ));
    }

    #[test]
    fn test_gap_at_head_is_fatal() {
        let err = check_event_sequence(10, events(&[12, 13]), false, None).unwrap_err();
        assert!(matches!(err, ClientError::MissingEvents { expected: 11, .. }));
    }

    #[test]
    fn test_gap_tolerated_when_requested() {
        let batch = check_event_sequence(10, events(&[11, 13]), true, None).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.last_event_id, 13);
    }

    #[test]
    fn test_filter_applies_after_contiguity() {
        let only_inserts = |e: &NotificationEvent| e.event_type == "INSERT";
        let batch =
            check_event_sequence(10, events(&[11, 12, 13]), false, Some(&only_inserts)).unwrap();
        let ids: Vec<i64> = batch.events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![11, 13]);
        assert_eq!(batch.last_event_id, 13);

        // A gap hidden behind the filter is still detected.
        let err = check_event_sequence(10, events(&[11, 13, 14]), false, Some(&only_inserts))
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingEvents { .. }));
    }

    #[test]
    fn test_empty_page_keeps_cursor() {
        let batch = check_event_sequence(42, Vec::new(), false, None).unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.last_event_id, 42);
    }
}
