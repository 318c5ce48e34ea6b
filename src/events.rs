//! Invocation telemetry log.
//!
//! Thin async facade over the events table. Appends are fire-and-forget
//! with respect to the caller's outcome: a failed write is logged and
//! swallowed so it can never alter an invocation's already-determined
//! success or failure.

use std::sync::Arc;

use tracing::warn;

use crate::store::{CapabilityStore, EventQuery, EventRow, EventStats, NewEvent, StoreResult};

/// Writer/reader for invocation events.
pub struct EventLog {
    store: Arc<CapabilityStore>,
}

impl EventLog {
    pub fn new(store: Arc<CapabilityStore>) -> Self {
        Self { store }
    }

    /// Append one event. Write failures are swallowed.
    pub async fn append(&self, event: NewEvent) {
        if let Err(e) = self.store.insert_event(&event) {
            warn!(
                addon = %event.addon_name,
                element = %event.element_name,
                error = %e,
                "Failed to record invocation event"
            );
        }
    }

    /// Read events newest-first with optional filters.
    pub async fn query(&self, query: &EventQuery) -> StoreResult<Vec<EventRow>> {
        self.store.query_events(query)
    }

    /// Aggregate statistics over the trailing window.
    pub async fn stats(&self, window_hours: i64) -> StoreResult<EventStats> {
        self.store.event_stats(window_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ElementType;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_query() {
        let store = Arc::new(CapabilityStore::open_in_memory().unwrap());
        let log = EventLog::new(store);

        log.append(NewEvent::success(
            "tool_call",
            "echo",
            ElementType::Tool,
            "alpha",
            json!({"a": 1}),
            json!({"a": 1}),
            1,
        ))
        .await;

        let rows = log.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "tool_call");

        let stats = log.stats(24).await.unwrap();
        assert_eq!(stats.total, 1);
    }
}
