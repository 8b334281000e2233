//! Rolling analytics buffer persisted under `content-analytics`.

use tracing::debug;

use fragmentsync_shared::{AnalyticsEvent, Result};
use fragmentsync_storage::Storage;

/// Number of events kept; older events are dropped first.
pub const ANALYTICS_CAPACITY: usize = 100;

/// Append `event` to the persisted buffer, keeping the newest [`ANALYTICS_CAPACITY`].
pub async fn record_event(storage: &Storage, event: AnalyticsEvent) -> Result<()> {
    let mut events = storage.load_analytics().await?;
    events.push(event);
    truncate_oldest(&mut events, ANALYTICS_CAPACITY);
    storage.save_analytics(&events).await?;
    debug!(buffered = events.len(), "analytics event recorded");
    Ok(())
}

/// The newest `limit` events, newest first.
pub async fn recent_events(storage: &Storage, limit: usize) -> Result<Vec<AnalyticsEvent>> {
    let events = storage.load_analytics().await?;
    Ok(events.into_iter().rev().take(limit).collect())
}

fn truncate_oldest<T>(events: &mut Vec<T>, capacity: usize) {
    if events.len() > capacity {
        let excess = events.len() - capacity;
        events.drain(..excess);
    }
}
