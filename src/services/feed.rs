//! Change notices broadcast after successful writes.
//!
//! Subscribers (range streams) treat every notice as "something changed" and
//! re-query; notices carry just enough to log and filter.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Restored,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    pub kind: ChangeKind,
    /// Affected event; `None` for batch notices.
    pub event_id: Option<String>,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct EventFeed {
    sender: broadcast::Sender<ChangeNotice>,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventFeed { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }

    /// Publish a notice. Having no subscribers is not an error.
    pub fn publish(&self, kind: ChangeKind, event_id: Option<&str>, actor: &str) {
        let notice = ChangeNotice {
            kind,
            event_id: event_id.map(str::to_string),
            actor: actor.to_string(),
        };
        let receivers = self.sender.send(notice).unwrap_or(0);
        tracing::debug!(?kind, ?event_id, receivers, "Published change notice");
    }
}
