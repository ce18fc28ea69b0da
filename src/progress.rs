// Progress events and the per-scan broadcaster.
//
// The engine emits typed events into an mpsc channel; whoever owns the
// receiving end (the CLI, the scan manager) decides what to do with them.
// The broadcaster multiplexes one scan's events to any number of
// subscribers and replays a bounded buffer to late arrivals.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::db::models::ScanStatus;

/// Events kept per scan for late subscribers; oldest are discarded.
const REPLAY_BUFFER: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Completed,
    Failed,
}

/// One progress record. Serializes with a `type` discriminant and the
/// stable field names clients rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        status: ScanStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<BTreeMap<String, u64>>,
    },
    Phase {
        phase: String,
        modules: Vec<String>,
    },
    ModuleEnd {
        module: String,
        status: ModuleStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }
}

/// The engine's side of the progress stream.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Fan-out of scan progress to live subscribers with bounded replay.
#[derive(Default)]
pub struct ProgressBroadcaster {
    scans: Mutex<HashMap<String, ScanChannel>>,
}

#[derive(Default)]
struct ScanChannel {
    buffer: VecDeque<ProgressEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and deliver it to every live subscriber. Delivery is
    /// best-effort: a subscriber whose channel is gone is dropped.
    pub async fn publish(&self, scan_id: &str, event: ProgressEvent) {
        let mut scans = self.scans.lock().await;
        let channel = scans.entry(scan_id.to_string()).or_default();
        channel.buffer.push_back(event.clone());
        if channel.buffer.len() > REPLAY_BUFFER {
            channel.buffer.pop_front();
        }
        channel
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Subscribe to a scan's stream. Buffered events arrive first, in
    /// order, then live events.
    pub async fn subscribe(&self, scan_id: &str) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut scans = self.scans.lock().await;
        let channel = scans.entry(scan_id.to_string()).or_default();
        for event in &channel.buffer {
            let _ = tx.send(event.clone());
        }
        channel.subscribers.push(tx);
        rx
    }

    /// Drop every buffer and subscriber list (administrative clear).
    pub async fn clear(&self) {
        self.scans.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_stable_field_names() {
        let event = ProgressEvent::Status {
            status: ScanStatus::Running,
            message: Some("Initializing scan for example.com".into()),
            summary: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "running");
        assert!(json.get("summary").is_none());

        let event = ProgressEvent::ModuleEnd {
            module: "crtsh".into(),
            status: ModuleStatus::Failed,
            error: Some("boom".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "module_end");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay_then_live() {
        let broadcaster = ProgressBroadcaster::new();
        broadcaster.publish("s1", ProgressEvent::log("one")).await;
        broadcaster.publish("s1", ProgressEvent::log("two")).await;

        let mut rx = broadcaster.subscribe("s1").await;
        broadcaster.publish("s1", ProgressEvent::log("three")).await;

        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::log("one"));
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::log("two"));
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::log("three"));
    }

    #[tokio::test]
    async fn replay_buffer_is_bounded() {
        let broadcaster = ProgressBroadcaster::new();
        for i in 0..(REPLAY_BUFFER + 5) {
            broadcaster
                .publish("s1", ProgressEvent::log(format!("event {i}")))
                .await;
        }
        let mut rx = broadcaster.subscribe("s1").await;
        // The five oldest were discarded
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::log("event 5"));
    }

    #[tokio::test]
    async fn dead_subscriber_is_removed_and_others_survive() {
        let broadcaster = ProgressBroadcaster::new();
        let rx_dead = broadcaster.subscribe("s1").await;
        let mut rx_live = broadcaster.subscribe("s1").await;
        drop(rx_dead);

        broadcaster.publish("s1", ProgressEvent::log("hello")).await;
        assert_eq!(rx_live.recv().await.unwrap(), ProgressEvent::log("hello"));

        let scans = broadcaster.scans.lock().await;
        assert_eq!(scans.get("s1").unwrap().subscribers.len(), 1);
    }

    #[tokio::test]
    async fn scans_are_isolated() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe("s1").await;
        broadcaster.publish("s2", ProgressEvent::log("other")).await;
        assert!(rx.try_recv().is_err());
    }
}
