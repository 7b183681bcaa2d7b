//! Fan-out of lifecycle events to WebSocket subscribers.

use crate::model::{RequestSummary, SseEventRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Tagged envelope matching the WebSocket wire contract.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    #[serde(rename = "new_request")]
    NewRequest { data: RequestSummary },
    #[serde(rename = "request_complete")]
    RequestComplete { data: RequestSummary },
    #[serde(rename = "sse_event")]
    SseEvent { request_id: Uuid, event: SseEventRecord },
}

/// A set of subscriber channels, each fed pre-serialized JSON text so a
/// broadcast only pays the serialization cost once.
#[derive(Default)]
pub struct Hub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its id plus the receiving end
    /// of its channel.
    pub fn connect(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.lock().expect("hub lock poisoned").insert(id, tx);
        (id, rx)
    }

    pub fn disconnect(&self, id: u64) {
        self.subscribers.lock().expect("hub lock poisoned").remove(&id);
    }

    /// Serialize `message` once, then attempt delivery to every subscriber.
    /// A subscriber whose channel is closed or full is dropped — best
    /// effort, never blocking the caller.
    pub fn broadcast(&self, message: &BroadcastMessage) {
        let Ok(text) = serde_json::to_string(message) else { return };
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|_, tx| tx.try_send(text.clone()).is_ok());
    }

    pub fn broadcast_sse_event(&self, request_id: Uuid, event: SseEventRecord) {
        self.broadcast(&BroadcastMessage::SseEvent { request_id, event });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_summary() -> RequestSummary {
        RequestSummary {
            id: Uuid::new_v4(),
            sequence: 1,
            timestamp: Utc::now(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/".to_string(),
            status_code: None,
            agent_type: "unknown".to_string(),
            protocol_type: "unknown".to_string(),
            duration_ms: None,
            response_size: None,
            is_streaming: false,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers() {
        let hub = Hub::new();
        let (_id1, mut rx1) = hub.connect();
        let (_id2, mut rx2) = hub.connect();
        hub.broadcast(&BroadcastMessage::NewRequest { data: sample_summary() });
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_on_next_broadcast() {
        let hub = Hub::new();
        let (_id, rx) = hub.connect();
        drop(rx);
        assert_eq!(hub.subscriber_count(), 1);
        hub.broadcast(&BroadcastMessage::NewRequest { data: sample_summary() });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn per_subscriber_order_is_preserved() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.connect();
        for _ in 0..3 {
            hub.broadcast(&BroadcastMessage::NewRequest { data: sample_summary() });
        }
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
