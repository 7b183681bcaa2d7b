//! Canonical capture record schema and its list-view projection.

use crate::sse::SseEvent as WireSseEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One decoded Server-Sent-Events record belonging to a single [`CapturedRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEventRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    /// 0-based ordinal within the owning record; gap-free and strictly increasing.
    pub event_index: u32,
    pub event_type: String,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl SseEventRecord {
    pub fn from_wire(request_id: Uuid, event_index: u32, wire: WireSseEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            event_index,
            event_type: wire.event_type,
            data: wire.data,
            timestamp,
        }
    }
}

/// Case-insensitive-by-convention header map; insertion order is preserved
/// for display but carries no semantic meaning.
pub type Headers = HashMap<String, String>;

/// The canonical unit of capture: one observed HTTP transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,

    pub agent_type: String,
    pub protocol_type: String,
    pub api_provider: Option<String>,
    pub session_id: Option<String>,
    /// Reserved; the mechanism to populate it is unspecified upstream.
    pub source_pid: Option<u32>,
    pub conversation_id: Option<String>,

    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub request_headers: Headers,
    pub request_body: String,
    pub request_size: u64,

    pub status_code: Option<u16>,
    pub response_headers: Option<Headers>,
    pub response_body: Option<String>,
    pub response_size: Option<u64>,
    pub duration_ms: Option<u64>,
    pub ttfb_ms: Option<u64>,
    pub is_streaming: bool,
    pub sse_events: Vec<SseEventRecord>,
}

impl CapturedRequest {
    /// Project to the fields a list view needs.
    pub fn to_summary(&self) -> RequestSummary {
        RequestSummary {
            id: self.id,
            sequence: self.sequence,
            timestamp: self.timestamp,
            method: self.method.clone(),
            host: self.host.clone(),
            path: self.path.clone(),
            status_code: self.status_code,
            agent_type: self.agent_type.clone(),
            protocol_type: self.protocol_type.clone(),
            duration_ms: self.duration_ms,
            response_size: self.response_size,
            is_streaming: self.is_streaming,
        }
    }
}

/// List-view projection of [`CapturedRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status_code: Option<u16>,
    pub agent_type: String,
    pub protocol_type: String,
    pub duration_ms: Option<u64>,
    pub response_size: Option<u64>,
    pub is_streaming: bool,
}

/// Truncate `body` to `max_bytes`, appending a marker noting the true size,
/// and return `(stored_text, true_byte_len)`. `*_size` fields must always
/// carry the true length even when the text itself was cut.
pub fn truncate_body(body: &str, max_bytes: usize) -> (String, u64) {
    let true_len = body.len() as u64;
    if body.len() <= max_bytes {
        return (body.to_string(), true_len);
    }
    let mut cut = max_bytes;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let marker = format!("...[truncated, {} bytes total]", body.len());
    (format!("{}{}", &body[..cut], marker), true_len)
}

/// Aggregate counters returned by `GET /api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_requests: u64,
    pub unique_hosts: u64,
    pub unique_agents: u64,
    pub total_request_bytes: u64,
    pub total_response_bytes: u64,
    pub avg_duration_ms: f64,
    pub streaming_count: u64,
}
