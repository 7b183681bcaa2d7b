//! Orchestrates the capture pipeline (C1-C7) per proxy flow.
//!
//! A flow's three hooks — request, response-headers, response — are driven
//! by whatever transport implements [`ProxyHooks`]; the controller itself
//! has no transport dependency, matching the spec's treatment of the MITM
//! engine as an external collaborator with a fixed hook interface.

use crate::classify::{detect_agent, detect_protocol};
use crate::config::Config;
use crate::hub::{BroadcastMessage, Hub};
use crate::model::{truncate_body, CapturedRequest, Headers, SseEventRecord};
use crate::session::SessionTracker;
use crate::sse::{is_sse_content_type, SseParser};
use crate::store::{FieldValue, Store};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Stable per-flow handle, resolving the "flow identity" requirement a
/// target language without the source's pointer-identity hashing needs.
pub type FlowId = Uuid;

struct PendingFlow {
    captured: CapturedRequest,
    start: Instant,
    is_sse: bool,
    sse_parser: Option<SseParser>,
    sse_events: Vec<SseEventRecord>,
    ttfb_ms: Option<u64>,
}

/// Drives one [`CapturedRequest`] through the proxy-library hooks,
/// classifying, persisting, and broadcasting as it goes. Cross-flow shared
/// state (`pending`, the sequence counter, `Store`, `Hub`) is safe under
/// concurrent callers; mutation of a single flow's own state happens only
/// from that flow's own task.
pub struct FlowController {
    store: Arc<Store>,
    hub: Arc<Hub>,
    sessions: Mutex<SessionTracker>,
    pending: Mutex<HashMap<FlowId, PendingFlow>>,
    sequence: AtomicU64,
    max_body_size: usize,
}

impl FlowController {
    pub fn new(store: Arc<Store>, hub: Arc<Hub>, config: &Config) -> Self {
        Self {
            store,
            hub,
            sessions: Mutex::new(SessionTracker::new()),
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(1),
            max_body_size: config.max_body_size,
        }
    }

    /// Request hook: classify, assign sequence, construct the record,
    /// persist, and broadcast `new_request`. Returns the flow id the
    /// caller must pass to the remaining hooks.
    pub async fn on_request(
        &self,
        method: &str,
        url: &str,
        host: &str,
        path: &str,
        headers: Headers,
        body_text: &str,
    ) -> FlowId {
        let flow_id = Uuid::new_v4();
        let result = self.handle_request(flow_id, method, url, host, path, headers, body_text).await;
        if let Err(err) = result {
            tracing::error!(error = %err, %method, %url, "flow controller request hook failed");
        }
        flow_id
    }

    async fn handle_request(
        &self,
        flow_id: FlowId,
        method: &str,
        url: &str,
        host: &str,
        path: &str,
        headers: Headers,
        body_text: &str,
    ) -> anyhow::Result<()> {
        let body_json = serde_json::from_str::<serde_json::Value>(body_text).ok();
        let agent_type = detect_agent(&headers);
        let protocol_match = detect_protocol(host, path, body_json.as_ref());

        let now = chrono::Utc::now();
        let session = self.sessions.lock().unwrap().track(
            &agent_type,
            host,
            Some(protocol_match.protocol.clone()),
            protocol_match.provider.clone(),
            now,
        );

        let (stored_body, request_size) = truncate_body(body_text, self.max_body_size);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let captured = CapturedRequest {
            id: flow_id,
            sequence,
            timestamp: now,
            agent_type,
            protocol_type: protocol_match.protocol,
            api_provider: protocol_match.provider,
            session_id: Some(session.id),
            source_pid: None,
            conversation_id: None,
            method: method.to_string(),
            url: url.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            request_headers: headers,
            request_body: stored_body,
            request_size,
            status_code: None,
            response_headers: None,
            response_body: None,
            response_size: None,
            duration_ms: None,
            ttfb_ms: None,
            is_streaming: false,
            sse_events: Vec::new(),
        };

        let summary = captured.to_summary();
        self.store.save_request(&captured).await?;
        self.hub.broadcast(&BroadcastMessage::NewRequest { data: summary });
        self.pending.lock().unwrap().insert(
            flow_id,
            PendingFlow { captured, start: Instant::now(), is_sse: false, sse_parser: None, sse_events: Vec::new(), ttfb_ms: None },
        );
        Ok(())
    }

    /// Response-headers hook: if the content type names SSE, mark the flow
    /// streaming and attach a fresh parser.
    pub fn on_response_headers(&self, flow_id: FlowId, content_type: &str) {
        if !is_sse_content_type(content_type) {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        if let Some(flow) = pending.get_mut(&flow_id) {
            flow.is_sse = true;
            flow.sse_parser = Some(SseParser::new());
        }
    }

    /// Per-chunk stream callback: feed bytes through the attached parser,
    /// recording time-to-first-byte on the first call.
    pub fn on_stream_chunk(&self, flow_id: FlowId, data: &[u8]) {
        let mut pending = self.pending.lock().unwrap();
        let Some(flow) = pending.get_mut(&flow_id) else { return };
        if flow.ttfb_ms.is_none() {
            flow.ttfb_ms = Some(flow.start.elapsed().as_millis() as u64);
        }
        if let Some(parser) = flow.sse_parser.as_mut() {
            if !data.is_empty() {
                let events = parser.feed(data);
                let base = flow.sse_events.len() as u32;
                let new: Vec<_> = events
                    .into_iter()
                    .enumerate()
                    .map(|(i, wire)| SseEventRecord::from_wire(flow_id, base + i as u32, wire, chrono::Utc::now()))
                    .collect();
                flow.sse_events.extend(new);
            }
        }
    }

    /// Response hook: finalize the record, persist the update plus any
    /// buffered SSE events, and broadcast `request_complete`.
    pub async fn on_response(&self, flow_id: FlowId, status_code: u16, response_headers: Headers, body_text: &str) {
        if let Err(err) = self.handle_response(flow_id, status_code, response_headers, body_text).await {
            tracing::error!(error = %err, %flow_id, "flow controller response hook failed");
        }
    }

    async fn handle_response(
        &self,
        flow_id: FlowId,
        status_code: u16,
        response_headers: Headers,
        body_text: &str,
    ) -> anyhow::Result<()> {
        let flow = {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&flow_id)
        };
        let Some(mut flow) = flow else { return Ok(()) };

        let duration_ms = flow.start.elapsed().as_millis() as u64;
        flow.captured.status_code = Some(status_code);
        flow.captured.response_headers = Some(response_headers.clone());
        flow.captured.duration_ms = Some(duration_ms);
        flow.captured.ttfb_ms = flow.ttfb_ms;

        let (response_body, response_size) = if flow.is_sse {
            flow.captured.is_streaming = true;
            if let Some(parser) = flow.sse_parser.as_mut() {
                let residue = parser.flush();
                let base = flow.sse_events.len() as u32;
                flow.sse_events.extend(
                    residue
                        .into_iter()
                        .enumerate()
                        .map(|(i, wire)| SseEventRecord::from_wire(flow_id, base + i as u32, wire, chrono::Utc::now())),
                );
            }
            let canonical = canonicalize_sse(&flow.sse_events);
            truncate_body(&canonical, self.max_body_size)
        } else {
            truncate_body(body_text, self.max_body_size)
        };
        flow.captured.response_body = Some(response_body.clone());
        flow.captured.response_size = Some(response_size);
        flow.captured.sse_events = flow.sse_events.clone();

        let mut update = HashMap::new();
        update.insert("status_code".to_string(), FieldValue::Int(Some(status_code as i64)));
        update.insert(
            "response_headers".to_string(),
            FieldValue::Text(Some(serde_json::to_string(&response_headers)?)),
        );
        update.insert("response_body".to_string(), FieldValue::Text(Some(response_body)));
        update.insert("response_size".to_string(), FieldValue::Int(Some(response_size as i64)));
        update.insert("duration_ms".to_string(), FieldValue::Int(Some(duration_ms as i64)));
        update.insert("ttfb_ms".to_string(), FieldValue::Int(flow.ttfb_ms.map(|v| v as i64)));
        update.insert("is_streaming".to_string(), FieldValue::Bool(flow.captured.is_streaming));
        self.store.update_request(flow_id, update).await?;

        if !flow.sse_events.is_empty() {
            self.store.save_sse_events(&flow.sse_events).await?;
            for event in &flow.sse_events {
                self.hub.broadcast_sse_event(flow_id, event.clone());
            }
        }

        self.hub.broadcast(&BroadcastMessage::RequestComplete { data: flow.captured.to_summary() });
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

/// Reassemble decoded events into the canonical textual form used as the
/// streaming response body and for `response_size`.
fn canonicalize_sse(events: &[SseEventRecord]) -> String {
    let mut parts = Vec::new();
    for event in events {
        parts.push(format!("event: {}", event.event_type));
        parts.push(format!("data: {}", event.data));
        parts.push(String::new());
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    async fn controller() -> FlowController {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hub = Arc::new(Hub::new());
        FlowController::new(store, hub, &Config::test_default())
    }

    #[tokio::test]
    async fn claude_cli_non_stream_scenario_a() {
        let controller = controller().await;
        let mut headers = Map::new();
        headers.insert("User-Agent".to_string(), "claude-cli/1.0.118 (external, cli)".to_string());
        headers.insert("Anthropic-Version".to_string(), "2023-06-01".to_string());
        let flow_id = controller
            .on_request(
                "POST",
                "https://api.anthropic.com/v1/messages",
                "api.anthropic.com",
                "/v1/messages",
                headers,
                r#"{"model":"claude-3","max_tokens":8,"messages":[{"role":"user","content":"hi"}]}"#,
            )
            .await;
        controller.on_response(flow_id, 200, Map::new(), r#"{"id":"msg_1"}"#).await;

        let record = controller.store().get_request(flow_id).await.unwrap().unwrap();
        assert_eq!(record.agent_type, "claude_code");
        assert_eq!(record.protocol_type, "anthropic");
        assert_eq!(record.api_provider.as_deref(), Some("anthropic"));
        assert!(!record.is_streaming);
        assert_eq!(record.sequence, 1);
    }

    #[tokio::test]
    async fn sse_streaming_scenario_c() {
        let controller = controller().await;
        let flow_id = controller
            .on_request("GET", "https://api.anthropic.com/v1/messages", "api.anthropic.com", "/v1/messages", Map::new(), "")
            .await;
        controller.on_response_headers(flow_id, "text/event-stream");
        controller.on_stream_chunk(flow_id, b"event: message_start\ndata: {\"type\":\"x\"}\n\n");
        controller.on_stream_chunk(flow_id, b"event: ping\ndata: {}\n\n");
        controller.on_response(flow_id, 200, Map::new(), "").await;

        let record = controller.store().get_request(flow_id).await.unwrap().unwrap();
        assert!(record.is_streaming);
        let events = controller.store().get_sse_events(flow_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_index, 0);
        assert_eq!(events[1].event_index, 1);
        assert_eq!(events[0].event_type, "message_start");
        assert_eq!(events[1].event_type, "ping");
    }

    #[tokio::test]
    async fn response_without_prior_request_is_a_noop() {
        let controller = controller().await;
        controller.on_response(Uuid::new_v4(), 200, Map::new(), "{}").await;
        // No panic, nothing to assert beyond successful early-return.
    }

    #[tokio::test]
    async fn ttfb_never_exceeds_duration() {
        let controller = controller().await;
        let flow_id = controller
            .on_request("GET", "https://api.anthropic.com/v1/messages", "api.anthropic.com", "/v1/messages", Map::new(), "")
            .await;
        controller.on_response_headers(flow_id, "text/event-stream");
        controller.on_stream_chunk(flow_id, b"data: x\n\n");
        controller.on_response(flow_id, 200, Map::new(), "").await;
        let record = controller.store().get_request(flow_id).await.unwrap().unwrap();
        assert!(record.ttfb_ms.unwrap() <= record.duration_ms.unwrap());
    }
}
