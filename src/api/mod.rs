//! Thin REST + WebSocket edge over the flow controller's `Store` and `Hub`.

use crate::error::ApiError;
use crate::flow::FlowController;
use crate::store::FilterValue;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub fn router(controller: Arc<FlowController>) -> Router {
    Router::new()
        .route("/api/requests", get(list_requests).delete(clear_requests))
        .route("/api/requests/:id", get(get_request))
        .route("/api/requests/:id/sse-events", get(get_sse_events))
        .route("/api/stats", get(get_stats))
        .route("/api/export/har", get(export_har))
        .route("/api/export/curl/:id", get(export_curl))
        .route("/ws", get(ws_handler))
        .with_state(controller)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    agent_type: Option<String>,
    host: Option<String>,
    method: Option<String>,
    protocol_type: Option<String>,
    status_code: Option<i64>,
    is_streaming: Option<bool>,
    session_id: Option<String>,
    api_provider: Option<String>,
    search: Option<String>,
    order_by: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl ListParams {
    fn into_filters(self) -> (HashMap<String, FilterValue>, Option<String>, i64, i64) {
        let mut filters = HashMap::new();
        if let Some(v) = self.agent_type {
            filters.insert("agent_type".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.host {
            filters.insert("host".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.method {
            filters.insert("method".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.protocol_type {
            filters.insert("protocol_type".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.status_code {
            filters.insert("status_code".to_string(), FilterValue::Int(v));
        }
        if let Some(v) = self.is_streaming {
            filters.insert("is_streaming".to_string(), FilterValue::Bool(v));
        }
        if let Some(v) = self.session_id {
            filters.insert("session_id".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.api_provider {
            filters.insert("api_provider".to_string(), FilterValue::Text(v));
        }
        if let Some(v) = self.search {
            filters.insert("search".to_string(), FilterValue::Text(v));
        }
        (filters, self.order_by, self.limit, self.offset)
    }
}

async fn list_requests(
    State(controller): State<Arc<FlowController>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (filters, order_by, limit, offset) = params.into_filters();
    let requests = controller.store().list_requests(filters, order_by, limit, offset).await?;
    Ok(Json(requests))
}

async fn get_request(
    State(controller): State<Arc<FlowController>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    controller
        .store()
        .get_request(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("request not found".to_string()))
}

async fn get_sse_events(
    State(controller): State<Arc<FlowController>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if controller.store().get_request(id).await?.is_none() {
        return Err(ApiError::NotFound("request not found".to_string()));
    }
    let events = controller.store().get_sse_events(id).await?;
    Ok(Json(events))
}

async fn clear_requests(State(controller): State<Arc<FlowController>>) -> Result<impl IntoResponse, ApiError> {
    controller.store().clear_all().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn get_stats(State(controller): State<Arc<FlowController>>) -> Result<impl IntoResponse, ApiError> {
    let stats = controller.store().stats().await?;
    Ok(Json(stats))
}

async fn export_har(State(controller): State<Arc<FlowController>>) -> Result<impl IntoResponse, ApiError> {
    let summaries = controller
        .store()
        .list_requests(HashMap::new(), Some("sequence ASC".to_string()), 10_000, 0)
        .await?;

    let mut entries = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let Some(record) = controller.store().get_request(summary.id).await? else { continue };
        let request_headers: Vec<Value> = record
            .request_headers
            .iter()
            .map(|(k, v)| json!({ "name": k, "value": v }))
            .collect();
        let response_headers: Vec<Value> = record
            .response_headers
            .as_ref()
            .map(|h| h.iter().map(|(k, v)| json!({ "name": k, "value": v })).collect())
            .unwrap_or_default();
        let request_content_type = record
            .request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let response_content_type = record
            .response_headers
            .as_ref()
            .and_then(|h| h.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-type")))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        entries.push(json!({
            "startedDateTime": record.timestamp.to_rfc3339(),
            "time": record.duration_ms.unwrap_or(0),
            "request": {
                "method": record.method,
                "url": record.url,
                "httpVersion": "HTTP/1.1",
                "headers": request_headers,
                "queryString": [],
                "bodySize": record.request_body.len(),
                "postData": if record.request_body.is_empty() { Value::Null } else {
                    json!({ "mimeType": request_content_type, "text": record.request_body })
                },
            },
            "response": {
                "status": record.status_code.unwrap_or(0),
                "statusText": "",
                "httpVersion": "HTTP/1.1",
                "headers": response_headers,
                "content": {
                    "size": record.response_body.as_deref().map(str::len).unwrap_or(0),
                    "mimeType": response_content_type,
                    "text": record.response_body.clone().unwrap_or_default(),
                },
                "bodySize": record.response_body.as_deref().map(str::len).unwrap_or(0),
            },
            "cache": {},
            "timings": { "send": 0, "wait": record.duration_ms.unwrap_or(0), "receive": 0 },
        }));
    }

    Ok(Json(json!({
        "log": {
            "version": "1.2",
            "creator": { "name": "AgentProbe", "version": crate::config::VERSION },
            "entries": entries,
        }
    })))
}

async fn export_curl(
    State(controller): State<Arc<FlowController>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = controller
        .store()
        .get_request(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("request not found".to_string()))?;

    let mut parts = vec!["curl".to_string(), "-X".to_string(), record.method, shell_quote(&record.url)];
    for (name, value) in &record.request_headers {
        parts.push("-H".to_string());
        parts.push(shell_quote(&format!("{name}: {value}")));
    }
    if !record.request_body.is_empty() {
        parts.push("--data-raw".to_string());
        parts.push(shell_quote(&record.request_body));
    }

    Ok(Json(json!({ "curl": parts.join(" ") })))
}

/// Equivalent of Python's `shlex.quote`: wrap in single quotes, escaping
/// any embedded single quote as `'\''`.
fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "@%_-+=:,./".contains(c)) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

async fn ws_handler(ws: WebSocketUpgrade, State(controller): State<Arc<FlowController>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, controller))
}

async fn handle_socket(mut socket: WebSocket, controller: Arc<FlowController>) {
    let (id, mut rx) = controller.hub().connect();
    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                // Client-sent frames are ignored; only a close/error ends the loop.
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
    controller.hub().disconnect(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_values_with_spaces() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn shell_quote_leaves_safe_tokens_bare() {
        assert_eq!(shell_quote("https://api.anthropic.com/v1/messages"), "https://api.anthropic.com/v1/messages");
    }
}
