//! Anthropic `/v1/messages` request/response/event summarizers.

use super::{bool_field, estimate_tokens, str_field, u64_field};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct MessageSummary {
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub block_types: Vec<String>,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RequestSummary {
    pub model: String,
    pub max_tokens: u64,
    pub temperature: Option<f64>,
    pub stream: bool,
    pub system_length: u64,
    pub message_count: u64,
    pub messages_summary: Vec<MessageSummary>,
    pub tool_names: Vec<String>,
    pub tool_count: u64,
    pub has_tool_use: bool,
    pub input_tokens_estimate: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseSummary {
    pub id: String,
    pub model: String,
    pub role: String,
    pub stop_reason: String,
    pub text: String,
    pub text_length: u64,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EventSummary {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn summarize_messages(messages: &[Value]) -> Vec<MessageSummary> {
    messages
        .iter()
        .filter_map(|m| {
            if !m.is_object() {
                return None;
            }
            let role = str_field(m, "role");
            match m.get("content") {
                Some(Value::String(s)) => Some(MessageSummary {
                    role,
                    kind: "text".to_string(),
                    block_types: Vec::new(),
                    length: s.chars().count() as u64,
                }),
                Some(Value::Array(blocks)) => {
                    let mut block_types = Vec::new();
                    let mut total_len = 0u64;
                    for block in blocks {
                        let bt = str_field(block, "type");
                        let bt = if bt.is_empty() { "text".to_string() } else { bt };
                        if bt == "text" {
                            total_len += str_field(block, "text").chars().count() as u64;
                        } else if bt == "tool_result" {
                            for sub in super::arr(block, "content") {
                                if str_field(sub, "type") == "text" {
                                    total_len += str_field(sub, "text").chars().count() as u64;
                                }
                            }
                        }
                        block_types.push(bt);
                    }
                    Some(MessageSummary { role, kind: String::new(), block_types, length: total_len })
                }
                _ => Some(MessageSummary { role, kind: "text".to_string(), block_types: Vec::new(), length: 0 }),
            }
        })
        .collect()
}

fn system_text(body: &Value) -> String {
    match body.get("system") {
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|p| if p.is_object() { str_field(p, "text") } else { p.as_str().unwrap_or_default().to_string() })
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

pub fn parse_request(body: &Value) -> RequestSummary {
    let messages = super::arr(body, "messages");
    let system = system_text(body);
    let tool_names: Vec<String> = super::arr(body, "tools").iter().map(|t| str_field(t, "name")).collect();
    let message_text: String = messages
        .iter()
        .map(|m| m.get("content").map(|c| c.to_string()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ");
    let input_tokens_estimate = estimate_tokens(&format!("{message_text} {system}"));

    RequestSummary {
        model: str_field(body, "model"),
        max_tokens: u64_field(body, "max_tokens"),
        temperature: body.get("temperature").and_then(Value::as_f64),
        stream: bool_field(body, "stream"),
        system_length: system.chars().count() as u64,
        message_count: messages.len() as u64,
        messages_summary: summarize_messages(messages),
        tool_names: tool_names.clone(),
        tool_count: tool_names.len() as u64,
        has_tool_use: !tool_names.is_empty(),
        input_tokens_estimate,
    }
}

pub fn parse_response(body: &Value) -> ResponseSummary {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in super::arr(body, "content") {
        match str_field(block, "type").as_str() {
            "text" => text_parts.push(str_field(block, "text")),
            "tool_use" => tool_calls.push(ToolCall {
                id: str_field(block, "id"),
                name: str_field(block, "name"),
                input: block.get("input").cloned().unwrap_or(Value::Object(Default::default())),
            }),
            _ => {}
        }
    }
    let usage = body.get("usage").cloned().unwrap_or(Value::Null);
    let text = text_parts.join("\n");
    ResponseSummary {
        id: str_field(body, "id"),
        model: str_field(body, "model"),
        role: str_field(body, "role"),
        stop_reason: str_field(body, "stop_reason"),
        text_length: text.chars().count() as u64,
        text,
        tool_call_count: tool_calls.len() as u64,
        tool_calls,
        input_tokens: u64_field(&usage, "input_tokens"),
        output_tokens: u64_field(&usage, "output_tokens"),
        cache_read_tokens: u64_field(&usage, "cache_read_input_tokens"),
        cache_creation_tokens: u64_field(&usage, "cache_creation_input_tokens"),
    }
}

pub fn parse_sse_event(event_type: &str, data: &Value) -> EventSummary {
    let mut result = EventSummary { event_type: event_type.to_string(), ..Default::default() };

    match event_type {
        "message_start" => {
            let message = data.get("message").cloned().unwrap_or(Value::Null);
            result.id = Some(str_field(&message, "id"));
            result.model = Some(str_field(&message, "model"));
            result.role = Some(str_field(&message, "role"));
            let usage = message.get("usage").cloned().unwrap_or(Value::Null);
            result.input_tokens = Some(u64_field(&usage, "input_tokens"));
        }
        "content_block_start" => {
            let block = data.get("content_block").cloned().unwrap_or(Value::Null);
            result.index = Some(u64_field(data, "index"));
            let block_type = str_field(&block, "type");
            if block_type == "tool_use" {
                result.tool_name = Some(str_field(&block, "name"));
                result.tool_id = Some(str_field(&block, "id"));
            }
            result.block_type = Some(block_type);
        }
        "content_block_delta" => {
            let delta = data.get("delta").cloned().unwrap_or(Value::Null);
            let delta_type = str_field(&delta, "type");
            result.index = Some(u64_field(data, "index"));
            if delta_type == "text_delta" {
                let text = str_field(&delta, "text");
                result.text_length = Some(text.chars().count() as u64);
                result.text = Some(text);
            } else if delta_type == "input_json_delta" {
                result.partial_json = Some(str_field(&delta, "partial_json"));
            }
            result.delta_type = Some(delta_type);
        }
        "content_block_stop" => {
            result.index = Some(u64_field(data, "index"));
        }
        "message_delta" => {
            let delta = data.get("delta").cloned().unwrap_or(Value::Null);
            result.stop_reason = Some(str_field(&delta, "stop_reason"));
            let usage = data.get("usage").cloned().unwrap_or(Value::Null);
            result.output_tokens = Some(u64_field(&usage, "output_tokens"));
        }
        "error" => {
            let error = data.get("error").cloned().unwrap_or(Value::Null);
            result.error_type = Some(str_field(&error, "type"));
            result.error_message = Some(str_field(&error, "message"));
        }
        _ => {} // message_stop / ping / unrecognized: bare event_type is enough
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_tolerates_missing_fields() {
        let body = json!({});
        let r = parse_request(&body);
        assert_eq!(r.model, "");
        assert_eq!(r.max_tokens, 0);
        assert!(!r.has_tool_use);
    }

    #[test]
    fn response_extracts_text_and_tool_calls() {
        let body = json!({
            "id": "msg_1", "model": "claude-3", "role": "assistant", "stop_reason": "end_turn",
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "x"}}
            ],
            "usage": {"input_tokens": 5, "output_tokens": 2}
        });
        let r = parse_response(&body);
        assert_eq!(r.text, "hi");
        assert_eq!(r.tool_call_count, 1);
        assert_eq!(r.tool_calls[0].name, "search");
        assert_eq!(r.input_tokens, 5);
    }

    #[test]
    fn sse_event_message_start() {
        let data = json!({"message": {"id": "msg_1", "model": "claude-3", "role": "assistant", "usage": {"input_tokens": 10}}});
        let ev = parse_sse_event("message_start", &data);
        assert_eq!(ev.id.as_deref(), Some("msg_1"));
        assert_eq!(ev.input_tokens, Some(10));
    }

    #[test]
    fn sse_event_unknown_type_is_bare() {
        let ev = parse_sse_event("ping", &Value::Null);
        assert_eq!(ev.event_type, "ping");
        assert!(ev.text.is_none());
    }
}
