//! OpenAI `/v1/chat/completions` and `/v1/responses` summarizers.

use super::{bool_field, estimate_tokens, str_field, u64_field};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct MessageSummary {
    pub role: String,
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
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseSummary {
    pub id: String,
    pub model: String,
    pub finish_reason: String,
    pub text: String,
    pub text_length: u64,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub choice_count: u64,
    pub system_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EventSummary {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
}

fn message_content_len(m: &Value) -> u64 {
    match m.get("content") {
        Some(Value::String(s)) => s.chars().count() as u64,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| str_field(p, "type") == "text")
            .map(|p| str_field(p, "text").chars().count() as u64)
            .sum(),
        _ => 0,
    }
}

pub fn parse_request(body: &Value) -> RequestSummary {
    let messages = super::arr(body, "messages");
    let tool_names: Vec<String> = super::arr(body, "tools")
        .iter()
        .map(|t| str_field(t.get("function").unwrap_or(&Value::Null), "name"))
        .collect();
    let system_length: u64 = messages
        .iter()
        .filter(|m| matches!(str_field(m, "role").as_str(), "system" | "developer"))
        .map(message_content_len)
        .sum();
    let max_tokens = {
        let v = u64_field(body, "max_tokens");
        if v != 0 { v } else { u64_field(body, "max_completion_tokens") }
    };
    let all_text: String = messages.iter().map(|m| m.get("content").map(|c| c.to_string()).unwrap_or_default()).collect::<Vec<_>>().join(" ");

    RequestSummary {
        model: str_field(body, "model"),
        max_tokens,
        temperature: body.get("temperature").and_then(Value::as_f64),
        stream: bool_field(body, "stream"),
        system_length,
        message_count: messages.len() as u64,
        messages_summary: messages
            .iter()
            .filter(|m| m.is_object())
            .map(|m| MessageSummary { role: str_field(m, "role"), length: message_content_len(m) })
            .collect(),
        tool_names: tool_names.clone(),
        tool_count: tool_names.len() as u64,
        has_tool_use: !tool_names.is_empty(),
        input_tokens_estimate: estimate_tokens(&all_text),
    }
}

pub fn parse_response(body: &Value) -> ResponseSummary {
    let choices = super::arr(body, "choices");
    let first_choice = choices.first().cloned().unwrap_or(Value::Null);
    let message = first_choice.get("message").cloned().unwrap_or(Value::Null);
    let text = message.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
    let tool_calls: Vec<ToolCall> = super::arr(&message, "tool_calls")
        .iter()
        .map(|tc| {
            let func = tc.get("function").cloned().unwrap_or(Value::Null);
            ToolCall { id: str_field(tc, "id"), name: str_field(&func, "name"), arguments: str_field(&func, "arguments") }
        })
        .collect();
    let usage = body.get("usage").cloned().unwrap_or(Value::Null);
    let details = usage.get("prompt_tokens_details").cloned().unwrap_or(Value::Null);

    ResponseSummary {
        id: str_field(body, "id"),
        model: str_field(body, "model"),
        finish_reason: str_field(&first_choice, "finish_reason"),
        text_length: text.chars().count() as u64,
        text,
        tool_call_count: tool_calls.len() as u64,
        tool_calls,
        prompt_tokens: u64_field(&usage, "prompt_tokens"),
        completion_tokens: u64_field(&usage, "completion_tokens"),
        total_tokens: u64_field(&usage, "total_tokens"),
        cached_tokens: u64_field(&details, "cached_tokens"),
        choice_count: choices.len() as u64,
        system_fingerprint: str_field(body, "system_fingerprint"),
    }
}

pub fn parse_sse_event(data: &Value) -> EventSummary {
    if data.is_null() {
        return EventSummary { event_type: "empty".to_string(), ..Default::default() };
    }

    if str_field(data, "object") == "chat.completion.chunk" {
        let choices = super::arr(data, "choices");
        let first = choices.first().cloned().unwrap_or(Value::Null);
        let delta = first.get("delta").cloned().unwrap_or(Value::Null);
        let mut result = EventSummary {
            event_type: "chat.completion.chunk".to_string(),
            id: Some(str_field(data, "id")),
            model: Some(str_field(data, "model")),
            finish_reason: first.get("finish_reason").and_then(Value::as_str).map(String::from),
            role: delta.get("role").and_then(Value::as_str).map(String::from),
            ..Default::default()
        };
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            result.text_length = Some(text.chars().count() as u64);
            result.text = Some(text.to_string());
        }
        if let Some(usage) = data.get("usage") {
            result.prompt_tokens = Some(u64_field(usage, "prompt_tokens"));
            result.completion_tokens = Some(u64_field(usage, "completion_tokens"));
        }
        return result;
    }

    let event_type = str_field(data, "type");
    if event_type.starts_with("response.") {
        return EventSummary { event_type, ..Default::default() };
    }

    EventSummary { event_type: "unknown".to_string(), id: Some(str_field(data, "id")), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_falls_back_to_max_completion_tokens() {
        let body = json!({"max_completion_tokens": 50});
        assert_eq!(parse_request(&body).max_tokens, 50);
    }

    #[test]
    fn response_extracts_tool_calls() {
        let body = json!({
            "choices": [{"finish_reason": "tool_calls", "message": {"tool_calls": [
                {"id": "c1", "function": {"name": "get_weather", "arguments": "{}"}}
            ]}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });
        let r = parse_response(&body);
        assert_eq!(r.tool_call_count, 1);
        assert_eq!(r.tool_calls[0].name, "get_weather");
    }

    #[test]
    fn sse_chunk_extracts_delta_text() {
        let data = json!({"object": "chat.completion.chunk", "id": "1", "choices": [{"delta": {"content": "hi"}}]});
        let ev = parse_sse_event(&data);
        assert_eq!(ev.text.as_deref(), Some("hi"));
    }

    #[test]
    fn malformed_body_degrades_to_defaults() {
        let r = parse_response(&Value::Null);
        assert_eq!(r.text, "");
        assert_eq!(r.choice_count, 0);
    }
}
