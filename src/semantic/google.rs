//! Google Gemini `generateContent`/`streamGenerateContent` summarizers.

use super::{estimate_tokens, str_field, u64_field};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ContentSummary {
    pub role: String,
    pub part_types: Vec<String>,
    pub text_length: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RequestSummary {
    pub model: String,
    pub contents_count: u64,
    pub contents_summary: Vec<ContentSummary>,
    pub system_length: u64,
    pub max_output_tokens: u64,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub tool_names: Vec<String>,
    pub tool_count: u64,
    pub has_tool_use: bool,
    pub input_tokens_estimate: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseSummary {
    pub text: String,
    pub text_length: u64,
    pub function_calls: Vec<FunctionCall>,
    pub function_call_count: u64,
    pub finish_reason: String,
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
    pub total_token_count: u64,
    pub candidate_count: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EventSummary {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub function_calls: Vec<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

fn parts_text(parts: &[Value]) -> Vec<String> {
    parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str).map(String::from)).collect()
}

fn function_calls(parts: &[Value]) -> Vec<FunctionCall> {
    parts
        .iter()
        .filter_map(|p| p.get("functionCall"))
        .map(|fc| FunctionCall { name: str_field(fc, "name"), args: fc.get("args").cloned().unwrap_or(Value::Object(Default::default())) })
        .collect()
}

pub fn parse_request(body: &Value) -> RequestSummary {
    let contents = super::arr(body, "contents");
    let gen_config = body.get("generationConfig").cloned().unwrap_or(Value::Null);
    let system_instruction = body.get("systemInstruction").cloned().unwrap_or(Value::Null);
    let system_parts = super::arr(&system_instruction, "parts");
    let system_text = parts_text(system_parts).join(" ");

    let mut tool_names = Vec::new();
    for tool_group in super::arr(body, "tools") {
        for decl in super::arr(tool_group, "functionDeclarations") {
            tool_names.push(str_field(decl, "name"));
        }
    }

    let contents_summary: Vec<ContentSummary> = contents
        .iter()
        .filter(|c| c.is_object())
        .map(|c| {
            let parts = super::arr(c, "parts");
            let texts = parts_text(parts);
            ContentSummary {
                role: str_field(c, "role"),
                part_types: parts.iter().map(|_| "text".to_string()).take(texts.len()).collect(),
                text_length: texts.iter().map(|t| t.chars().count() as u64).sum(),
            }
        })
        .collect();

    let all_text: String =
        contents.iter().flat_map(|c| parts_text(super::arr(c, "parts"))).collect::<Vec<_>>().join(" ");

    RequestSummary {
        model: str_field(body, "model"),
        contents_count: contents.len() as u64,
        contents_summary,
        system_length: system_text.chars().count() as u64,
        max_output_tokens: u64_field(&gen_config, "maxOutputTokens"),
        temperature: gen_config.get("temperature").and_then(Value::as_f64),
        top_p: gen_config.get("topP").and_then(Value::as_f64),
        top_k: gen_config.get("topK").and_then(Value::as_f64),
        stop_sequences: super::arr(&gen_config, "stopSequences")
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        tool_names: tool_names.clone(),
        tool_count: tool_names.len() as u64,
        has_tool_use: !tool_names.is_empty(),
        input_tokens_estimate: estimate_tokens(&format!("{all_text} {system_text}")),
    }
}

pub fn parse_response(body: &Value) -> ResponseSummary {
    let candidates = super::arr(body, "candidates");
    let first = candidates.first().cloned().unwrap_or(Value::Null);
    let content = first.get("content").cloned().unwrap_or(Value::Null);
    let parts = super::arr(&content, "parts");
    let texts = parts_text(parts);
    let calls = function_calls(parts);
    let usage = body.get("usageMetadata").cloned().unwrap_or(Value::Null);

    ResponseSummary {
        text_length: texts.iter().map(|t| t.chars().count() as u64).sum(),
        text: texts.join("\n"),
        function_call_count: calls.len() as u64,
        function_calls: calls,
        finish_reason: str_field(&first, "finishReason"),
        prompt_token_count: u64_field(&usage, "promptTokenCount"),
        candidates_token_count: u64_field(&usage, "candidatesTokenCount"),
        total_token_count: u64_field(&usage, "totalTokenCount"),
        candidate_count: candidates.len() as u64,
    }
}

pub fn parse_sse_event(data: &Value) -> EventSummary {
    if data.is_null() {
        return EventSummary { event_type: "empty".to_string(), ..Default::default() };
    }
    let candidates = super::arr(data, "candidates");
    let first = candidates.first().cloned().unwrap_or(Value::Null);
    let content = first.get("content").cloned().unwrap_or(Value::Null);
    let parts = super::arr(&content, "parts");
    let texts = parts_text(parts);
    let calls = function_calls(parts);

    let mut result = EventSummary { event_type: "generateContent.chunk".to_string(), ..Default::default() };
    if !texts.is_empty() {
        let joined = texts.join("");
        result.text_length = Some(joined.chars().count() as u64);
        result.text = Some(joined);
    }
    result.function_calls = calls;
    if let Some(reason) = first.get("finishReason").and_then(Value::as_str) {
        result.finish_reason = Some(reason.to_string());
    }
    if let Some(usage) = data.get("usageMetadata") {
        result.prompt_token_count = Some(u64_field(usage, "promptTokenCount"));
        result.candidates_token_count = Some(u64_field(usage, "candidatesTokenCount"));
        result.total_token_count = Some(u64_field(usage, "totalTokenCount"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_collects_tool_declarations() {
        let body = json!({"tools": [{"functionDeclarations": [{"name": "lookup"}]}]});
        let r = parse_request(&body);
        assert_eq!(r.tool_names, vec!["lookup"]);
        assert!(r.has_tool_use);
    }

    #[test]
    fn response_extracts_text_and_function_calls() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}, {"functionCall": {"name": "f", "args": {}}}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4}
        });
        let r = parse_response(&body);
        assert_eq!(r.text, "hi");
        assert_eq!(r.function_call_count, 1);
        assert_eq!(r.finish_reason, "STOP");
    }

    #[test]
    fn empty_sse_data_yields_empty_event() {
        let ev = parse_sse_event(&Value::Null);
        assert_eq!(ev.event_type, "empty");
    }
}
