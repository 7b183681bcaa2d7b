//! Model-Context-Protocol JSON-RPC message summarizer.

use super::str_field;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

/// Method name → category, for the methods every MCP implementation is
/// expected to name consistently.
static METHOD_CATEGORIES: LazyLock<std::collections::HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    [
        ("initialize", "lifecycle"),
        ("initialized", "lifecycle"),
        ("shutdown", "lifecycle"),
        ("notifications/initialized", "lifecycle"),
        ("notifications/cancelled", "lifecycle"),
        ("tools/list", "tools"),
        ("tools/call", "tools"),
        ("resources/list", "resources"),
        ("resources/read", "resources"),
        ("resources/subscribe", "resources"),
        ("resources/unsubscribe", "resources"),
        ("prompts/list", "prompts"),
        ("prompts/get", "prompts"),
        ("completion/complete", "completion"),
        ("logging/setLevel", "logging"),
        ("notifications/resources/updated", "resources"),
        ("notifications/resources/list_changed", "resources"),
        ("notifications/tools/list_changed", "tools"),
        ("notifications/prompts/list_changed", "prompts"),
    ]
    .into_iter()
    .collect()
});

/// Categorize an MCP method name, falling back to its `/`-prefix, then
/// `"custom"`.
pub fn classify_method(method: &str) -> &'static str {
    if let Some(category) = METHOD_CATEGORIES.get(method) {
        return category;
    }
    let prefix = method.split('/').next().unwrap_or(method);
    match prefix {
        "tools" => "tools",
        "resources" => "resources",
        "prompts" => "prompts",
        "notifications" => "notifications",
        "completion" => "completion",
        "logging" => "logging",
        "sampling" => "sampling",
        _ => "custom",
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MessageSummary {
    pub jsonrpc: String,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<Value>,
}

fn summarize_params(method: &str, params: &Value) -> Value {
    if !params.is_object() {
        return Value::Object(Default::default());
    }
    match method {
        "tools/call" => serde_json::json!({
            "tool_name": str_field(params, "name"),
            "has_arguments": params.get("arguments").map(|a| !a.is_null() && a != &Value::Object(Default::default())).unwrap_or(false),
            "argument_keys": params.get("arguments").and_then(Value::as_object).map(|o| o.keys().cloned().collect::<Vec<_>>()).unwrap_or_default(),
        }),
        "resources/read" => serde_json::json!({ "uri": str_field(params, "uri") }),
        "prompts/get" => serde_json::json!({
            "prompt_name": str_field(params, "name"),
            "has_arguments": params.get("arguments").map(|a| !a.is_null()).unwrap_or(false),
        }),
        "initialize" => {
            let client_info = params.get("clientInfo").cloned().unwrap_or(Value::Null);
            serde_json::json!({
                "protocol_version": str_field(params, "protocolVersion"),
                "client_name": str_field(&client_info, "name"),
                "client_version": str_field(&client_info, "version"),
                "capabilities": params.get("capabilities").and_then(Value::as_object).map(|o| o.keys().cloned().collect::<Vec<_>>()).unwrap_or_default(),
            })
        }
        "completion/complete" => {
            let reference = params.get("ref").cloned().unwrap_or(Value::Null);
            let argument = params.get("argument").cloned().unwrap_or(Value::Null);
            serde_json::json!({
                "ref_type": str_field(&reference, "type"),
                "argument_name": str_field(&argument, "name"),
            })
        }
        _ => {
            if let Some(obj) = params.as_object() {
                if !obj.is_empty() {
                    return serde_json::json!({ "keys": obj.keys().cloned().collect::<Vec<_>>() });
                }
            }
            Value::Object(Default::default())
        }
    }
}

fn summarize_result(result: &Value) -> Value {
    if result.is_null() {
        return serde_json::json!({ "type": "null" });
    }
    let Some(obj) = result.as_object() else {
        return serde_json::json!({ "type": "scalar" });
    };
    let mut summary = serde_json::json!({ "keys": obj.keys().cloned().collect::<Vec<_>>() });
    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        summary["tool_count"] = serde_json::json!(tools.len());
        summary["tool_names"] = serde_json::json!(tools.iter().map(|t| str_field(t, "name")).collect::<Vec<_>>());
    }
    if let Some(resources) = obj.get("resources").and_then(Value::as_array) {
        summary["resource_count"] = serde_json::json!(resources.len());
    }
    summary
}

/// Summarize a single JSON-RPC message: request, notification, or response.
pub fn parse_message(body: &Value) -> MessageSummary {
    let jsonrpc = str_field(body, "jsonrpc");
    let id = body.get("id").cloned();
    let method = body.get("method").and_then(Value::as_str);
    let params = body.get("params").cloned().unwrap_or(Value::Object(Default::default()));
    let result = body.get("result");
    let error = body.get("error");

    let message_type = if method.is_some() {
        if id.is_none() { "notification" } else { "request" }
    } else if result.is_some() || error.is_some() {
        "response"
    } else {
        "unknown"
    };

    let mut summary = MessageSummary {
        jsonrpc,
        message_type: message_type.to_string(),
        id: id.filter(|v| !v.is_null()),
        ..Default::default()
    };

    if let Some(method) = method {
        summary.method = Some(method.to_string());
        summary.category = Some(classify_method(method));
    }

    if matches!(message_type, "request" | "notification") {
        summary.params = Some(summarize_params(method.unwrap_or_default(), &params));
    }

    if message_type == "response" {
        if let Some(error) = error {
            summary.is_error = Some(true);
            summary.error_code = error.get("code").and_then(Value::as_i64).or(Some(0));
            summary.error_message = Some(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| error.to_string()),
            );
        } else {
            summary.is_error = Some(false);
            summary.result_summary = Some(summarize_result(result.unwrap_or(&Value::Null)));
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_request_is_categorized() {
        let body = json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"x":1}}});
        let summary = parse_message(&body);
        assert_eq!(summary.message_type, "request");
        assert_eq!(summary.category, Some("tools"));
    }

    #[test]
    fn notification_has_no_id() {
        let body = json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let summary = parse_message(&body);
        assert_eq!(summary.message_type, "notification");
        assert!(summary.id.is_none());
    }

    #[test]
    fn error_response_captures_code_and_message() {
        let body = json!({"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"not found"}});
        let summary = parse_message(&body);
        assert_eq!(summary.is_error, Some(true));
        assert_eq!(summary.error_code, Some(-32601));
    }

    #[test]
    fn unknown_method_falls_back_to_prefix_category() {
        assert_eq!(classify_method("tools/list"), "tools");
        assert_eq!(classify_method("vendor/custom"), "custom");
    }
}
