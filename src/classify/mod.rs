//! Agent and protocol classification from headers, URL, and body shape.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Known MCP method names consulted by protocol detection before falling
/// back to the slash/id-shape heuristics.
const MCP_METHODS: &[&str] = &[
    "initialize",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
    "notifications/initialized",
    "notifications/cancelled",
    "ping",
];

struct AgentPattern {
    name: &'static str,
    regex: Regex,
}

static AGENT_PATTERNS: LazyLock<Vec<AgentPattern>> = LazyLock::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("claude_code", &["claude[-_]?code", "claude[-_]?cli", "anthropic[-_]?cli"]),
        ("opencode", &["opencode", "open[-_]?code"]),
        ("cline", &["cline", "vscode.*cline"]),
        ("codex", &["codex", "vscode.*codex", "openai[-_]?codex"]),
        ("gemini", &["gemini[-_]?cli", "google[-_]?gemini"]),
    ];
    table
        .iter()
        .map(|(name, alternatives)| AgentPattern {
            name,
            regex: Regex::new(&format!("(?i){}", alternatives.join("|"))).expect("static pattern"),
        })
        .collect()
});

/// Detect the agent client from a case-insensitive header map.
///
/// `headers` keys need not already be lowercase; they are normalized here.
pub fn detect_agent(headers: &HashMap<String, String>) -> String {
    let lower: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();

    let searchable = [
        lower.get("user-agent"),
        lower.get("x-client-name"),
        lower.get("x-app"),
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect::<Vec<_>>()
    .join(" ");

    for pattern in AGENT_PATTERNS.iter() {
        if pattern.regex.is_match(&searchable) {
            return pattern.name.to_string();
        }
    }

    let has_anthropic_marker = lower.contains_key("anthropic-version") || lower.contains_key("anthropic-beta");
    let x_app = lower.get("x-app").map(|s| s.to_ascii_lowercase());
    if has_anthropic_marker && matches!(x_app.as_deref(), Some("cli") | Some("claude-code")) {
        return "claude_code".to_string();
    }

    "unknown".to_string()
}

/// Result of protocol detection: the wire dialect and, when known, the
/// upstream provider name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMatch {
    pub protocol: String,
    pub provider: Option<String>,
}

fn provider_heuristic(host: &str) -> Option<String> {
    let lower = host.to_ascii_lowercase();
    for candidate in ["anthropic", "openai", "google", "azure", "openrouter"] {
        if lower.contains(candidate) {
            return Some(candidate.to_string());
        }
    }
    None
}

fn looks_like_jsonrpc(body: &Value) -> bool {
    let is_2_0 = body.get("jsonrpc").and_then(Value::as_str) == Some("2.0");
    if !is_2_0 {
        return false;
    }
    let method = body.get("method").and_then(Value::as_str);
    let has_known_method = method.map(|m| MCP_METHODS.contains(&m)).unwrap_or(false);
    let has_slash = method.map(|m| m.contains('/')).unwrap_or(false);
    let has_result_or_error = body.get("id").is_some()
        && (body.get("result").is_some() || body.get("error").is_some());
    has_known_method || has_slash || has_result_or_error
}

/// Detect `(protocol, provider)` from host, path, and (when available) the
/// parsed JSON request body. `body` may be `None` for non-JSON or
/// not-yet-parsed requests.
pub fn detect_protocol(host: &str, path: &str, body: Option<&Value>) -> ProtocolMatch {
    static ANTHROPIC_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/v1/messages").unwrap());
    static OPENAI_PATH: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^/v1/(chat/completions|responses)").unwrap());
    static GOOGLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^/v1beta/models/.+:(generateContent|streamGenerateContent)").unwrap()
    });

    let host_lower = host.to_ascii_lowercase();

    if let Some(body) = body {
        if looks_like_jsonrpc(body) {
            return ProtocolMatch { protocol: "mcp".to_string(), provider: None };
        }
    }

    if host_lower == "api.anthropic.com" || ANTHROPIC_PATH.is_match(path) {
        let provider = if host_lower.contains("anthropic") {
            Some("anthropic".to_string())
        } else {
            provider_heuristic(host)
        };
        return ProtocolMatch { protocol: "anthropic".to_string(), provider };
    }

    if host_lower == "api.openai.com" || OPENAI_PATH.is_match(path) {
        let provider = if host_lower.contains("openai") {
            Some("openai".to_string())
        } else {
            provider_heuristic(host)
        };
        return ProtocolMatch { protocol: "openai".to_string(), provider };
    }

    if host_lower == "generativelanguage.googleapis.com" || GOOGLE_PATH.is_match(path) {
        return ProtocolMatch { protocol: "google".to_string(), provider: Some("google".to_string()) };
    }

    if let Some(body) = body {
        let has_model_messages = body.get("model").is_some() && body.get("messages").is_some();
        if has_model_messages {
            return ProtocolMatch { protocol: "openai".to_string(), provider: provider_heuristic(host) };
        }
        let has_contents_config = body.get("contents").is_some() && body.get("generationConfig").is_some();
        if has_contents_config {
            return ProtocolMatch { protocol: "google".to_string(), provider: provider_heuristic(host) };
        }
    }

    ProtocolMatch { protocol: "unknown".to_string(), provider: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn claude_cli_user_agent_detected() {
        let h = headers(&[("User-Agent", "claude-cli/1.0.118 (external, cli)")]);
        assert_eq!(detect_agent(&h), "claude_code");
    }

    #[test]
    fn unknown_ua_with_anthropic_version_only_is_unknown() {
        let h = headers(&[
            ("user-agent", "python-requests/2.32.0"),
            ("anthropic-version", "2023-06-01"),
        ]);
        assert_eq!(detect_agent(&h), "unknown");
    }

    #[test]
    fn anthropic_version_with_x_app_cli_is_claude_code() {
        let h = headers(&[("anthropic-version", "2023-06-01"), ("x-app", "cli")]);
        assert_eq!(detect_agent(&h), "claude_code");
    }

    #[test]
    fn header_matching_is_case_insensitive() {
        let h = headers(&[("USER-AGENT", "OPENCODE/3.0")]);
        assert_eq!(detect_agent(&h), "opencode");
    }

    #[test]
    fn anthropic_host_detected() {
        let m = detect_protocol("api.anthropic.com", "/v1/messages", None);
        assert_eq!(m.protocol, "anthropic");
        assert_eq!(m.provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn mcp_detected_by_body_shape() {
        let body: Value = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#,
        )
        .unwrap();
        let m = detect_protocol("localhost", "/rpc", Some(&body));
        assert_eq!(m.protocol, "mcp");
        assert_eq!(m.provider, None);
    }

    #[test]
    fn openai_body_shape_fallback() {
        let body: Value = serde_json::from_str(r#"{"model":"gpt-4","messages":[]}"#).unwrap();
        let m = detect_protocol("my-gateway.internal", "/chat", Some(&body));
        assert_eq!(m.protocol, "openai");
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let m = detect_protocol("example.com", "/", None);
        assert_eq!(m.protocol, "unknown");
        assert_eq!(m.provider, None);
    }

    #[test]
    fn classification_is_deterministic() {
        let h = headers(&[("User-Agent", "codex/1.0")]);
        assert_eq!(detect_agent(&h), detect_agent(&h));
        let m1 = detect_protocol("api.openai.com", "/v1/chat/completions", None);
        let m2 = detect_protocol("api.openai.com", "/v1/chat/completions", None);
        assert_eq!(m1, m2);
    }
}
