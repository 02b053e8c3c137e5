//! Protocol comprehension probes: MCP, LSP and ACP.
//!
//! These measure whether a model understands agent-protocol traffic at
//! the surface level. The model is shown a synthetic JSON-RPC request and
//! must answer with a conformant JSON-RPC 2.0 response: `"jsonrpc":"2.0"`,
//! the id echoed, and exactly one of `result` or `error`. Checking is
//! structural only; no semantic validation of the payload is attempted.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::adapter::{ChatOptions, ChatTurn, DeclaredCaps, ResponseFormat};
use crate::error::AdapterResult;

use super::core::{report_for_error, retryable};
use super::types::ProbeReport;
use super::{Probe, ProbeTarget};

/// Extract the first balanced JSON object from free-form model output.
/// Models often wrap JSON in prose or a code fence; evaluation works on
/// the canonicalised object.
pub(crate) fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Surface-level JSON-RPC 2.0 conformance: version string, echoed id,
/// and a `result` xor `error` member (error must be an object).
pub(crate) fn jsonrpc_conformant(response: &str, expected_id: i64) -> bool {
    let Some(object) = extract_json_object(response) else {
        return false;
    };
    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return false;
    }
    if object.get("id").and_then(Value::as_i64) != Some(expected_id) {
        return false;
    }
    let has_result = object.get("result").is_some();
    let has_error = object
        .get("error")
        .map(|e| e.is_object())
        .unwrap_or(false);
    has_result != has_error
}

fn protocol_options() -> ChatOptions {
    ChatOptions {
        max_tokens: Some(256),
        response_format: Some(ResponseFormat::JsonObject),
        ..Default::default()
    }
}

/// MCP- and LSP-style comprehension share the conformance rule and
/// differ only in the synthetic request shown to the model.
pub struct JsonRpcProbe {
    name: &'static str,
    request_id: i64,
    request: Value,
    framing: &'static str,
}

impl JsonRpcProbe {
    pub fn mcp() -> Self {
        Self {
            name: "mcp-comprehension",
            request_id: 42,
            request: json!({
                "jsonrpc": "2.0",
                "id": 42,
                "method": "tools/list",
                "params": {}
            }),
            framing: "You are an MCP (Model Context Protocol) server.",
        }
    }

    pub fn lsp() -> Self {
        Self {
            name: "lsp-comprehension",
            request_id: 7,
            request: json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "textDocument/completion",
                "params": {
                    "textDocument": {"uri": "file:///src/main.rs"},
                    "position": {"line": 4, "character": 12}
                }
            }),
            framing: "You are an LSP (Language Server Protocol) server.",
        }
    }

    fn prompt(&self) -> String {
        format!(
            "{} Reply to the following JSON-RPC 2.0 request with a single valid \
             JSON-RPC 2.0 response object and nothing else:\n{}",
            self.framing, self.request
        )
    }
}

#[async_trait]
impl Probe for JsonRpcProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let turns = vec![ChatTurn::user(self.prompt())];
        match target.chat(&turns, &protocol_options()).await {
            Ok(outcome) => {
                let report = if jsonrpc_conformant(&outcome.content, self.request_id) {
                    ProbeReport::pass(self.name, 100.0)
                } else {
                    ProbeReport::fail(self.name, 0.0)
                        .with_detail("response is not a conformant JSON-RPC 2.0 object")
                };
                Ok(report.with_evidence(&outcome.content))
            }
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name, &e)),
        }
    }
}

/// ACP comprehension: five scored sub-probes. The probe passes when at
/// least three of five pass; the numeric score is count/5 × 100.
pub struct AcpProbe;

pub(crate) const ACP_SUB_PROBES: usize = 5;
pub(crate) const ACP_PASS_THRESHOLD: usize = 3;

/// Sub-probe 2: the response must pick the tool that actually fits the
/// task out of a small offered set.
pub(crate) fn acp_tool_reasoning_passes(response: &str) -> bool {
    let lower = response.to_lowercase();
    lower.contains("read_file") && !lower.contains("delete_file")
}

/// Sub-probe 3: the secret token from turn one must survive to turn three.
pub(crate) fn acp_retention_passes(response: &str, token: &str) -> bool {
    response.contains(token)
}

/// Sub-probe 4: the completed function must actually add and return.
pub(crate) fn acp_code_assist_passes(response: &str) -> bool {
    response.contains("return") && response.contains('+')
}

/// Sub-probe 5: the review must point at the off-by-one bound.
pub(crate) fn acp_error_detection_passes(response: &str) -> bool {
    let lower = response.to_lowercase();
    lower.contains("off-by-one")
        || lower.contains("off by one")
        || lower.contains("out of bounds")
        || lower.contains("out-of-bounds")
        || (lower.contains("index") && lower.contains("<="))
        || lower.contains("len(")
}

pub(crate) fn acp_report(name: &'static str, passed: &[bool], evidence: &str) -> ProbeReport {
    let count = passed.iter().filter(|&&p| p).count();
    let score = count as f64 / ACP_SUB_PROBES as f64 * 100.0;
    let detail = format!("{}/{} sub-probes passed", count, ACP_SUB_PROBES);
    let report = if count >= ACP_PASS_THRESHOLD {
        ProbeReport::pass(name, score)
    } else {
        ProbeReport::fail(name, score)
    };
    report.with_detail(detail).with_evidence(evidence)
}

#[async_trait]
impl Probe for AcpProbe {
    fn name(&self) -> &'static str {
        "acp-comprehension"
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let mut passed = Vec::with_capacity(ACP_SUB_PROBES);

        // 1. JSON-RPC compliance, ACP framing.
        let rpc = json!({
            "jsonrpc": "2.0",
            "id": 11,
            "method": "session/new",
            "params": {"cwd": "/workspace"}
        });
        let prompt = format!(
            "You are an ACP (Agent Client Protocol) agent. Reply to this JSON-RPC 2.0 \
             request with a single valid JSON-RPC 2.0 response object and nothing else:\n{}",
            rpc
        );
        let outcome = match target
            .chat(&[ChatTurn::user(prompt)], &protocol_options())
            .await
        {
            Ok(o) => o,
            Err(e) if retryable(&e) => return Err(e),
            Err(e) => return Ok(report_for_error(self.name(), &e)),
        };
        passed.push(jsonrpc_conformant(&outcome.content, 11));
        let mut last_evidence = outcome.content;

        // 2. Tool-use reasoning.
        let prompt = "An agent has the tools read_file, write_file and delete_file. \
                      Which single tool should it use to inspect the contents of \
                      config.toml? Answer with the tool name only.";
        match target
            .chat(&[ChatTurn::user(prompt)], &ChatOptions::default())
            .await
        {
            Ok(o) => {
                passed.push(acp_tool_reasoning_passes(&o.content));
                last_evidence = o.content;
            }
            Err(e) if retryable(&e) => return Err(e),
            Err(_) => passed.push(false),
        }

        // 3. Multi-turn context retention over three turns.
        let token = "ZEPHYR-31";
        let turns = vec![
            ChatTurn::user(format!(
                "Remember this session token: {}. Acknowledge with OK.",
                token
            )),
            ChatTurn::assistant("OK."),
            ChatTurn::user("Name three common build tools, briefly."),
            ChatTurn::assistant("make, cargo, and cmake."),
            ChatTurn::user("What was the session token I gave you earlier?"),
        ];
        match target.chat(&turns, &ChatOptions::default()).await {
            Ok(o) => {
                passed.push(acp_retention_passes(&o.content, token));
                last_evidence = o.content;
            }
            Err(e) if retryable(&e) => return Err(e),
            Err(_) => passed.push(false),
        }

        // 4. Code-assistance quality.
        let prompt = "Complete this Python function body in one line:\n\
                      def add(a: int, b: int) -> int:\n    ...";
        match target
            .chat(&[ChatTurn::user(prompt)], &ChatOptions::default())
            .await
        {
            Ok(o) => {
                passed.push(acp_code_assist_passes(&o.content));
                last_evidence = o.content;
            }
            Err(e) if retryable(&e) => return Err(e),
            Err(_) => passed.push(false),
        }

        // 5. Code-error detection.
        let prompt = "What is the bug in this Python function? One sentence.\n\
                      def last_items(xs, n):\n    \
                      return [xs[i] for i in range(len(xs) - n, len(xs) + 1)]";
        match target
            .chat(&[ChatTurn::user(prompt)], &ChatOptions::default())
            .await
        {
            Ok(o) => {
                passed.push(acp_error_detection_passes(&o.content));
                last_evidence = o.content;
            }
            Err(e) if retryable(&e) => return Err(e),
            Err(_) => passed.push(false),
        }

        Ok(acp_report(self.name(), &passed, &last_evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::ProbeOutcome;

    #[test]
    fn test_extract_json_object_from_prose() {
        let text = "Here you go:\n```json\n{\"jsonrpc\": \"2.0\", \"id\": 1, \"result\": {}}\n```";
        let object = extract_json_object(text).unwrap();
        assert_eq!(object["jsonrpc"], "2.0");
    }

    #[test]
    fn test_extract_json_object_handles_nested_braces_in_strings() {
        let text = r#"{"jsonrpc": "2.0", "id": 2, "result": {"text": "a } in a string"}}"#;
        let object = extract_json_object(text).unwrap();
        assert_eq!(object["id"], 2);
    }

    #[test]
    fn test_jsonrpc_conformance_rule() {
        assert!(jsonrpc_conformant(
            r#"{"jsonrpc": "2.0", "id": 42, "result": {"tools": []}}"#,
            42
        ));
        assert!(jsonrpc_conformant(
            r#"{"jsonrpc": "2.0", "id": 42, "error": {"code": -32601, "message": "no"}}"#,
            42
        ));
        // Wrong id.
        assert!(!jsonrpc_conformant(
            r#"{"jsonrpc": "2.0", "id": 1, "result": {}}"#,
            42
        ));
        // Missing version.
        assert!(!jsonrpc_conformant(r#"{"id": 42, "result": {}}"#, 42));
        // Neither result nor error.
        assert!(!jsonrpc_conformant(r#"{"jsonrpc": "2.0", "id": 42}"#, 42));
        // Error must be an object.
        assert!(!jsonrpc_conformant(
            r#"{"jsonrpc": "2.0", "id": 42, "error": "boom"}"#,
            42
        ));
        // Not JSON at all.
        assert!(!jsonrpc_conformant("I would respond with a tools list.", 42));
    }

    #[test]
    fn test_acp_sub_probe_rules() {
        assert!(acp_tool_reasoning_passes("read_file"));
        assert!(!acp_tool_reasoning_passes("delete_file, then read_file"));
        assert!(!acp_tool_reasoning_passes("write_file"));

        assert!(acp_retention_passes("The token was ZEPHYR-31.", "ZEPHYR-31"));
        assert!(!acp_retention_passes("I don't recall.", "ZEPHYR-31"));

        assert!(acp_code_assist_passes("    return a + b"));
        assert!(!acp_code_assist_passes("pass"));

        assert!(acp_error_detection_passes(
            "The range goes out of bounds at len(xs) + 1."
        ));
        assert!(acp_error_detection_passes("Classic off-by-one error."));
        assert!(!acp_error_detection_passes("Looks fine to me."));
    }

    #[test]
    fn test_acp_report_threshold() {
        let report = acp_report("acp-comprehension", &[true, true, true, false, false], "");
        assert_eq!(report.outcome, ProbeOutcome::Pass);
        assert_eq!(report.score, Some(60.0));

        let report = acp_report("acp-comprehension", &[true, true, false, false, false], "");
        assert_eq!(report.outcome, ProbeOutcome::Fail);
        assert_eq!(report.score, Some(40.0));

        let report = acp_report("acp-comprehension", &[true; 5], "");
        assert_eq!(report.score, Some(100.0));
    }
}
