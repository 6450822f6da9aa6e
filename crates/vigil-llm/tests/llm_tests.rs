//! Tests for vigil-llm: request shapes, scripted provider, retry policy

use serde_json::json;
use tokio_util::sync::CancellationToken;
use vigil_llm::*;

// ===========================================================================
// Request/response serialization
// ===========================================================================

#[test]
fn chat_request_serializes_without_empty_options() {
    let req = ChatRequest {
        model: "m".into(),
        messages: vec![ChatMessage::user("hi")],
        tools: None,
        max_tokens: None,
        system: None,
    };
    let v = serde_json::to_value(&req).unwrap();
    assert!(v.get("tools").is_none());
    assert!(v.get("system").is_none());
    assert_eq!(v["messages"][0]["content"], "hi");
}

#[test]
fn content_parts_tag_by_type() {
    let part = ContentPart::ToolUse {
        id: "t1".into(),
        name: "bash".into(),
        input: json!({"command": "ls"}),
    };
    let v = serde_json::to_value(&part).unwrap();
    assert_eq!(v["type"], "tool_use");
    assert_eq!(v["input"]["command"], "ls");

    let back: ContentPart = serde_json::from_value(v).unwrap();
    assert!(matches!(back, ContentPart::ToolUse { .. }));
}

#[test]
fn anthropic_response_body_parses() {
    // The wire shape the Messages API returns.
    let body = json!({
        "model": "claude-sonnet-4-20250514",
        "content": [
            {"type": "text", "text": "Reading the file."},
            {"type": "tool_use", "id": "toolu_1", "name": "read",
             "input": {"file_path": "/tmp/a"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 10, "output_tokens": 20}
    });
    let parts: Vec<ContentPart> = serde_json::from_value(body["content"].clone()).unwrap();
    assert_eq!(parts.len(), 2);
    let usage: Usage = serde_json::from_value(body["usage"].clone()).unwrap();
    assert_eq!(usage.input_tokens, 10);
}

// ===========================================================================
// ScriptedProvider
// ===========================================================================

#[tokio::test]
async fn scripted_provider_pops_in_order() {
    let provider = ScriptedProvider::new()
        .text("first")
        .tool_call("read", json!({"file_path": "/tmp/a"}))
        .text("last");

    let cancel = CancellationToken::new();
    let r1 = provider.chat(ChatRequest::default(), cancel.clone()).await.unwrap();
    assert_eq!(r1.text(), "first");

    let r2 = provider.chat(ChatRequest::default(), cancel.clone()).await.unwrap();
    let calls = r2.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read");
    assert_eq!(calls[0].args["file_path"], "/tmp/a");

    let r3 = provider.chat(ChatRequest::default(), cancel.clone()).await.unwrap();
    assert_eq!(r3.text(), "last");

    // Exhausted script yields the default marker.
    let r4 = provider.chat(ChatRequest::default(), cancel).await.unwrap();
    assert!(r4.text().contains("exhausted"));
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn scripted_provider_captures_requests() {
    let provider = ScriptedProvider::new().text("ok");
    let mut req = ChatRequest::default();
    req.system = Some("persona".into());
    provider.chat(req, CancellationToken::new()).await.unwrap();
    let captured = provider.requests();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].system.as_deref(), Some("persona"));
}

// ===========================================================================
// Retry policy
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn server_errors_retry_until_success() {
    let provider = ScriptedProvider::new()
        .server_error(500)
        .server_error(503)
        .text("recovered");
    let r = chat_with_retry(&provider, ChatRequest::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(r.text(), "recovered");
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn billing_errors_are_fatal() {
    let provider = ScriptedProvider::new().auth_failed("no credit");
    let err = chat_with_retry(&provider, ChatRequest::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(provider.call_count(), 1);
}

#[test]
fn retryability_classification() {
    assert!(LlmError::RateLimited { retry_after_ms: 1 }.is_retryable());
    assert!(LlmError::Overloaded("x".into()).is_retryable());
    assert!(LlmError::Server { status: 502, message: String::new() }.is_retryable());
    assert!(!LlmError::AuthFailed("x".into()).is_retryable());
    assert!(!LlmError::Billing("x".into()).is_retryable());
    assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
    assert!(!LlmError::Cancelled.is_retryable());
}
