use futures::StreamExt;
use invoice_chat_rust::llm::{
    CompletionRequest, FinishReason, LanguageModel, LlmError, PromptMessage, StreamDelta, Usage,
};
use invoice_chat_rust::service::{build_validation_request, responder::get_all_invoices_tool};
use invoice_chat_rust::OpenAiClient;
use secrecy::Secret;
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new(
        &format!("{}/v1", server.uri()),
        Some(Secret::new("sk-test".to_string())),
        Duration::from_secs(5),
    )
    .expect("client should build")
}

#[tokio::test]
async fn generate_text_returns_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "{\"validation\":{}}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = client(&server)
        .generate_text(build_validation_request("gpt-4o", "INVOICE #1"))
        .await
        .unwrap();

    assert_eq!(completion.text, "{\"validation\":{}}");
    assert_eq!(
        completion.usage,
        Some(Usage {
            prompt_tokens: 120,
            completion_tokens: 30
        })
    );
}

#[tokio::test]
async fn provider_errors_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate_text(build_validation_request("gpt-4o", ""))
        .await
        .unwrap_err();

    match err {
        LlmError::Api { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "rate limited");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn stream_text_parses_sse_deltas() {
    let server = MockServer::start().await;
    let sse = [
        json!({"choices":[{"index":0,"delta":{"role":"assistant","content":"Hello "}}]}),
        json!({"choices":[{"index":0,"delta":{"content":"world"}}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"getAllInvoices","arguments":""}}]}}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]}}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}),
        json!({"choices":[],"usage":{"prompt_tokens":40,"completion_tokens":8,"total_tokens":48}}),
    ]
    .iter()
    .map(|chunk| format!("data: {chunk}\n\n"))
    .collect::<String>()
        + "data: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": { "include_usage": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let request = CompletionRequest {
        model: "gpt-4o".into(),
        messages: vec![
            PromptMessage::system("You are an invoice processing assistant."),
            PromptMessage::user("Display exactly this text"),
        ],
        tools: vec![get_all_invoices_tool()],
    };
    let deltas: Vec<StreamDelta> = client(&server)
        .stream_text(request)
        .await
        .unwrap()
        .map(|delta| delta.unwrap())
        .collect()
        .await;

    assert_eq!(deltas[0], StreamDelta::Text("Hello ".into()));
    assert_eq!(deltas[1], StreamDelta::Text("world".into()));
    assert!(matches!(
        &deltas[2],
        StreamDelta::ToolCall(call) if call.id.as_deref() == Some("call_1")
            && call.name.as_deref() == Some("getAllInvoices")
    ));
    assert!(matches!(&deltas[3], StreamDelta::ToolCall(call) if call.arguments == "{}"));
    assert_eq!(deltas[4], StreamDelta::Finish(FinishReason::ToolCalls));
    assert_eq!(
        deltas[5],
        StreamDelta::Usage(Usage {
            prompt_tokens: 40,
            completion_tokens: 8
        })
    );
    assert_eq!(deltas.len(), 6);
}
