#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use config::{File, FileFormat};
use futures::{stream, StreamExt};
use http_body_util::BodyExt;
use invoice_chat_rust::llm::{
    Completion, CompletionRequest, CompletionStream, FinishReason, LanguageModel, LlmError,
    StreamDelta, Usage,
};
use invoice_chat_rust::service::{ExtractionError, TextExtractor};
use invoice_chat_rust::{build_router, AppConfig, AppState, MemoryStore};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const TOKEN: &str = "tok-alice";

pub const VALID_REPLY: &str = r#"Here is the result:
{"validation":{"isValidInvoice":true,"documentType":"invoice","reason":"ok"},"data":{"vendorName":"Acme","invoiceNumber":"INV-1","amount":100,"customerName":"Bob","invoiceDate":"2024-01-01","dueDate":"2024-02-01","lineItems":[{"description":"Widget","quantity":2,"unitPrice":50,"total":100}]}}"#;

pub const INVALID_REPLY: &str = r#"{"validation":{"isValidInvoice":false,"documentType":"receipt","reason":"This is a payment receipt"},"data":null}"#;

/// 校验调用返回固定文本，流式调用按脚本逐轮返回
pub struct ScriptedModel {
    validator_reply: String,
    turns: Mutex<VecDeque<Vec<StreamDelta>>>,
    pub stream_requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(validator_reply: &str) -> Arc<Self> {
        Arc::new(Self {
            validator_reply: validator_reply.to_string(),
            turns: Mutex::new(VecDeque::new()),
            stream_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_turn(&self, turn: Vec<StreamDelta>) {
        self.turns.lock().unwrap().push_back(turn);
    }

    /// 第 n 次流式调用的 user 提示词
    pub fn responder_prompt(&self, n: usize) -> String {
        self.stream_requests.lock().unwrap()[n].messages[1]
            .content
            .clone()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate_text(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: self.validator_reply.clone(),
            usage: Some(Usage {
                prompt_tokens: 800,
                completion_tokens: 200,
            }),
        })
    }

    async fn stream_text(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
        self.stream_requests.lock().unwrap().push(request);
        let turn = self.turns.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![
                StreamDelta::Text("Here is your invoice summary.".into()),
                StreamDelta::Finish(FinishReason::Stop),
            ]
        });
        Ok(stream::iter(turn.into_iter().map(Ok)).boxed())
    }
}

/// 把附件字节当作 UTF-8 文本
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], _mime_type: &str) -> Result<String, ExtractionError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::load_from(File::from_str("", FileFormat::Toml), |key| match key {
        "DATABASE_URL" => Some("memory://".to_string()),
        "AUTH_TOKENS" => Some(format!("alice:{TOKEN}")),
        "LLM_TIMEOUT_SECS" => Some("5".to_string()),
        _ => None,
    })
    .expect("test config should load")
}

pub fn test_app(store: Arc<MemoryStore>, model: Arc<ScriptedModel>) -> Router {
    let state = AppState::new(&test_config(), store, model, Arc::new(PlainTextExtractor))
        .expect("state should build");
    build_router(state)
}

pub fn invoice_request(chat_id: &str, message_id: &str, document: &str) -> Value {
    json!({
        "id": chat_id,
        "selectedChatModel": "chat-model",
        "messages": [{
            "id": message_id,
            "role": "user",
            "content": "Please process this invoice",
            "experimental_attachments": [{
                "url": format!("data:application/pdf;base64,{}", STANDARD.encode(document)),
                "name": "invoice.pdf",
                "contentType": "application/pdf"
            }]
        }]
    })
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub fn post_invoice(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat/invoice")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builder should not fail")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder should not fail")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body must be utf-8")
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).expect("body must be JSON")
}

/// 流结束后消息在后台任务中落库，轮询等待
pub async fn wait_for_messages(store: &MemoryStore, chat_id: &str, expected: usize) -> bool {
    for _ in 0..50 {
        if store.messages_for_chat(chat_id).len() >= expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
