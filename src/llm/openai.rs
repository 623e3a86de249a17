//! 兼容 OpenAI `/chat/completions` 协议的客户端

use super::{
    Completion, CompletionRequest, CompletionStream, FinishReason, LanguageModel, LlmError,
    Role, StreamDelta, ToolCallDelta, Usage,
};
use crate::config::LlmConfig;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// 任何兼容 OpenAI chat-completions 协议的服务均可使用
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("invoice-chat-rust/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<Response, LlmError> {
        let body = WireRequest::from_request(request, stream)?;
        let mut req = self.http.post(&self.endpoint).json(&body);

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate_text(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let response = self.send(&request, false).await?;
        let completion: WireCompletion = response.json().await?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        debug!("模型调用完成, usage: {:?}", completion.usage);
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: completion.usage.map(Usage::from),
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn stream_text(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
        let response = self.send(&request, true).await?;

        let deltas = response
            .bytes_stream()
            .eventsource()
            .map(|event| -> Result<Vec<StreamDelta>, LlmError> {
                let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
                if event.data == "[DONE]" {
                    return Ok(Vec::new());
                }
                let chunk: WireChunk = serde_json::from_str(&event.data)?;
                Ok(chunk_deltas(chunk))
            })
            .flat_map(|result| {
                let items: Vec<Result<StreamDelta, LlmError>> = match result {
                    Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed();

        Ok(deltas)
    }
}

/// 将一个 SSE 数据块展开为增量事件
fn chunk_deltas(chunk: WireChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    for choice in chunk.choices.unwrap_or_default() {
        if let Some(delta) = choice.delta {
            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                deltas.push(StreamDelta::Reasoning(reasoning));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                deltas.push(StreamDelta::Text(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                deltas.push(StreamDelta::ToolCall(ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }));
            }
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(StreamDelta::Finish(FinishReason::from_provider(&reason)));
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(StreamDelta::Usage(usage.into()));
    }

    deltas
}

// ===== 协议结构 =====

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<WireStreamOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a CompletionRequest, stream: bool) -> Result<Self, LlmError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
            for call in &message.tool_calls {
                tool_calls.push(WireToolCall {
                    id: &call.id,
                    kind: "function",
                    function: WireFunctionCall {
                        name: &call.name,
                        arguments: serde_json::to_string(&call.arguments)?,
                    },
                });
            }
            messages.push(WireMessage {
                role: message.role,
                content: message.content.as_deref(),
                tool_calls,
                tool_call_id: message.tool_call_id.as_deref(),
            });
        }

        let tools = request
            .tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireFunction {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: &tool.parameters,
                },
            })
            .collect();

        Ok(Self {
            model: &request.model,
            messages,
            stream,
            stream_options: stream.then_some(WireStreamOptions { include_usage: true }),
            tools,
        })
    }
}

#[derive(Serialize)]
struct WireStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    choices: Option<Vec<WireChunkChoice>>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    delta: Option<WireDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
