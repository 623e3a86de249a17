use super::data_stream::{DataStreamPart, WordChunker};
use super::prompts::{responder_prompt, GET_ALL_INVOICES_DESCRIPTION, RESPONDER_SYSTEM_PROMPT};
use crate::db::{InvoiceStore, StoreError};
use crate::llm::{
    CompletionRequest, FinishReason, LanguageModel, LlmError, PromptMessage, Role, StreamDelta,
    ToolCall, ToolDefinition, Usage,
};
use crate::models::{InvoiceOutcome, MessagePart, ProcessedInvoice, ResponseMessage};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const GET_ALL_INVOICES: &str = "getAllInvoices";
pub const STREAM_ERROR_MESSAGE: &str = "Oops, an error occurred while processing the invoice!";

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("responder call failed: {0}")]
    Model(#[from] LlmError),

    #[error("tool getAllInvoices failed: {0}")]
    Tool(#[from] StoreError),

    #[error("failed to encode tool result: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn get_all_invoices_tool() -> ToolDefinition {
    ToolDefinition {
        name: GET_ALL_INVOICES.to_string(),
        description: GET_ALL_INVOICES_DESCRIPTION.to_string(),
        parameters: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
    }
}

/// 流式回复调用: 按处理结果渲染模板，逐词推送给客户端，最多 `max_steps` 轮工具调用
pub struct Responder {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn InvoiceStore>,
    model_name: String,
    max_steps: usize,
}

/// 单轮中按 index 拼接的工具调用片段
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl Responder {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn InvoiceStore>,
        model_name: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            model,
            store,
            model_name: model_name.into(),
            max_steps: max_steps.max(1),
        }
    }

    /// 只有新建成功的分支才开放 getAllInvoices
    pub fn build_request(&self, processed: &ProcessedInvoice) -> CompletionRequest {
        let tools = match processed.outcome {
            InvoiceOutcome::Saved(_) => vec![get_all_invoices_tool()],
            InvoiceOutcome::Invalid | InvoiceOutcome::Duplicate(_) => Vec::new(),
        };

        CompletionRequest {
            model: self.model_name.clone(),
            messages: vec![
                PromptMessage::system(RESPONDER_SYSTEM_PROMPT),
                PromptMessage::user(responder_prompt(processed)),
            ],
            tools,
        }
    }

    /// 驱动回复并写入 `sink`；成功时返回产生的消息，失败时推送错误帧并返回 None
    pub async fn run(
        &self,
        processed: &ProcessedInvoice,
        sink: mpsc::Sender<String>,
    ) -> Option<Vec<ResponseMessage>> {
        let request = self.build_request(processed);
        match self.drive(request, &sink).await {
            Ok(messages) => Some(messages),
            Err(e) => {
                error!("流式回复失败: {}", e);
                emit(&sink, DataStreamPart::Error(STREAM_ERROR_MESSAGE.to_string())).await;
                None
            }
        }
    }

    async fn drive(
        &self,
        mut request: CompletionRequest,
        sink: &mpsc::Sender<String>,
    ) -> Result<Vec<ResponseMessage>, ResponderError> {
        let mut messages = Vec::new();
        let mut total_usage = Usage::default();
        let mut last_finish = FinishReason::Other;

        for step in 1..=self.max_steps {
            let message_id = Uuid::new_v4().to_string();
            emit(sink, DataStreamPart::StepStart { message_id: message_id.clone() }).await;

            let mut stream = self.model.stream_text(request.clone()).await?;
            let mut chunker = WordChunker::default();
            let mut text = String::new();
            let mut reasoning = String::new();
            let mut pending: BTreeMap<usize, PendingToolCall> = BTreeMap::new();
            let mut finish = FinishReason::Other;
            let mut usage = Usage::default();

            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::Text(delta) => {
                        text.push_str(&delta);
                        for chunk in chunker.push(&delta) {
                            emit(sink, DataStreamPart::Text(chunk)).await;
                        }
                    }
                    StreamDelta::Reasoning(delta) => {
                        reasoning.push_str(&delta);
                        emit(sink, DataStreamPart::Reasoning(delta)).await;
                    }
                    StreamDelta::ToolCall(delta) => {
                        let call = pending.entry(delta.index).or_default();
                        if delta.id.is_some() {
                            call.id = delta.id;
                        }
                        if delta.name.is_some() {
                            call.name = delta.name;
                        }
                        call.arguments.push_str(&delta.arguments);
                    }
                    StreamDelta::Finish(reason) => finish = reason,
                    StreamDelta::Usage(reported) => usage = reported,
                }
            }
            if let Some(rest) = chunker.flush() {
                emit(sink, DataStreamPart::Text(rest)).await;
            }

            let tool_calls: Vec<ToolCall> = pending.into_values().map(finalize_call).collect();

            let mut parts = Vec::new();
            if !reasoning.is_empty() {
                parts.push(MessagePart::Reasoning { reasoning });
            }
            if !text.is_empty() {
                parts.push(MessagePart::Text { text: text.clone() });
            }

            let mut results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                emit(
                    sink,
                    DataStreamPart::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.arguments.clone(),
                    },
                )
                .await;
                parts.push(MessagePart::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                });

                let result = self.execute_tool(call, &request.tools).await?;
                emit(
                    sink,
                    DataStreamPart::ToolResult {
                        tool_call_id: call.id.clone(),
                        result: result.clone(),
                    },
                )
                .await;
                results.push(MessagePart::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    result,
                });
            }

            messages.push(ResponseMessage {
                id: message_id,
                role: Role::Assistant,
                parts,
            });

            let more_steps = step < self.max_steps;
            emit(
                sink,
                DataStreamPart::StepFinish {
                    finish_reason: finish,
                    usage,
                    is_continued: false,
                },
            )
            .await;
            total_usage.add(usage);
            last_finish = finish;
            debug!("回复第 {} 轮结束: {}, 工具调用 {} 个", step, finish.as_str(), tool_calls.len());

            if tool_calls.is_empty() {
                break;
            }

            messages.push(ResponseMessage {
                id: Uuid::new_v4().to_string(),
                role: Role::Tool,
                parts: results.clone(),
            });

            if !more_steps {
                info!("回复达到最大轮数 {}", self.max_steps);
                break;
            }

            request
                .messages
                .push(PromptMessage::assistant(Some(text).filter(|t| !t.is_empty()), tool_calls));
            for part in results {
                if let MessagePart::ToolResult { tool_call_id, result, .. } = part {
                    request
                        .messages
                        .push(PromptMessage::tool(tool_call_id, serde_json::to_string(&result)?));
                }
            }
        }

        emit(
            sink,
            DataStreamPart::MessageFinish {
                finish_reason: last_finish,
                usage: total_usage,
            },
        )
        .await;

        Ok(messages)
    }

    async fn execute_tool(
        &self,
        call: &ToolCall,
        offered: &[ToolDefinition],
    ) -> Result<Value, ResponderError> {
        if !offered.iter().any(|tool| tool.name == call.name) {
            warn!("模型调用了未开放的工具: {}", call.name);
            return Ok(json!({ "error": format!("tool {} is not available", call.name) }));
        }

        let invoices = self.store.list_invoices().await?;
        info!("工具 {} 返回 {} 张发票", GET_ALL_INVOICES, invoices.len());
        Ok(serde_json::to_value(invoices)?)
    }
}

fn finalize_call(call: PendingToolCall) -> ToolCall {
    let arguments = if call.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
            warn!("工具参数不是合法 JSON ({}): {}", e, call.arguments);
            json!({})
        })
    };

    ToolCall {
        id: call.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
        name: call.name.unwrap_or_default(),
        arguments,
    }
}

/// 客户端断开后继续生成，保证消息仍能落库
async fn emit(sink: &mpsc::Sender<String>, part: DataStreamPart) {
    if sink.send(part.encode()).await.is_err() {
        debug!("客户端已断开, 丢弃帧");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::llm::{Completion, CompletionStream, ToolCallDelta};
    use crate::models::{ExtractedInvoiceData, InvoiceExtraction, Validation};
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 每次 stream_text 依次返回预设的一轮增量
    struct ScriptedModel {
        turns: Mutex<VecDeque<Vec<Result<StreamDelta, LlmError>>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        fn new(turns: Vec<Vec<Result<StreamDelta, LlmError>>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate_text(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::EmptyResponse)
        }

        async fn stream_text(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            let turn = self.turns.lock().unwrap().pop_front().unwrap_or_default();
            Ok(stream::iter(turn).boxed())
        }
    }

    fn processed(outcome: InvoiceOutcome) -> ProcessedInvoice {
        ProcessedInvoice {
            extraction: InvoiceExtraction {
                validation: Validation {
                    is_valid_invoice: !matches!(outcome, InvoiceOutcome::Invalid),
                    document_type: "invoice".into(),
                    reason: "ok".into(),
                },
                data: ExtractedInvoiceData {
                    vendor_name: Some("Acme".into()),
                    ..Default::default()
                },
            },
            outcome,
        }
    }

    fn tool_turn() -> Vec<Result<StreamDelta, LlmError>> {
        vec![
            Ok(StreamDelta::Text("Saved.".into())),
            Ok(StreamDelta::ToolCall(ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some(GET_ALL_INVOICES.into()),
                arguments: String::new(),
            })),
            Ok(StreamDelta::ToolCall(ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "{}".into(),
            })),
            Ok(StreamDelta::Finish(FinishReason::ToolCalls)),
            Ok(StreamDelta::Usage(Usage { prompt_tokens: 10, completion_tokens: 3 })),
        ]
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn tools_offered_only_for_new_invoices() {
        let responder = Responder::new(ScriptedModel::new(vec![]), Arc::new(MemoryStore::new()), "m", 5);

        let saved = responder.build_request(&processed(InvoiceOutcome::Saved(Uuid::new_v4())));
        assert_eq!(saved.tools.len(), 1);
        assert_eq!(saved.tools[0].name, GET_ALL_INVOICES);

        let invalid = responder.build_request(&processed(InvoiceOutcome::Invalid));
        assert!(invalid.tools.is_empty());
    }

    #[tokio::test]
    async fn tool_call_runs_then_final_text_streams() {
        let model = ScriptedModel::new(vec![
            tool_turn(),
            vec![
                Ok(StreamDelta::Text("Let me show you the updated list ".into())),
                Ok(StreamDelta::Text("of all invoices.".into())),
                Ok(StreamDelta::Finish(FinishReason::Stop)),
            ],
        ]);
        let responder = Responder::new(model.clone(), Arc::new(MemoryStore::new()), "m", 5);
        let (tx, rx) = mpsc::channel(64);

        let messages = responder
            .run(&processed(InvoiceOutcome::Saved(Uuid::new_v4())), tx)
            .await
            .unwrap();
        let frames = collect(rx).await;

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[2].role, Role::Assistant);

        assert!(frames.iter().any(|f| f.starts_with("9:") && f.contains("call_1")));
        assert!(frames.iter().any(|f| f.starts_with("a:") && f.contains("\"result\":[]")));
        assert!(frames.contains(&"0:\"of \"\n".to_string()));
        assert!(frames.last().unwrap().starts_with("d:"));

        // 第二轮请求带上了工具结果
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn steps_are_bounded() {
        let model = ScriptedModel::new(vec![tool_turn(), tool_turn(), tool_turn(), tool_turn()]);
        let responder = Responder::new(model.clone(), Arc::new(MemoryStore::new()), "m", 2);
        let (tx, rx) = mpsc::channel(64);

        responder
            .run(&processed(InvoiceOutcome::Saved(Uuid::new_v4())), tx)
            .await
            .unwrap();
        let frames = collect(rx).await;

        assert_eq!(model.requests.lock().unwrap().len(), 2);
        assert_eq!(frames.iter().filter(|f| f.starts_with("f:")).count(), 2);
    }

    #[tokio::test]
    async fn unoffered_tool_gets_error_result() {
        let model = ScriptedModel::new(vec![tool_turn(), vec![Ok(StreamDelta::Finish(FinishReason::Stop))]]);
        let store = Arc::new(MemoryStore::new());
        let responder = Responder::new(model, store, "m", 5);
        let (tx, rx) = mpsc::channel(64);

        let messages = responder
            .run(&processed(InvoiceOutcome::Invalid), tx)
            .await
            .unwrap();
        let _frames = collect(rx).await;

        let MessagePart::ToolResult { result, .. } = &messages[1].parts[0] else {
            panic!("expected tool result");
        };
        assert!(result["error"].as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn stream_failure_emits_error_frame() {
        let model = ScriptedModel::new(vec![vec![
            Ok(StreamDelta::Text("Hello ".into())),
            Err(LlmError::Stream("connection reset".into())),
        ]]);
        let responder = Responder::new(model, Arc::new(MemoryStore::new()), "m", 5);
        let (tx, rx) = mpsc::channel(64);

        assert!(responder.run(&processed(InvoiceOutcome::Invalid), tx).await.is_none());
        let frames = collect(rx).await;
        assert_eq!(
            frames.last().unwrap(),
            &format!("3:\"{}\"\n", STREAM_ERROR_MESSAGE)
        );
    }
}
