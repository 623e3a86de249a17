use crate::db::InvoiceStore;
use crate::models::{MessagePart, ResponseMessage, StoredMessage};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// 去掉推理片段、空文本和没有结果的工具调用，再丢弃变空的消息
pub fn sanitize_response_messages(messages: Vec<ResponseMessage>) -> Vec<ResponseMessage> {
    let answered: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .filter_map(|part| match part {
            MessagePart::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        })
        .collect();

    messages
        .into_iter()
        .filter_map(|mut message| {
            message.parts.retain(|part| match part {
                MessagePart::Reasoning { .. } => false,
                MessagePart::Text { text } => !text.is_empty(),
                MessagePart::ToolCall { tool_call_id, .. } => answered.contains(tool_call_id),
                MessagePart::ToolResult { .. } => true,
            });
            (!message.parts.is_empty()).then_some(message)
        })
        .collect()
}

/// 流结束后把回复消息落库；失败只记日志
pub struct MessagePersister {
    store: Arc<dyn InvoiceStore>,
}

impl MessagePersister {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    pub async fn persist(&self, chat_id: &str, messages: Vec<ResponseMessage>) {
        let sanitized = sanitize_response_messages(messages);
        if sanitized.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut rows = Vec::with_capacity(sanitized.len());
        for message in sanitized {
            match serde_json::to_value(&message.parts) {
                Ok(content) => rows.push(StoredMessage {
                    id: message.id,
                    chat_id: chat_id.to_string(),
                    role: message.role.as_str().to_string(),
                    content,
                    created_at: now,
                }),
                Err(e) => error!("[chat {}] 消息 {} 序列化失败: {}", chat_id, message.id, e),
            }
        }

        match self.store.save_messages(&rows).await {
            Ok(()) => info!("[chat {}] 保存回复消息 {} 条", chat_id, rows.len()),
            Err(e) => error!("[chat {}] Failed to save chat messages: {}", chat_id, e),
        }
    }
}
