//! 流式回复的行协议 (`<code>:<json>\n`)。

use crate::llm::{FinishReason, Usage};
use serde_json::{json, Value};

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

/// 流中的一帧
#[derive(Debug, Clone, PartialEq)]
pub enum DataStreamPart {
    Text(String),
    Reasoning(String),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
    },
    StepStart {
        message_id: String,
    },
    StepFinish {
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
    MessageFinish {
        finish_reason: FinishReason,
        usage: Usage,
    },
    Error(String),
}

impl DataStreamPart {
    pub fn encode(&self) -> String {
        let (code, payload) = match self {
            DataStreamPart::Text(text) => ('0', json!(text)),
            DataStreamPart::Reasoning(text) => ('g', json!(text)),
            DataStreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => (
                '9',
                json!({ "toolCallId": tool_call_id, "toolName": tool_name, "args": args }),
            ),
            DataStreamPart::ToolResult {
                tool_call_id,
                result,
            } => ('a', json!({ "toolCallId": tool_call_id, "result": result })),
            DataStreamPart::StepStart { message_id } => ('f', json!({ "messageId": message_id })),
            DataStreamPart::StepFinish {
                finish_reason,
                usage,
                is_continued,
            } => (
                'e',
                json!({
                    "finishReason": finish_reason.as_str(),
                    "usage": usage,
                    "isContinued": is_continued,
                }),
            ),
            DataStreamPart::MessageFinish {
                finish_reason,
                usage,
            } => (
                'd',
                json!({
                    "finishReason": finish_reason.as_str(),
                    "usage": usage,
                }),
            ),
            DataStreamPart::Error(message) => ('3', json!(message)),
        };
        format!("{}:{}\n", code, payload)
    }
}

/// 按词平滑文本增量: 只输出 "非空白串 + 其后的空白"，其余留到下次
#[derive(Debug, Default)]
pub struct WordChunker {
    buffer: String,
}

impl WordChunker {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut chunks = Vec::new();
        loop {
            let Some(word_start) = self.buffer.find(|c: char| !c.is_whitespace()) else {
                break;
            };
            let Some(word_len) = self.buffer[word_start..].find(char::is_whitespace) else {
                break;
            };
            let gap_start = word_start + word_len;
            let end = self.buffer[gap_start..]
                .find(|c: char| !c.is_whitespace())
                .map_or(self.buffer.len(), |n| gap_start + n);
            chunks.push(self.buffer.drain(..end).collect());
        }
        chunks
    }

    /// 输出缓冲中剩余的文本
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
