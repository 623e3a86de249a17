use super::parser::{parse_validator_reply, ParseError};
use super::prompts::{validator_user_prompt, VALIDATOR_SYSTEM_PROMPT};
use crate::llm::{CompletionRequest, LanguageModel, LlmError, PromptMessage, Usage};
use crate::models::InvoiceExtraction;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("validator call failed: {0}")]
    Model(#[from] LlmError),

    #[error("validator reply could not be parsed: {0}")]
    Parse(#[from] ParseError),
}

/// 校验调用的结果，附带计费所需的原始信息
#[derive(Debug, Clone)]
pub struct ValidatorReply {
    pub extraction: InvoiceExtraction,
    pub usage: Option<Usage>,
    pub prompt: String,
    pub raw_reply: String,
}

/// 固定的 system + user 两条消息，不带工具
pub fn build_validation_request(model: &str, document_text: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![
            PromptMessage::system(VALIDATOR_SYSTEM_PROMPT),
            PromptMessage::user(validator_user_prompt(document_text)),
        ],
        tools: Vec::new(),
    }
}

/// 非流式的发票校验/抽取调用，不做重试
pub struct InvoiceValidator {
    model: Arc<dyn LanguageModel>,
    model_name: String,
}

impl InvoiceValidator {
    pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }

    pub async fn validate(&self, document_text: &str) -> Result<ValidatorReply, ValidationError> {
        let request = build_validation_request(&self.model_name, document_text);
        let prompt = request
            .messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        let completion = self.model.generate_text(request).await?;

        let extraction = match parse_validator_reply(&completion.text) {
            Ok(extraction) => extraction,
            Err(e) => {
                // 原始回复只写日志，不返回给客户端
                warn!("校验回复解析失败: {}; 原始回复: {}", e, completion.text);
                return Err(e.into());
            }
        };

        info!(
            "校验完成: valid={}, type={}",
            extraction.validation.is_valid_invoice, extraction.validation.document_type
        );

        Ok(ValidatorReply {
            extraction,
            usage: completion.usage,
            prompt,
            raw_reply: completion.text,
        })
    }
}
