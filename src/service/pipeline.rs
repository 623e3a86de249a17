use super::attachment::AttachmentFetcher;
use super::extractor::TextExtractor;
use super::usage::usage_record;
use super::validator::{InvoiceValidator, ValidatorReply};
use crate::db::InvoiceStore;
use crate::error::AppError;
use crate::models::{
    ChatRequest, DuplicateKey, InvoiceOutcome, ProcessedInvoice, SaveOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// 附件 -> 文本 -> 校验 -> 查重 -> 入库
pub struct InvoicePipeline {
    fetcher: AttachmentFetcher,
    extractor: Arc<dyn TextExtractor>,
    validator: InvoiceValidator,
    store: Arc<dyn InvoiceStore>,
}

impl InvoicePipeline {
    pub fn new(
        fetcher: AttachmentFetcher,
        extractor: Arc<dyn TextExtractor>,
        validator: InvoiceValidator,
        store: Arc<dyn InvoiceStore>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            validator,
            store,
        }
    }

    pub async fn process(&self, request: &ChatRequest) -> Result<ProcessedInvoice, AppError> {
        let start = Instant::now();

        let message = request.messages.last().ok_or(AppError::EmptyConversation)?;
        let attachment = message
            .experimental_attachments
            .first()
            .ok_or(AppError::MissingAttachment)?;

        let fetched = self.fetcher.fetch(attachment).await?;

        // PDF 解析是 CPU 密集操作
        let extractor = Arc::clone(&self.extractor);
        let text = tokio::task::spawn_blocking(move || {
            extractor.extract(&fetched.bytes, &fetched.mime_type)
        })
        .await??;
        info!("[chat {}] 提取文本 {} 字符", request.id, text.chars().count());

        let reply = self.validator.validate(&text).await?;
        let processed = self.resolve(&request.id, &message.id, reply).await?;

        info!(
            "[chat {}] 发票处理完成: {}, 耗时 {:?}",
            request.id,
            outcome_label(&processed.outcome),
            start.elapsed()
        );
        Ok(processed)
    }

    /// 按校验结果分支: 无效直接返回；有效则查重，未重复时入库
    pub async fn resolve(
        &self,
        chat_id: &str,
        message_id: &str,
        reply: ValidatorReply,
    ) -> Result<ProcessedInvoice, AppError> {
        let ValidatorReply {
            extraction,
            usage,
            prompt,
            raw_reply,
        } = reply;

        if !extraction.validation.is_valid_invoice {
            return Ok(ProcessedInvoice {
                extraction,
                outcome: InvoiceOutcome::Invalid,
            });
        }

        let data = &extraction.data;
        for (i, item) in data.line_items().iter().enumerate() {
            if item.total_mismatch() {
                warn!(
                    "[chat {}] 明细 {} 合计与 数量x单价 不一致: {:?}",
                    chat_id, i, item
                );
            }
        }

        let key = DuplicateKey::from(data);
        if let Some(existing) = self.store.find_duplicate_invoice(&key).await? {
            info!("[chat {}] 重复发票, 已有记录 {}", chat_id, existing.id);
            return Ok(ProcessedInvoice {
                extraction,
                outcome: InvoiceOutcome::Duplicate(existing),
            });
        }

        let outcome = match self.store.save_invoice(chat_id, message_id, data).await? {
            SaveOutcome::Saved(id) => {
                info!(
                    "[chat {}] 新发票 {} 已保存, 明细 {} 条",
                    chat_id,
                    id,
                    data.line_items().len()
                );
                let record = usage_record(id, usage, &prompt, &raw_reply);
                if let Err(e) = self.store.save_token_usage(&record).await {
                    error!("[chat {}] 记录 token 用量失败: {}", chat_id, e);
                }
                InvoiceOutcome::Saved(id)
            }
            SaveOutcome::Duplicate(existing) => {
                info!("[chat {}] 并发提交的重复发票, 已有记录 {}", chat_id, existing.id);
                InvoiceOutcome::Duplicate(existing)
            }
        };

        Ok(ProcessedInvoice { extraction, outcome })
    }
}

fn outcome_label(outcome: &InvoiceOutcome) -> &'static str {
    match outcome {
        InvoiceOutcome::Invalid => "invalid",
        InvoiceOutcome::Duplicate(_) => "duplicate",
        InvoiceOutcome::Saved(_) => "saved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::llm::{
        Completion, CompletionRequest, CompletionStream, LanguageModel, LlmError, Usage,
    };
    use crate::models::{Attachment, IncomingMessage};
    use crate::service::extractor::ExtractionError;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Mutex;
    use std::time::Duration;

    const VALID_REPLY: &str = r#"Sure! {"validation":{"isValidInvoice":true,"documentType":"invoice","reason":"ok"},"data":{"vendorName":"Acme","invoiceNumber":"INV-1","amount":100,"customerName":"Bob","invoiceDate":"2024-01-01","dueDate":"2024-02-01","lineItems":[{"description":"Widget","quantity":2,"unitPrice":50,"total":100}]}}"#;
    const INVALID_REPLY: &str = r#"{"validation":{"isValidInvoice":false,"documentType":"receipt","reason":"This is a receipt"},"data":{"vendorName":"Acme","invoiceNumber":"R-1","amount":5}}"#;

    struct FixedModel {
        reply: String,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn generate_text(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
            self.prompts.lock().unwrap().push(request);
            Ok(Completion {
                text: self.reply.clone(),
                usage: Some(Usage { prompt_tokens: 1000, completion_tokens: 100 }),
            })
        }

        async fn stream_text(&self, _request: CompletionRequest) -> Result<CompletionStream, LlmError> {
            Err(LlmError::Stream("not scripted".into()))
        }
    }

    struct EchoExtractor;

    impl TextExtractor for EchoExtractor {
        fn extract(&self, bytes: &[u8], _mime_type: &str) -> Result<String, ExtractionError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn pipeline(reply: &str, store: Arc<MemoryStore>) -> (InvoicePipeline, Arc<FixedModel>) {
        let model = Arc::new(FixedModel {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let pipeline = InvoicePipeline::new(
            AttachmentFetcher::new(Duration::from_secs(5)).unwrap(),
            Arc::new(EchoExtractor),
            InvoiceValidator::new(model.clone(), "test-model"),
            store,
        );
        (pipeline, model)
    }

    fn request(message_id: &str, text: &str) -> ChatRequest {
        ChatRequest {
            id: "chat-1".into(),
            messages: vec![IncomingMessage {
                id: message_id.into(),
                role: "user".into(),
                content: String::new(),
                experimental_attachments: vec![Attachment {
                    url: format!("data:application/pdf;base64,{}", STANDARD.encode(text)),
                    name: Some("invoice.pdf".into()),
                    content_type: Some("application/pdf".into()),
                }],
            }],
            selected_chat_model: None,
        }
    }

    #[tokio::test]
    async fn valid_new_invoice_is_saved_with_items_and_usage() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(VALID_REPLY, store.clone());

        let processed = pipeline.process(&request("m1", "INVOICE")).await.unwrap();
        let InvoiceOutcome::Saved(id) = processed.outcome else {
            panic!("expected a saved invoice");
        };

        let invoices = store.list_invoices().await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].invoice.id, id);
        assert_eq!(invoices[0].invoice.message_id, "m1");
        assert_eq!(invoices[0].invoice.customer_name.as_deref(), Some("Bob"));
        assert_eq!(invoices[0].line_items.len(), 1);

        let usage = store.token_usage().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].invoice_id, id);
        assert_eq!(usage[0].total_tokens, 1100);
    }

    #[tokio::test]
    async fn resubmission_is_flagged_with_first_invoice() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(VALID_REPLY, store.clone());

        let first = pipeline.process(&request("m1", "INVOICE")).await.unwrap();
        let second = pipeline.process(&request("m2", "INVOICE")).await.unwrap();

        assert!(second.is_duplicate());
        assert_eq!(second.invoice_id(), first.invoice_id());
        assert_eq!(store.invoice_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_document_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(INVALID_REPLY, store.clone());

        let processed = pipeline.process(&request("m1", "RECEIPT")).await.unwrap();
        assert!(matches!(processed.outcome, InvoiceOutcome::Invalid));
        assert_eq!(store.invoice_count().await, 0);
        assert!(store.token_usage().await.is_empty());
    }

    #[tokio::test]
    async fn empty_extraction_still_reaches_the_validator() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, model) = pipeline(INVALID_REPLY, store);

        pipeline.process(&request("m1", "")).await.unwrap();
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let user = prompts[0].messages[1].content.as_deref().unwrap();
        assert!(user.ends_with("Document text:\n"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline("I cannot help with that.", store.clone());

        let err = pipeline.process(&request("m1", "INVOICE")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.invoice_count().await, 0);
    }

    #[tokio::test]
    async fn message_without_attachment_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(VALID_REPLY, store);

        let mut req = request("m1", "INVOICE");
        req.messages[0].experimental_attachments.clear();
        assert!(matches!(
            pipeline.process(&req).await,
            Err(AppError::MissingAttachment)
        ));

        req.messages.clear();
        assert!(matches!(
            pipeline.process(&req).await,
            Err(AppError::EmptyConversation)
        ));
    }
}
