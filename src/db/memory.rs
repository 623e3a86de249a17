use super::store::{InvoiceStore, StoreError};
use crate::models::{
    DuplicateKey, ExtractedInvoiceData, Invoice, InvoiceLineItem, InvoiceWithItems,
    NewTokenUsage, SaveOutcome, StoredMessage, TokenStats, TokenUsage, TokenUsageAggregate,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 进程内存储: 测试替身 / `memory://` 本地运行
///
/// 查重与插入在同一把写锁内完成，语义与数据库唯一约束一致。
#[derive(Default)]
pub struct MemoryStore {
    invoices: RwLock<Vec<Invoice>>,
    line_items: DashMap<Uuid, Vec<InvoiceLineItem>>,
    messages: DashMap<String, Vec<StoredMessage>>,
    token_usage: RwLock<Vec<TokenUsage>>,
    fail_message_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的消息写入全部失败 (用于验证失败被吞掉)
    pub fn fail_message_writes(&self) {
        self.fail_message_writes.store(true, Ordering::SeqCst);
    }

    pub async fn invoice_count(&self) -> usize {
        self.invoices.read().await.len()
    }

    pub fn line_items_for(&self, invoice_id: Uuid) -> Vec<InvoiceLineItem> {
        self.line_items
            .get(&invoice_id)
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn messages_for_chat(&self, chat_id: &str) -> Vec<StoredMessage> {
        self.messages
            .get(chat_id)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub async fn token_usage(&self) -> Vec<TokenUsage> {
        self.token_usage.read().await.clone()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn find_duplicate_invoice(&self, key: &DuplicateKey) -> Result<Option<Invoice>, StoreError> {
        let invoices = self.invoices.read().await;
        Ok(invoices.iter().find(|inv| key.matches(inv)).cloned())
    }

    async fn save_invoice(
        &self,
        chat_id: &str,
        message_id: &str,
        data: &ExtractedInvoiceData,
    ) -> Result<SaveOutcome, StoreError> {
        let mut invoices = self.invoices.write().await;

        let key = DuplicateKey::from(data);
        if let Some(existing) = invoices.iter().find(|inv| key.matches(inv)) {
            return Ok(SaveOutcome::Duplicate(existing.clone()));
        }

        let invoice_id = Uuid::new_v4();
        let items: Vec<InvoiceLineItem> = data
            .line_items()
            .iter()
            .map(|item| InvoiceLineItem {
                id: Uuid::new_v4(),
                invoice_id,
                description: item.description.clone(),
                quantity: item.quantity.clone(),
                unit_price: item.unit_price.clone(),
                total: item.total.clone(),
            })
            .collect();

        invoices.push(Invoice {
            id: invoice_id,
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            customer_name: data.customer_name.clone(),
            vendor_name: data.vendor_name.clone(),
            invoice_number: data.invoice_number.clone(),
            invoice_date: data.invoice_date.clone(),
            due_date: data.due_date.clone(),
            amount: data.amount.clone(),
            created_at: Utc::now(),
        });
        self.line_items.insert(invoice_id, items);

        Ok(SaveOutcome::Saved(invoice_id))
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceWithItems>, StoreError> {
        let invoices = self.invoices.read().await;
        Ok(invoices
            .iter()
            .map(|inv| InvoiceWithItems {
                invoice: inv.clone(),
                line_items: self.line_items_for(inv.id),
            })
            .collect())
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        let mut invoices = self.invoices.write().await;
        let before = invoices.len();
        invoices.retain(|inv| inv.id != invoice_id);
        self.line_items.remove(&invoice_id);
        self.token_usage
            .write()
            .await
            .retain(|usage| usage.invoice_id != invoice_id);
        Ok(invoices.len() != before)
    }

    async fn save_messages(&self, messages: &[StoredMessage]) -> Result<(), StoreError> {
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("message writes disabled".into()));
        }
        for message in messages {
            self.messages
                .entry(message.chat_id.clone())
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }

    async fn save_token_usage(&self, usage: &NewTokenUsage) -> Result<(), StoreError> {
        self.token_usage.write().await.push(TokenUsage {
            id: Uuid::new_v4(),
            invoice_id: usage.invoice_id,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            estimated_cost: usage.estimated_cost,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn token_stats(&self) -> Result<TokenStats, StoreError> {
        let usage = self.token_usage.read().await;
        if usage.is_empty() {
            return Ok(TokenUsageAggregate::default().into());
        }

        let n = usage.len() as f64;
        let avg = |f: fn(&TokenUsage) -> f64| Some(usage.iter().map(f).sum::<f64>() / n);
        Ok(TokenUsageAggregate {
            avg_input_tokens: avg(|u| u.input_tokens as f64),
            avg_output_tokens: avg(|u| u.output_tokens as f64),
            avg_total_tokens: avg(|u| u.total_tokens as f64),
            avg_cost: avg(|u| u.estimated_cost),
            total_invoices: usage.len() as i64,
        }
        .into())
    }
}
