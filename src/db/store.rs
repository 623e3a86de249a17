use super::queries;
use crate::models::{
    DuplicateKey, ExtractedInvoiceData, Invoice, InvoiceWithItems, NewTokenUsage, SaveOutcome,
    StoredMessage, TokenStats,
};
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 插入因查重约束被拒绝，但随后又查不到冲突的那一行
    #[error("invoice conflicted with an existing row that could not be loaded")]
    ConflictNotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// 存储抽象，按构造参数注入到各个服务
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_duplicate_invoice(&self, key: &DuplicateKey) -> Result<Option<Invoice>, StoreError>;

    /// 原子地创建发票及全部明细；查重键冲突时返回已存在的发票
    async fn save_invoice(
        &self,
        chat_id: &str,
        message_id: &str,
        data: &ExtractedInvoiceData,
    ) -> Result<SaveOutcome, StoreError>;

    async fn list_invoices(&self) -> Result<Vec<InvoiceWithItems>, StoreError>;

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError>;

    async fn save_messages(&self, messages: &[StoredMessage]) -> Result<(), StoreError>;

    async fn save_token_usage(&self, usage: &NewTokenUsage) -> Result<(), StoreError>;

    async fn token_stats(&self) -> Result<TokenStats, StoreError>;
}

/// PostgreSQL 实现
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn find_duplicate_invoice(&self, key: &DuplicateKey) -> Result<Option<Invoice>, StoreError> {
        Ok(queries::find_duplicate_invoice(&self.pool, key).await?)
    }

    async fn save_invoice(
        &self,
        chat_id: &str,
        message_id: &str,
        data: &ExtractedInvoiceData,
    ) -> Result<SaveOutcome, StoreError> {
        if let Some(id) = queries::insert_invoice_with_items(&self.pool, chat_id, message_id, data).await? {
            return Ok(SaveOutcome::Saved(id));
        }

        // 并发提交同一张发票: 约束拒绝了插入，返回先写入的那一行
        let key = DuplicateKey::from(data);
        queries::find_duplicate_invoice(&self.pool, &key)
            .await?
            .map(SaveOutcome::Duplicate)
            .ok_or(StoreError::ConflictNotFound)
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceWithItems>, StoreError> {
        Ok(queries::list_invoices(&self.pool).await?)
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::delete_invoice(&self.pool, invoice_id).await?)
    }

    async fn save_messages(&self, messages: &[StoredMessage]) -> Result<(), StoreError> {
        Ok(queries::insert_messages(&self.pool, messages).await?)
    }

    async fn save_token_usage(&self, usage: &NewTokenUsage) -> Result<(), StoreError> {
        Ok(queries::insert_token_usage(&self.pool, usage).await?)
    }

    async fn token_stats(&self) -> Result<TokenStats, StoreError> {
        Ok(queries::token_usage_aggregate(&self.pool).await?.into())
    }
}
