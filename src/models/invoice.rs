use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::extraction::ExtractedInvoiceData;

/// 发票主表 (invoice)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub chat_id: String,
    pub message_id: String,
    pub customer_name: Option<String>,
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>, // 原样保存模型返回的日期文本
    pub due_date: Option<String>,
    pub amount: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

/// 发票明细表 (invoice_line_item)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
    pub total: Option<BigDecimal>, // 信任模型给出的合计，不做 quantity * unit_price 校正
}

/// 发票及其所有明细 (列表接口 / getAllInvoices 工具输出)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

impl InvoiceWithItems {
    pub fn new(invoice: Invoice) -> Self {
        Self {
            invoice,
            line_items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: InvoiceLineItem) {
        self.line_items.push(item);
    }
}

/// 查重键: (供应商, 发票号, 金额)，null 与 null 视为相等
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateKey {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub amount: Option<BigDecimal>,
}

impl DuplicateKey {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.vendor_name == invoice.vendor_name
            && self.invoice_number == invoice.invoice_number
            && self.amount == invoice.amount
    }
}

impl From<&ExtractedInvoiceData> for DuplicateKey {
    fn from(data: &ExtractedInvoiceData) -> Self {
        Self {
            vendor_name: data.vendor_name.clone(),
            invoice_number: data.invoice_number.clone(),
            amount: data.amount.clone(),
        }
    }
}

/// 保存结果: 新建成功，或与已有发票冲突
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Saved(Uuid),
    Duplicate(Invoice),
}
