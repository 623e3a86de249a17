use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decimal;
use super::invoice::Invoice;

/// 校验调用返回的 JSON 信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceExtraction {
    pub validation: Validation,
    #[serde(default, deserialize_with = "decimal::null_as_default")]
    pub data: ExtractedInvoiceData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid_invoice: bool,
    #[serde(default, deserialize_with = "decimal::null_as_default")]
    pub document_type: String,
    #[serde(default, deserialize_with = "decimal::null_as_default")]
    pub reason: String,
}

/// 模型抽取出的发票字段，全部可空
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInvoiceData {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "decimal::deserialize_opt")]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub line_items: Option<Vec<ExtractedLineItem>>,
}

impl ExtractedInvoiceData {
    pub fn line_items(&self) -> &[ExtractedLineItem] {
        self.line_items.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedLineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "decimal::deserialize_opt")]
    pub quantity: Option<BigDecimal>,
    #[serde(default, deserialize_with = "decimal::deserialize_opt")]
    pub unit_price: Option<BigDecimal>,
    #[serde(default, deserialize_with = "decimal::deserialize_opt")]
    pub total: Option<BigDecimal>,
}

impl ExtractedLineItem {
    /// 合计与 quantity * unit_price 不一致时返回 true (任一字段缺失时不判断)
    pub fn total_mismatch(&self) -> bool {
        match (&self.quantity, &self.unit_price, &self.total) {
            (Some(q), Some(p), Some(t)) => &(q * p) != t,
            _ => false,
        }
    }
}

/// 三分支结果: 无效 / 重复 / 新建
#[derive(Debug, Clone)]
pub enum InvoiceOutcome {
    Invalid,
    Duplicate(Invoice),
    Saved(Uuid),
}

/// 流水线处理结果，驱动后续的对话回复
#[derive(Debug, Clone)]
pub struct ProcessedInvoice {
    pub extraction: InvoiceExtraction,
    pub outcome: InvoiceOutcome,
}

impl ProcessedInvoice {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, InvoiceOutcome::Duplicate(_))
    }

    pub fn invoice_id(&self) -> Option<Uuid> {
        match &self.outcome {
            InvoiceOutcome::Saved(id) => Some(*id),
            InvoiceOutcome::Duplicate(existing) => Some(existing.id),
            InvoiceOutcome::Invalid => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn null_data_and_missing_fields_fall_back_to_defaults() {
        let parsed: InvoiceExtraction = serde_json::from_str(
            r#"{"validation":{"isValidInvoice":false,"documentType":"receipt","reason":null},"data":null}"#,
        )
        .unwrap();
        assert!(!parsed.validation.is_valid_invoice);
        assert_eq!(parsed.validation.reason, "");
        assert!(parsed.data.vendor_name.is_none());
        assert!(parsed.data.line_items().is_empty());
    }

    #[test]
    fn line_total_mismatch_is_detected() {
        let item = ExtractedLineItem {
            description: Some("Widget".into()),
            quantity: Some(BigDecimal::from(2)),
            unit_price: Some(BigDecimal::from(50)),
            total: Some(BigDecimal::from_str("100.00").unwrap()),
        };
        assert!(!item.total_mismatch());

        let wrong = ExtractedLineItem {
            total: Some(BigDecimal::from(90)),
            ..item.clone()
        };
        assert!(wrong.total_mismatch());

        let partial = ExtractedLineItem {
            quantity: None,
            ..wrong
        };
        assert!(!partial.total_mismatch());
    }
}
