use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Token 用量表 (token_usage)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
    pub created_at: DateTime<Utc>,
}

/// 待写入的用量记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewTokenUsage {
    pub invoice_id: Uuid,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
}

/// 用量聚合查询结果
#[derive(Debug, Clone, Default, FromRow)]
pub struct TokenUsageAggregate {
    pub avg_input_tokens: Option<f64>,
    pub avg_output_tokens: Option<f64>,
    pub avg_total_tokens: Option<f64>,
    pub avg_cost: Option<f64>,
    pub total_invoices: i64,
}

/// 用量统计 (token-stats 接口响应)
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub average_input_tokens: i64,
    pub average_output_tokens: i64,
    pub average_total_tokens: i64,
    pub average_cost: String,
    pub total_invoices: i64,
    pub total_cost: String,
}

impl From<TokenUsageAggregate> for TokenStats {
    fn from(agg: TokenUsageAggregate) -> Self {
        let avg_cost = agg.avg_cost.unwrap_or(0.0);
        Self {
            average_input_tokens: agg.avg_input_tokens.unwrap_or(0.0).round() as i64,
            average_output_tokens: agg.avg_output_tokens.unwrap_or(0.0).round() as i64,
            average_total_tokens: agg.avg_total_tokens.unwrap_or(0.0).round() as i64,
            average_cost: format!("{:.4}", avg_cost),
            total_invoices: agg.total_invoices,
            total_cost: format!("{:.4}", avg_cost * agg.total_invoices as f64),
        }
    }
}
