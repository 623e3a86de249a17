use crate::db::StoreError;
use crate::service::{AttachmentError, ExtractionError, ValidationError};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// 接口层错误汇总；客户端只看到统一的提示，细节写日志
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error("request contains no messages")]
    EmptyConversation,

    #[error("last message has no attachment")]
    MissingAttachment,

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to list invoices: {0}")]
    ListInvoices(#[source] StoreError),

    #[error("failed to load token stats: {0}")]
    TokenStats(#[source] StoreError),

    #[error("failed to delete invoice: {0}")]
    DeleteInvoice(#[source] StoreError),

    #[error("invoice {0} not found")]
    InvoiceNotFound(uuid::Uuid),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => {
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
            AppError::EmptyConversation | AppError::MissingAttachment => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::InvoiceNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ListInvoices(_) => internal(&self, "Failed to fetch invoices"),
            AppError::TokenStats(_) => internal(&self, "Failed to fetch token stats"),
            AppError::DeleteInvoice(_) => internal(&self, "Failed to delete invoice"),
            _ => {
                error!("Error in invoice processing: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process invoice".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn internal(err: &AppError, message: &str) -> (StatusCode, String) {
    error!("{}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}
