use super::auth::AuthenticatedUser;
use super::AppState;
use crate::error::AppError;
use crate::models::{ChatRequest, InvoiceWithItems, TokenStats};
use crate::service::{DATA_STREAM_HEADER, DATA_STREAM_VERSION};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

/// 流式回复的缓冲帧数
const STREAM_BUFFER: usize = 64;

/// 发票列表响应体
#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceWithItems>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 处理上传的发票: 先同步完成校验与入库，再流式返回对话回复
pub async fn process_invoice(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    info!(
        "[chat {}] 用户 {} 提交发票, 消息 {} 条, 模型 {:?}",
        request.id,
        user.user_id,
        request.messages.len(),
        request.selected_chat_model
    );

    let processed = state.pipeline.process(&request).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let responder = state.responder.clone();
    let persister = state.persister.clone();
    let chat_id = request.id;
    tokio::spawn(async move {
        if let Some(messages) = responder.run(&processed, tx).await {
            persister.persist(&chat_id, messages).await;
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (HeaderName::from_static(DATA_STREAM_HEADER), DATA_STREAM_VERSION),
        ],
        body,
    )
        .into_response())
}

/// 所有发票及明细
pub async fn list_invoices(State(state): State<AppState>) -> Result<Json<InvoiceListResponse>, AppError> {
    let invoices = state
        .store
        .list_invoices()
        .await
        .map_err(AppError::ListInvoices)?;
    Ok(Json(InvoiceListResponse { invoices }))
}

/// token 用量统计
pub async fn token_stats(State(state): State<AppState>) -> Result<Json<TokenStats>, AppError> {
    let stats = state.store.token_stats().await.map_err(AppError::TokenStats)?;
    Ok(Json(stats))
}

/// 管理接口: 删除发票 (明细与用量级联删除)
pub async fn delete_invoice(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_invoice(invoice_id)
        .await
        .map_err(AppError::DeleteInvoice)?;

    if !deleted {
        return Err(AppError::InvoiceNotFound(invoice_id));
    }
    info!("用户 {} 删除发票 {}", user.user_id, invoice_id);
    Ok(StatusCode::NO_CONTENT)
}
