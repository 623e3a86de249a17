pub mod auth;
pub mod handlers;

pub use auth::{AuthenticatedUser, TokenAuth};
pub use handlers::*;

use crate::config::AppConfig;
use crate::db::InvoiceStore;
use crate::llm::LanguageModel;
use crate::service::{
    AttachmentError, AttachmentFetcher, InvoicePipeline, InvoiceValidator, MessagePersister,
    Responder, TextExtractor,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// 共享状态: 存储与各处理阶段
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InvoiceStore>,
    pub pipeline: Arc<InvoicePipeline>,
    pub responder: Arc<Responder>,
    pub persister: Arc<MessagePersister>,
    pub auth: Arc<TokenAuth>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn InvoiceStore>,
        model: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self, AttachmentError> {
        let fetcher = AttachmentFetcher::new(Duration::from_secs(config.llm.timeout_secs))?;
        let validator = InvoiceValidator::new(model.clone(), config.llm.model.clone());
        let pipeline = InvoicePipeline::new(fetcher, extractor, validator, store.clone());
        let responder = Responder::new(
            model,
            store.clone(),
            config.llm.model.clone(),
            config.llm.max_steps,
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            responder: Arc::new(responder),
            persister: Arc::new(MessagePersister::new(store.clone())),
            auth: Arc::new(TokenAuth::from_config(&config.auth)),
            store,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/invoice", post(process_invoice))
        .route("/api/invoices", get(list_invoices))
        .route("/api/invoices/token-stats", get(token_stats))
        .route("/api/invoices/:id", delete(delete_invoice))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
