use invoice_chat_rust::config::DEFAULT_LOG_FILTER;
use invoice_chat_rust::{
    build_router, create_pool, db, AppConfig, AppState, InvoiceStore, LanguageModel, MemoryStore,
    OpenAiClient, PdfTextExtractor, PgInvoiceStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式, RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置 (api_key 在 Debug 输出中已脱敏)
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 存储: memory:// 使用进程内存储，否则连接 PostgreSQL 并执行迁移
    let store: Arc<dyn InvoiceStore> = if config.database.is_memory() {
        warn!("Using in-memory store, data will be lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let pool = create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;
        info!("Database pool created, migrations applied");
        Arc::new(PgInvoiceStore::new(pool))
    };

    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiClient::from_config(&config.llm)?);
    let state = AppState::new(&config, store, model, Arc::new(PdfTextExtractor))?;
    if state.auth.is_empty() {
        warn!("AUTH_TOKENS is empty, authenticated endpoints will reject every request");
    }

    let app = build_router(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST   /api/chat/invoice         - process an uploaded invoice (streamed)");
    info!("  GET    /api/invoices             - list invoices with line items");
    info!("  GET    /api/invoices/token-stats - token usage statistics");
    info!("  DELETE /api/invoices/:id         - delete an invoice");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
