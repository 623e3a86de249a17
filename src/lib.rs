pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod service;

pub use api::{build_router, AppState};
pub use config::AppConfig;
pub use db::{create_pool, InvoiceStore, MemoryStore, PgInvoiceStore};
pub use error::AppError;
pub use llm::{LanguageModel, OpenAiClient};
pub use service::{PdfTextExtractor, TextExtractor};
