pub mod chat;
pub mod decimal;
pub mod extraction;
pub mod invoice;
pub mod usage;

pub use chat::{Attachment, ChatRequest, IncomingMessage, MessagePart, ResponseMessage, StoredMessage};
pub use extraction::{
    ExtractedInvoiceData, ExtractedLineItem, InvoiceExtraction, InvoiceOutcome,
    ProcessedInvoice, Validation,
};
pub use invoice::{DuplicateKey, Invoice, InvoiceLineItem, InvoiceWithItems, SaveOutcome};
pub use usage::{NewTokenUsage, TokenStats, TokenUsage, TokenUsageAggregate};
