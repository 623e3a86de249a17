pub mod attachment;
pub mod data_stream;
pub mod extractor;
pub mod parser;
pub mod persister;
pub mod pipeline;
pub mod prompts;
pub mod responder;
pub mod usage;
pub mod validator;

pub use attachment::{AttachmentError, AttachmentFetcher, FetchedAttachment};
pub use data_stream::{DataStreamPart, WordChunker, DATA_STREAM_HEADER, DATA_STREAM_VERSION};
pub use extractor::{ExtractionError, PdfTextExtractor, TextExtractor};
pub use parser::{parse_validator_reply, ParseError};
pub use persister::{sanitize_response_messages, MessagePersister};
pub use pipeline::InvoicePipeline;
pub use responder::{Responder, ResponderError, GET_ALL_INVOICES, STREAM_ERROR_MESSAGE};
pub use validator::{build_validation_request, InvoiceValidator, ValidationError, ValidatorReply};
