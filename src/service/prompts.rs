//! 两次模型调用使用的提示词与回复模板。

use crate::models::{ExtractedInvoiceData, Invoice, InvoiceOutcome, ProcessedInvoice, Validation};
use std::fmt::Display;
use uuid::Uuid;

pub const VALIDATOR_SYSTEM_PROMPT: &str = "\
You are an invoice validation expert. Analyze the provided document text and:
1. Validate if it's a proper invoice (not a receipt or statement)
2. Extract key information if it's a valid invoice
3. Return the data in the specified JSON format

Be strict in validation - only accept proper invoices, not receipts or statements.";

const VALIDATOR_USER_PROMPT: &str = r#"Analyze this document and return a JSON response with this exact structure:
{
    "validation": {
        "isValidInvoice": boolean,
        "documentType": string,
        "reason": string
    },
    "data": {
        "customerName": string | null,
        "vendorName": string | null,
        "invoiceNumber": string | null,
        "invoiceDate": string | null,
        "dueDate": string | null,
        "amount": number | null,
        "lineItems": [
            {
                "description": string,
                "quantity": number,
                "unitPrice": number,
                "total": number
            }
        ] | null
    }
}

Document text:
"#;

pub const RESPONDER_SYSTEM_PROMPT: &str = "\
You are an invoice processing assistant. Follow these rules:
1. For a valid non duplicate invoice, FIRST you must ALWAYS show the current invoice details in text format with bullet points, NEVER in a table. ONLY AFTER this, ALWAYS invoke getAllInvoices tool and only use tables when showing results from getAllInvoices tool.
2. For a valid duplicate invoice, clearly explain the match criteria and show comparison in the exact format provided. Always be helpful and suggest next steps.
3. For an invalid invoice, provide reasoning in the exact format provided";

pub const GET_ALL_INVOICES_DESCRIPTION: &str = "Get all processed invoices. When this tool is invoked, you must ONLY return the tool result without any additional text before or after.";

const DISPLAY_EXACTLY: &str =
    "Display exactly this text and ALWAYS maintain the order of the text and the formatting:";

/// 校验调用的 user 消息；文本为空时照常嵌入
pub fn validator_user_prompt(document_text: &str) -> String {
    format!("{VALIDATOR_USER_PROMPT}{document_text}")
}

/// 按三分支结果生成回复调用的 user 消息
pub fn responder_prompt(processed: &ProcessedInvoice) -> String {
    let data = &processed.extraction.data;
    match &processed.outcome {
        InvoiceOutcome::Invalid => invalid_notice(&processed.extraction.validation),
        InvoiceOutcome::Duplicate(existing) => duplicate_notice(data, existing),
        InvoiceOutcome::Saved(id) => saved_notice(data, *id),
    }
}

fn invalid_notice(validation: &Validation) -> String {
    format!(
        "{DISPLAY_EXACTLY}

❌ **Invalid Invoice**

Document type detected: {}

{}

Please provide a valid invoice document. The document should:
• Be a proper invoice (not a receipt or statement)
• Include vendor and customer information
• Have a unique invoice number
• Show clear line items and totals",
        validation.document_type, validation.reason
    )
}

fn duplicate_notice(data: &ExtractedInvoiceData, existing: &Invoice) -> String {
    format!(
        "{DISPLAY_EXACTLY}

⚠️ **Duplicate Invoice Detected**

This invoice matches an existing entry:
• Vendor: {}
• Invoice #: {}
• Amount: ${}

Previously processed on {}
**Invoice ID**: {}

Type \"Show all invoices\" to view the existing invoice details.",
        or_na(&data.vendor_name),
        or_na(&data.invoice_number),
        or_na(&data.amount),
        existing.created_at.format("%-m/%-d/%Y"),
        existing.id
    )
}

fn saved_notice(data: &ExtractedInvoiceData, invoice_id: Uuid) -> String {
    let items = data.line_items();
    let line_items = if items.is_empty() {
        "No line items found".to_string()
    } else {
        items
            .iter()
            .map(|item| {
                format!(
                    "• {} [Qty - {}, Units - {}, Total - ${}]",
                    or_na(&item.description),
                    or_na(&item.quantity),
                    or_na(&item.unit_price),
                    or_na(&item.total)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "First, display this exact text about the current invoice with the confirmation text not in a blockquote and ALWAYS maintain the order of the text and the formatting:

✅ **Invoice Processed Successfully**

I've verified this is a unique invoice and saved it to the database.

**Invoice Details:**
• Vendor: {}
• Customer: {}
• Invoice Number: {}
• Date: {}
• Due Date: {}
• Amount: ${}

**Line Items:**
{line_items}

Invoice ID: {invoice_id}

After, invoke the tool getAllInvoices ONLY and do nothing else. Do not print the details of the all the invoices again. Do not print the tool call. Instead print \"Let me show you the updated list of all invoices.\"",
        or_na(&data.vendor_name),
        or_na(&data.customer_name),
        or_na(&data.invoice_number),
        or_na(&data.invoice_date),
        or_na(&data.due_date),
        or_na(&data.amount)
    )
}

fn or_na<T: Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "N/A".to_string())
}
