use crate::models::{
    DuplicateKey, ExtractedInvoiceData, Invoice, InvoiceLineItem, InvoiceWithItems,
    NewTokenUsage, StoredMessage, TokenUsageAggregate,
};
use chrono::Utc;
use indexmap::IndexMap;
use sqlx::PgPool;
use uuid::Uuid;

const INVOICE_COLUMNS: &str = r#"
    id, chat_id, message_id, customer_name, vendor_name, invoice_number,
    invoice_date, due_date, amount, created_at
"#;

/// 按 (供应商, 发票号, 金额) 精确查重，null 与 null 视为相等
pub async fn find_duplicate_invoice(
    pool: &PgPool,
    key: &DuplicateKey,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        r#"
        SELECT {INVOICE_COLUMNS}
        FROM invoice
        WHERE vendor_name IS NOT DISTINCT FROM $1
          AND invoice_number IS NOT DISTINCT FROM $2
          AND amount IS NOT DISTINCT FROM $3
        ORDER BY created_at
        LIMIT 1
        "#
    ))
    .bind(&key.vendor_name)
    .bind(&key.invoice_number)
    .bind(&key.amount)
    .fetch_optional(pool)
    .await
}

/// 在同一事务中插入发票及其明细
///
/// 与已有发票的查重键冲突时不插入任何行，返回 `None`。
pub async fn insert_invoice_with_items(
    pool: &PgPool,
    chat_id: &str,
    message_id: &str,
    data: &ExtractedInvoiceData,
) -> Result<Option<Uuid>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO invoice (
            id, chat_id, message_id, customer_name, vendor_name, invoice_number,
            invoice_date, due_date, amount, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT ON CONSTRAINT invoice_dedup_key DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(chat_id)
    .bind(message_id)
    .bind(&data.customer_name)
    .bind(&data.vendor_name)
    .bind(&data.invoice_number)
    .bind(&data.invoice_date)
    .bind(&data.due_date)
    .bind(&data.amount)
    .bind(Utc::now())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(invoice_id) = inserted else {
        tx.rollback().await?;
        tracing::info!("查重约束冲突, 未插入发票 (chat {})", chat_id);
        return Ok(None);
    };

    let items = data.line_items();
    if !items.is_empty() {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO invoice_line_item (
                id, invoice_id, position, description, quantity, unit_price, total
            ) "
        );

        query_builder.push_values(items.iter().enumerate(), |mut b, (position, item)| {
            b.push_bind(Uuid::new_v4())
                .push_bind(invoice_id)
                .push_bind(position as i32)
                .push_bind(item.description.clone())
                .push_bind(item.quantity.clone())
                .push_bind(item.unit_price.clone())
                .push_bind(item.total.clone());
        });

        query_builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("✓ 发票 {} 已保存, 明细 {} 条", invoice_id, items.len());
    Ok(Some(invoice_id))
}

/// 查询全部发票 (按创建时间升序) 及其明细
pub async fn list_invoices(pool: &PgPool) -> Result<Vec<InvoiceWithItems>, sqlx::Error> {
    let invoices = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoice ORDER BY created_at, id"
    ))
    .fetch_all(pool)
    .await?;

    if invoices.is_empty() {
        return Ok(Vec::new());
    }

    let invoice_ids: Vec<Uuid> = invoices.iter().map(|inv| inv.id).collect();
    let items = sqlx::query_as::<_, InvoiceLineItem>(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, total
        FROM invoice_line_item
        WHERE invoice_id = ANY($1)
        ORDER BY invoice_id, position
        "#,
    )
    .bind(&invoice_ids)
    .fetch_all(pool)
    .await?;

    // 保序分组: 发票顺序不变，明细挂到所属发票下
    let mut grouped: IndexMap<Uuid, InvoiceWithItems> = invoices
        .into_iter()
        .map(|inv| (inv.id, InvoiceWithItems::new(inv)))
        .collect();
    for item in items {
        if let Some(entry) = grouped.get_mut(&item.invoice_id) {
            entry.add_item(item);
        }
    }

    Ok(grouped.into_values().collect())
}

/// 删除发票，明细和用量记录级联删除
pub async fn delete_invoice(pool: &PgPool, invoice_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM invoice WHERE id = $1")
        .bind(invoice_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// 批量插入对话消息
pub async fn insert_messages(
    pool: &PgPool,
    messages: &[StoredMessage],
) -> Result<(), sqlx::Error> {
    if messages.is_empty() {
        return Ok(());
    }

    let start_time = std::time::Instant::now();
    let mut query_builder = sqlx::QueryBuilder::new(
        "INSERT INTO message (id, chat_id, role, content, created_at) "
    );

    query_builder.push_values(messages, |mut b, message| {
        b.push_bind(&message.id)
            .push_bind(&message.chat_id)
            .push_bind(&message.role)
            .push_bind(&message.content)
            .push_bind(message.created_at);
    });

    let result = query_builder.build().execute(pool).await?;
    tracing::debug!(
        "消息写入完成, 影响 {} 行, 耗时: {:?}",
        result.rows_affected(),
        start_time.elapsed()
    );
    Ok(())
}

/// 写入一条 token 用量记录
pub async fn insert_token_usage(pool: &PgPool, usage: &NewTokenUsage) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO token_usage (
            id, invoice_id, input_tokens, output_tokens, total_tokens, estimated_cost, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(usage.invoice_id)
    .bind(usage.input_tokens)
    .bind(usage.output_tokens)
    .bind(usage.total_tokens)
    .bind(usage.estimated_cost)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// 统计平均 token 用量
pub async fn token_usage_aggregate(pool: &PgPool) -> Result<TokenUsageAggregate, sqlx::Error> {
    sqlx::query_as::<_, TokenUsageAggregate>(
        r#"
        SELECT avg(input_tokens)::float8   AS avg_input_tokens,
               avg(output_tokens)::float8  AS avg_output_tokens,
               avg(total_tokens)::float8   AS avg_total_tokens,
               avg(estimated_cost)::float8 AS avg_cost,
               count(id)                   AS total_invoices
        FROM token_usage
        "#,
    )
    .fetch_one(pool)
    .await
}
