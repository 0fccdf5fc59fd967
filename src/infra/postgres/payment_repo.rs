use {
    super::stored,
    crate::domain::{
        error::PipelineError,
        id::{CorrelationId, RefundId},
        money::MoneyAmount,
        order::{Order, OrderStatus},
        payment::{Payment, PaymentParams, PaymentState},
        repository::AppliedRefund,
    },
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    sqlx::PgPool,
    std::collections::HashSet,
    uuid::Uuid,
};

type Tx = sqlx::Transaction<'static, sqlx::Postgres>;

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_code: String,
    local_id: i32,
    provider: String,
    amount: Decimal,
    state: String,
    process_initiated: bool,
    external_reference: Option<String>,
    refunded_amount: i64,
    fail_reason: Option<String>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PipelineError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment::new(PaymentParams {
            id: row.id,
            order_code: row.order_code,
            local_id: row.local_id,
            provider: row.provider,
            amount: row.amount,
            state: PaymentState::try_from(row.state.as_str()).map_err(stored)?,
            process_initiated: row.process_initiated,
            external_reference: row
                .external_reference
                .map(CorrelationId::new)
                .transpose()
                .map_err(stored)?,
            refunded_amount: MoneyAmount::new(row.refunded_amount).map_err(stored)?,
            fail_reason: row.fail_reason,
        }))
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    code: String,
    status: String,
    total: Decimal,
    expires: DateTime<Utc>,
    sales_channel: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = PipelineError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            code: row.code,
            status: OrderStatus::try_from(row.status.as_str()).map_err(stored)?,
            total: row.total,
            expires: row.expires,
            sales_channel: row.sales_channel,
        })
    }
}

/// Locator query. Lowest `local_id` wins if the reference is not unique.
pub async fn find_payment_id(
    pool: &PgPool,
    provider: &str,
    correlation_id: &CorrelationId,
) -> Result<Option<Uuid>, PipelineError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM order_payments
        WHERE provider = $1 AND external_reference = $2
        ORDER BY order_code, local_id
        LIMIT 2
        "#,
    )
    .bind(provider)
    .bind(correlation_id.as_str())
    .fetch_all(pool)
    .await?;

    if ids.len() > 1 {
        tracing::warn!(
            correlation_id = %correlation_id,
            "several payments share a correlation id, using the lowest local id"
        );
    }
    Ok(ids.first().copied())
}

/// Serialize all processing for this payment until the transaction ends.
pub async fn lock(tx: &mut Tx, payment_id: Uuid, lock_timeout_ms: u64) -> Result<(), PipelineError> {
    sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)")
        .bind(format!("{lock_timeout_ms}ms"))
        .execute(&mut **tx)
        .await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("pix_openpix:{payment_id}"))
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn get_payment_for_update(tx: &mut Tx, id: Uuid) -> Result<Option<Payment>, PipelineError> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT id, order_code, local_id, provider, amount, state, process_initiated,
               external_reference, refunded_amount, fail_reason
        FROM order_payments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(Payment::try_from).transpose()
}

pub async fn get_order_for_update(tx: &mut Tx, code: &str) -> Result<Order, PipelineError> {
    let row = sqlx::query_as::<_, OrderRow>(
        "SELECT code, status, total, expires, sales_channel FROM orders WHERE code = $1 FOR UPDATE",
    )
    .bind(code)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| PipelineError::Storage(format!("payment references missing order {code}")))?;

    Order::try_from(row)
}

/// Sum of the order's confirmed payments other than `except`.
pub async fn other_confirmed_total(
    tx: &mut Tx,
    order_code: &str,
    except: Uuid,
) -> Result<Decimal, PipelineError> {
    let total: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(amount) FROM order_payments
        WHERE order_code = $1 AND id <> $2 AND state = 'confirmed'
        "#,
    )
    .bind(order_code)
    .bind(except)
    .fetch_one(&mut **tx)
    .await?;

    Ok(total.unwrap_or_default())
}

pub async fn applied_refund_ids(tx: &mut Tx, payment_id: Uuid) -> Result<HashSet<RefundId>, PipelineError> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT refund_id FROM payment_refunds WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_all(&mut **tx)
            .await?;

    ids.into_iter()
        .map(|id| RefundId::new(id).map_err(stored))
        .collect()
}

pub async fn update_payment(tx: &mut Tx, payment: &Payment) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE order_payments
        SET state = $1, refunded_amount = $2, fail_reason = $3, updated_at = now()
        WHERE id = $4
        "#,
    )
    .bind(payment.state().as_str())
    .bind(payment.refunded_amount().cents())
    .bind(payment.fail_reason())
    .bind(payment.id())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn update_order_status(tx: &mut Tx, order: &Order) -> Result<(), PipelineError> {
    sqlx::query("UPDATE orders SET status = $1, updated_at = now() WHERE code = $2")
        .bind(order.status.as_str())
        .bind(&order.code)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Fails on a repeated `(payment_id, refund_id)` so a double apply rolls back.
pub async fn insert_applied_refund(tx: &mut Tx, refund: &AppliedRefund) -> Result<(), PipelineError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO payment_refunds (payment_id, refund_id, amount)
        VALUES ($1, $2, $3)
        ON CONFLICT (payment_id, refund_id) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(refund.payment_id)
    .bind(refund.refund_id.as_str())
    .bind(refund.amount.cents())
    .fetch_optional(&mut **tx)
    .await?;

    if inserted.is_none() {
        return Err(PipelineError::Storage(format!(
            "refund {} already applied to payment {}",
            refund.refund_id, refund.payment_id
        )));
    }
    Ok(())
}
