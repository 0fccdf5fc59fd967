use {
    super::stored,
    crate::domain::{
        error::PipelineError,
        hooks::{HookJob, HookKind, HookPayload, NewHookJob},
        money::MoneyAmount,
    },
};

#[derive(sqlx::FromRow)]
struct HookJobRow {
    id: uuid::Uuid,
    kind: String,
    amount: i64,
    payload: serde_json::Value,
    attempts: i32,
}

impl TryFrom<HookJobRow> for HookJob {
    type Error = PipelineError;

    fn try_from(row: HookJobRow) -> Result<Self, Self::Error> {
        let payload: HookPayload =
            serde_json::from_value(row.payload).map_err(|e| stored(e.into()))?;
        Ok(HookJob {
            id: row.id,
            kind: HookKind::try_from(row.kind.as_str()).map_err(stored)?,
            amount: MoneyAmount::new(row.amount).map_err(stored)?,
            payload,
            attempts: row.attempts,
        })
    }
}

/// Write a hook job inside the transition's transaction.
pub async fn enqueue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job: &NewHookJob,
) -> Result<(), PipelineError> {
    let payload = serde_json::to_value(&job.payload)?;
    sqlx::query(
        r#"
        INSERT INTO hook_jobs (id, kind, payment_id, order_code, amount, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(job.id)
    .bind(job.kind.as_str())
    .bind(job.payload.payment.id())
    .bind(&job.payload.order.code)
    .bind(job.amount.cents())
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Claim up to `limit` pending jobs for processing.
/// Uses SKIP LOCKED to avoid contention with other workers.
pub async fn claim(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    limit: i64,
) -> Result<Vec<HookJob>, PipelineError> {
    let rows = sqlx::query_as::<_, HookJobRow>(
        r#"
        UPDATE hook_jobs
        SET status = 'processing', updated_at = now()
        WHERE id IN (
            SELECT id FROM hook_jobs
            WHERE status = 'pending' AND scheduled_at <= now()
            ORDER BY scheduled_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, kind, amount, payload, attempts
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    rows.into_iter().map(HookJob::try_from).collect()
}

/// Mark a job as completed.
pub async fn complete(pool: &sqlx::PgPool, id: uuid::Uuid) -> Result<(), PipelineError> {
    sqlx::query("UPDATE hook_jobs SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failure. Exponential backoff via scheduled_at.
/// If max attempts reached, mark as 'failed' permanently.
pub async fn fail(pool: &sqlx::PgPool, id: uuid::Uuid, error: &str) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE hook_jobs
        SET attempts = attempts + 1,
            last_error = $2,
            status = CASE
                WHEN attempts + 1 >= max_attempts THEN 'failed'
                ELSE 'pending'
            END,
            scheduled_at = CASE
                WHEN attempts + 1 >= max_attempts THEN scheduled_at
                ELSE now() + make_interval(secs => power(2, attempts + 1)::int)
            END,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Reset jobs stuck in 'processing' for >2 minutes back to 'pending'.
/// Returns the number of reaped jobs.
pub async fn reap_stale(pool: &sqlx::PgPool) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE hook_jobs
        SET status = 'pending', updated_at = now()
        WHERE status = 'processing' AND updated_at < now() - interval '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
