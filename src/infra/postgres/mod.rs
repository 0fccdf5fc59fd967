pub mod audit_repo;
pub mod job_repo;
pub mod payment_repo;

use {
    crate::domain::{
        error::PipelineError,
        hooks::HookJob,
        id::CorrelationId,
        repository::{BoxFuture, LockedPayment, PaymentRepository, PaymentSnapshot, ReconcileChanges},
    },
    audit_repo::insert_audit_entry,
    sqlx::PgPool,
    uuid::Uuid,
};

/// A row that decoded but does not hold a valid domain value.
fn stored(err: PipelineError) -> PipelineError {
    PipelineError::Storage(format!("stored row rejected: {err}"))
}

/// `PaymentRepository` over PostgreSQL. The payment lock is a transaction-scoped
/// advisory lock plus `FOR UPDATE` on the payment and order rows.
#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    async fn lock_inner(&self, payment_id: Uuid) -> Result<Option<Box<dyn LockedPayment>>, PipelineError> {
        let mut tx = self.pool.begin().await?;

        payment_repo::lock(&mut tx, payment_id, self.lock_timeout_ms).await?;

        let Some(payment) = payment_repo::get_payment_for_update(&mut tx, payment_id).await? else {
            tx.commit().await?;
            return Ok(None);
        };
        let order = payment_repo::get_order_for_update(&mut tx, payment.order_code()).await?;
        let other_confirmed =
            payment_repo::other_confirmed_total(&mut tx, payment.order_code(), payment_id).await?;
        let applied_refunds = payment_repo::applied_refund_ids(&mut tx, payment_id).await?;

        let locked: Box<dyn LockedPayment> = Box::new(PgLockedPayment {
            tx,
            snapshot: PaymentSnapshot {
                payment,
                order,
                other_confirmed,
                applied_refunds,
            },
        });
        Ok(Some(locked))
    }
}

struct PgLockedPayment {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    snapshot: PaymentSnapshot,
}

impl LockedPayment for PgLockedPayment {
    fn snapshot(&self) -> &PaymentSnapshot {
        &self.snapshot
    }

    fn commit(self: Box<Self>, changes: ReconcileChanges) -> BoxFuture<'static, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut tx = self.tx;

            if let Some(payment) = &changes.payment {
                payment_repo::update_payment(&mut tx, payment).await?;
            }
            if let Some(order) = &changes.order {
                payment_repo::update_order_status(&mut tx, order).await?;
            }
            for refund in &changes.applied_refunds {
                payment_repo::insert_applied_refund(&mut tx, refund).await?;
            }
            for job in &changes.hooks {
                job_repo::enqueue(&mut tx, job).await?;
            }
            for entry in &changes.audit {
                insert_audit_entry(&mut tx, entry).await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn release(self: Box<Self>) -> BoxFuture<'static, Result<(), PipelineError>> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }
}

impl PaymentRepository for PgPaymentRepository {
    fn find_payment_by_external_reference<'a>(
        &'a self,
        provider: &'a str,
        correlation_id: &'a CorrelationId,
    ) -> BoxFuture<'a, Result<Option<Uuid>, PipelineError>> {
        Box::pin(payment_repo::find_payment_id(&self.pool, provider, correlation_id))
    }

    fn lock_payment(
        &self,
        payment_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Box<dyn LockedPayment>>, PipelineError>> {
        Box::pin(self.lock_inner(payment_id))
    }

    fn claim_hooks(&self, limit: i64) -> BoxFuture<'_, Result<Vec<HookJob>, PipelineError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let jobs = job_repo::claim(&mut tx, limit).await?;
            tx.commit().await?;
            Ok(jobs)
        })
    }

    fn complete_hook(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(job_repo::complete(&self.pool, id))
    }

    fn fail_hook<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(job_repo::fail(&self.pool, id, error))
    }

    fn reap_stale_hooks(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(job_repo::reap_stale(&self.pool))
    }
}
