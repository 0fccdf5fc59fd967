use {
    super::audit::NewAuditEntry,
    super::error::PipelineError,
    super::hooks::{HookJob, NewHookJob},
    super::id::{CorrelationId, RefundId},
    super::money::MoneyAmount,
    super::order::Order,
    super::payment::Payment,
    rust_decimal::Decimal,
    std::{collections::HashSet, future::Future, pin::Pin},
    uuid::Uuid,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything the state machine needs, read inside the payment lock.
#[derive(Debug, Clone)]
pub struct PaymentSnapshot {
    pub payment: Payment,
    pub order: Order,
    /// Sum of the order's other confirmed payments, in major units.
    pub other_confirmed: Decimal,
    pub applied_refunds: HashSet<RefundId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRefund {
    pub payment_id: Uuid,
    pub refund_id: RefundId,
    pub amount: MoneyAmount,
}

/// The write set of one reconciliation. Committed entirely or not at all.
#[derive(Debug, Clone, Default)]
pub struct ReconcileChanges {
    pub payment: Option<Payment>,
    pub order: Option<Order>,
    pub applied_refunds: Vec<AppliedRefund>,
    pub hooks: Vec<NewHookJob>,
    pub audit: Vec<NewAuditEntry>,
}

impl ReconcileChanges {
    pub fn is_empty(&self) -> bool {
        self.payment.is_none()
            && self.order.is_none()
            && self.applied_refunds.is_empty()
            && self.hooks.is_empty()
            && self.audit.is_empty()
    }
}

/// A payment held under its exclusive lock. Dropping it without calling
/// `commit` or `release` discards every change and frees the lock.
pub trait LockedPayment: Send {
    fn snapshot(&self) -> &PaymentSnapshot;

    fn commit(self: Box<Self>, changes: ReconcileChanges) -> BoxFuture<'static, Result<(), PipelineError>>;

    /// Frees the lock without writing anything.
    fn release(self: Box<Self>) -> BoxFuture<'static, Result<(), PipelineError>>;
}

/// Transactional store for orders and payments, plus the hook outbox.
pub trait PaymentRepository: Send + Sync {
    fn find_payment_by_external_reference<'a>(
        &'a self,
        provider: &'a str,
        correlation_id: &'a CorrelationId,
    ) -> BoxFuture<'a, Result<Option<Uuid>, PipelineError>>;

    /// Waits for the payment's exclusive lock and loads its snapshot.
    /// `None` when the payment disappeared after it was located.
    fn lock_payment(
        &self,
        payment_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Box<dyn LockedPayment>>, PipelineError>>;

    /// Claims up to `limit` due hook jobs.
    fn claim_hooks(&self, limit: i64) -> BoxFuture<'_, Result<Vec<HookJob>, PipelineError>>;

    fn complete_hook(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Records a failed delivery and schedules a retry with exponential
    /// backoff, or gives up after the job's max attempts.
    fn fail_hook<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>>;

    /// Returns hook jobs stuck in processing to pending. Returns how many.
    fn reap_stale_hooks(&self) -> BoxFuture<'_, Result<u64, PipelineError>>;
}
