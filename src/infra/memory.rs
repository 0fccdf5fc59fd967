use {
    crate::domain::{
        audit::NewAuditEntry,
        error::PipelineError,
        hooks::{HookJob, NewHookJob},
        id::{CorrelationId, RefundId},
        order::Order,
        payment::{Payment, PaymentState},
        repository::{
            AppliedRefund, BoxFuture, LockedPayment, PaymentRepository, PaymentSnapshot,
            ReconcileChanges,
        },
    },
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    std::{
        collections::{HashMap, HashSet},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
    tokio::sync::{Mutex, OwnedMutexGuard, RwLock},
    uuid::Uuid,
};

const MAX_HOOK_ATTEMPTS: i32 = 8;
const STALE_CLAIM_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct HookRecord {
    pub job: NewHookJob,
    pub status: HookStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    orders: HashMap<String, Order>,
    payments: HashMap<Uuid, Payment>,
    refunds: Vec<AppliedRefund>,
    hooks: Vec<HookRecord>,
    audit: Vec<NewAuditEntry>,
}

#[derive(Default)]
struct Inner {
    state: RwLock<State>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    fail_next_commit: AtomicBool,
}

/// Thread-safe in-memory store. One `tokio::sync::Mutex` per payment and one
/// per order mirror the advisory lock and the order row lock in Postgres.
#[derive(Default, Clone)]
pub struct InMemoryRepository {
    inner: Arc<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_order(&self, order: Order) {
        let mut state = self.inner.state.write().await;
        state.orders.insert(order.code.clone(), order);
    }

    pub async fn insert_payment(&self, payment: Payment) {
        let mut state = self.inner.state.write().await;
        state.payments.insert(payment.id(), payment);
    }

    pub async fn payment(&self, id: Uuid) -> Option<Payment> {
        self.inner.state.read().await.payments.get(&id).cloned()
    }

    pub async fn order(&self, code: &str) -> Option<Order> {
        self.inner.state.read().await.orders.get(code).cloned()
    }

    pub async fn hooks(&self) -> Vec<HookRecord> {
        self.inner.state.read().await.hooks.clone()
    }

    pub async fn applied_refunds(&self) -> Vec<AppliedRefund> {
        self.inner.state.read().await.refunds.clone()
    }

    pub async fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.inner.state.read().await.audit.clone()
    }

    /// Makes the next commit fail as if the store went away mid-write.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Moves a claimed hook's timestamps back so the reaper considers it stale.
    pub async fn age_hook(&self, id: Uuid, by: Duration) {
        let mut state = self.inner.state.write().await;
        if let Some(record) = state.hooks.iter_mut().find(|h| h.job.id == id) {
            let by = chrono::Duration::from_std(by).unwrap_or_default();
            record.updated_at -= by;
            record.scheduled_at -= by;
        }
    }

    /// Entries held or waited on right now. Released locks are evicted.
    pub fn lock_table_len(&self) -> usize {
        self.inner.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    async fn acquire(&self, key: String) -> Result<NamedGuard, PipelineError> {
        let lock = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .map_err(|e| PipelineError::Storage(format!("lock table poisoned: {e}")))?;
            locks.entry(key.clone()).or_default().clone()
        };
        // Built before waiting so a cancelled wait still evicts.
        let evict = Evict {
            inner: self.inner.clone(),
            key,
        };
        let guard = lock.lock_owned().await;
        Ok(NamedGuard {
            _guard: guard,
            _evict: evict,
        })
    }
}

/// Held entry in the lock table. Fields drop in order: unlock, then evict.
struct NamedGuard {
    _guard: OwnedMutexGuard<()>,
    _evict: Evict,
}

struct Evict {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for Evict {
    fn drop(&mut self) {
        let Ok(mut locks) = self.inner.locks.lock() else {
            return;
        };
        // Only the table's own reference left: nobody holds or waits on it.
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

fn confirmed_total(payments: &HashMap<Uuid, Payment>, order_code: &str, except: Uuid) -> Decimal {
    payments
        .values()
        .filter(|p| {
            p.id() != except && p.order_code() == order_code && p.state() == PaymentState::Confirmed
        })
        .map(|p| p.amount())
        .sum()
}

struct InMemoryLocked {
    // Released in field order: order first, then payment.
    _order_guard: NamedGuard,
    _payment_guard: NamedGuard,
    inner: Arc<Inner>,
    snapshot: PaymentSnapshot,
}

impl LockedPayment for InMemoryLocked {
    fn snapshot(&self) -> &PaymentSnapshot {
        &self.snapshot
    }

    fn commit(self: Box<Self>, changes: ReconcileChanges) -> BoxFuture<'static, Result<(), PipelineError>> {
        Box::pin(async move {
            if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(PipelineError::Database(sqlx::Error::PoolTimedOut));
            }

            // Validate everything first so a rejected write leaves no trace.
            let mut state = self.inner.state.write().await;
            for refund in &changes.applied_refunds {
                let seen = state.refunds.iter().any(|r| {
                    r.payment_id == refund.payment_id && r.refund_id == refund.refund_id
                });
                if seen {
                    return Err(PipelineError::Storage(format!(
                        "refund {} already applied to payment {}",
                        refund.refund_id, refund.payment_id
                    )));
                }
            }

            if let Some(payment) = changes.payment {
                state.payments.insert(payment.id(), payment);
            }
            if let Some(order) = changes.order {
                state.orders.insert(order.code.clone(), order);
            }
            state.refunds.extend(changes.applied_refunds);
            let now = Utc::now();
            state.hooks.extend(changes.hooks.into_iter().map(|job| HookRecord {
                job,
                status: HookStatus::Pending,
                attempts: 0,
                last_error: None,
                scheduled_at: now,
                updated_at: now,
            }));
            state.audit.extend(changes.audit);
            Ok(())
        })
    }

    fn release(self: Box<Self>) -> BoxFuture<'static, Result<(), PipelineError>> {
        Box::pin(async move { Ok(()) })
    }
}

impl PaymentRepository for InMemoryRepository {
    fn find_payment_by_external_reference<'a>(
        &'a self,
        provider: &'a str,
        correlation_id: &'a CorrelationId,
    ) -> BoxFuture<'a, Result<Option<Uuid>, PipelineError>> {
        Box::pin(async move {
            let state = self.inner.state.read().await;
            let mut matches: Vec<&Payment> = state
                .payments
                .values()
                .filter(|p| p.provider() == provider && p.external_reference() == Some(correlation_id))
                .collect();
            if matches.len() > 1 {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    count = matches.len(),
                    "several payments share a correlation id, using the lowest local id"
                );
            }
            matches.sort_by_key(|p| (p.order_code().to_string(), p.local_id()));
            Ok(matches.first().map(|p| p.id()))
        })
    }

    fn lock_payment(
        &self,
        payment_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Box<dyn LockedPayment>>, PipelineError>> {
        Box::pin(async move {
            let payment_guard = self.acquire(format!("payment:{payment_id}")).await?;

            let order_code = match self.inner.state.read().await.payments.get(&payment_id) {
                Some(payment) => payment.order_code().to_string(),
                None => return Ok(None),
            };
            // Same order as Postgres: payment first, then its order.
            let order_guard = self.acquire(format!("order:{order_code}")).await?;

            let state = self.inner.state.read().await;
            let Some(payment) = state.payments.get(&payment_id).cloned() else {
                return Ok(None);
            };
            let order = state.orders.get(payment.order_code()).cloned().ok_or_else(|| {
                PipelineError::Storage(format!(
                    "payment {payment_id} references missing order {}",
                    payment.order_code()
                ))
            })?;
            let other_confirmed = confirmed_total(&state.payments, payment.order_code(), payment_id);
            let applied_refunds: HashSet<RefundId> = state
                .refunds
                .iter()
                .filter(|r| r.payment_id == payment_id)
                .map(|r| r.refund_id.clone())
                .collect();
            drop(state);

            let locked: Box<dyn LockedPayment> = Box::new(InMemoryLocked {
                _order_guard: order_guard,
                _payment_guard: payment_guard,
                inner: self.inner.clone(),
                snapshot: PaymentSnapshot {
                    payment,
                    order,
                    other_confirmed,
                    applied_refunds,
                },
            });
            Ok(Some(locked))
        })
    }

    fn claim_hooks(&self, limit: i64) -> BoxFuture<'_, Result<Vec<HookJob>, PipelineError>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().await;
            let now = Utc::now();
            let limit = usize::try_from(limit).unwrap_or(0);

            let mut due: Vec<&mut HookRecord> = state
                .hooks
                .iter_mut()
                .filter(|h| h.status == HookStatus::Pending && h.scheduled_at <= now)
                .collect();
            due.sort_by_key(|h| h.scheduled_at);

            Ok(due
                .into_iter()
                .take(limit)
                .map(|record| {
                    record.status = HookStatus::Processing;
                    record.updated_at = now;
                    HookJob {
                        id: record.job.id,
                        kind: record.job.kind,
                        amount: record.job.amount,
                        payload: record.job.payload.clone(),
                        attempts: record.attempts,
                    }
                })
                .collect())
        })
    }

    fn complete_hook(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().await;
            if let Some(record) = state.hooks.iter_mut().find(|h| h.job.id == id) {
                record.status = HookStatus::Completed;
                record.updated_at = Utc::now();
            }
            Ok(())
        })
    }

    fn fail_hook<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().await;
            if let Some(record) = state.hooks.iter_mut().find(|h| h.job.id == id) {
                let now = Utc::now();
                record.attempts += 1;
                record.last_error = Some(error.to_string());
                record.updated_at = now;
                if record.attempts >= MAX_HOOK_ATTEMPTS {
                    record.status = HookStatus::Failed;
                } else {
                    record.status = HookStatus::Pending;
                    record.scheduled_at = now + chrono::Duration::seconds(1 << record.attempts);
                }
            }
            Ok(())
        })
    }

    fn reap_stale_hooks(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().await;
            let now = Utc::now();
            let cutoff = now - chrono::Duration::from_std(STALE_CLAIM_AFTER).unwrap_or_default();
            let mut reaped = 0;
            for record in state
                .hooks
                .iter_mut()
                .filter(|h| h.status == HookStatus::Processing && h.updated_at < cutoff)
            {
                record.status = HookStatus::Pending;
                record.updated_at = now;
                reaped += 1;
            }
            Ok(reaped)
        })
    }
}
