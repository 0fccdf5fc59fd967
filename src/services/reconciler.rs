use {
    crate::domain::{
        error::PipelineError,
        hooks::NewHookJob,
        id::RefundId,
        notification::{EventType, Notification, RefundEntry},
        order::{Order, OrderStatus},
        payment::{PROVIDER, Payment, PaymentState, ReceiptDecision},
        repository::{AppliedRefund, PaymentRepository, PaymentSnapshot, ReconcileChanges},
    },
    rust_decimal::Decimal,
    std::{collections::HashSet, future::Future, time::Duration},
    uuid::Uuid,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Payment moved to confirmed. `order_paid` when this completed the order.
    Confirmed { payment_id: Uuid, order_paid: bool },
    /// Same confirmation delivered again.
    Duplicate(Uuid),
    /// Local state already moved past what the notification reports.
    Stale(Uuid),
    /// Value disagreed with the payment amount; payment moved to failed.
    AmountMismatch(Uuid),
    /// At least one refund entry was applied.
    Refunded {
        payment_id: Uuid,
        applied: usize,
        fully_refunded: bool,
    },
    /// Refund entries present but none applied (already seen or not applicable).
    RefundsSkipped(Uuid),
    /// No payment for the correlation id.
    NotFound,
    /// Event type or provider status that needs no action.
    Ignored,
}

impl ProcessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::Duplicate(_) => "duplicate",
            Self::Stale(_) => "stale",
            Self::AmountMismatch(_) => "amount_mismatch",
            Self::Refunded { .. } => "refunded",
            Self::RefundsSkipped(_) => "refunds_skipped",
            Self::NotFound => "not_found",
            Self::Ignored => "ignored",
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    op: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| PipelineError::Timeout(what.to_string()))?
}

/// Maps the notification's correlation id to the payment it settles.
pub async fn locate(
    repo: &dyn PaymentRepository,
    notification: &Notification,
    repo_timeout: Duration,
) -> Result<Option<Uuid>, PipelineError> {
    bounded(
        repo_timeout,
        "payment lookup",
        repo.find_payment_by_external_reference(PROVIDER, notification.correlation_id()),
    )
    .await
}

/// Locate the payment, lock it, apply the notification and commit, all inside
/// `repo_timeout` per repository call. Dropping the lock on any error rolls
/// everything back.
#[tracing::instrument(
    name = "reconcile",
    skip_all,
    fields(correlation_id = %notification.correlation_id(), event = %notification.event())
)]
pub async fn process_notification(
    repo: &dyn PaymentRepository,
    notification: &Notification,
    repo_timeout: Duration,
    actor: &str,
) -> Result<ProcessResult, PipelineError> {
    let refunds = notification.refund_entries();

    if notification.event().is_unhandled() && refunds.is_empty() {
        tracing::info!("unhandled event type, acknowledged without action");
        return Ok(ProcessResult::Ignored);
    }

    let Some(payment_id) = locate(repo, notification, repo_timeout).await? else {
        tracing::info!("no payment for correlation id, acknowledged as no-op");
        return Ok(ProcessResult::NotFound);
    };

    let Some(locked) = bounded(repo_timeout, "payment lock", repo.lock_payment(payment_id)).await?
    else {
        tracing::info!(%payment_id, "payment vanished before lock, acknowledged as no-op");
        return Ok(ProcessResult::NotFound);
    };

    let mut plan = Reconciliation::new(locked.snapshot(), actor);

    let primary = match notification.event() {
        EventType::TransactionReceived => Some(plan.apply_receipt(notification)?),
        EventType::TransactionRefundReceived | EventType::Unhandled(_) => None,
    };

    let refund_outcome = if refunds.is_empty() {
        None
    } else {
        Some(plan.apply_refunds(&refunds)?)
    };

    let result = match (primary, refund_outcome) {
        (_, Some(r)) if r.applied > 0 => ProcessResult::Refunded {
            payment_id,
            applied: r.applied,
            fully_refunded: r.fully_refunded,
        },
        (Some(primary), _) => primary,
        (None, Some(_)) => ProcessResult::RefundsSkipped(payment_id),
        (None, None) => ProcessResult::Ignored,
    };

    let changes = plan.into_changes();
    if changes.is_empty() {
        bounded(repo_timeout, "lock release", locked.release()).await?;
    } else {
        bounded(repo_timeout, "commit", locked.commit(changes)).await?;
    }

    tracing::info!(%payment_id, result = result.as_str(), "notification reconciled");
    Ok(result)
}

struct RefundOutcome {
    applied: usize,
    fully_refunded: bool,
}

/// Working copy of one payment/order pair. Mutations accumulate here and
/// become a `ReconcileChanges` only if every step succeeded.
struct Reconciliation<'a> {
    actor: &'a str,
    payment: Payment,
    order: Order,
    other_confirmed: Decimal,
    applied_refunds: HashSet<RefundId>,
    payment_dirty: bool,
    order_dirty: bool,
    changes: ReconcileChanges,
}

impl<'a> Reconciliation<'a> {
    fn new(snapshot: &PaymentSnapshot, actor: &'a str) -> Self {
        Self {
            actor,
            payment: snapshot.payment.clone(),
            order: snapshot.order.clone(),
            other_confirmed: snapshot.other_confirmed,
            applied_refunds: snapshot.applied_refunds.clone(),
            payment_dirty: false,
            order_dirty: false,
            changes: ReconcileChanges::default(),
        }
    }

    fn apply_receipt(&mut self, notification: &Notification) -> Result<ProcessResult, PipelineError> {
        let id = self.payment.id();
        let value = notification.value();

        match self.payment.decide_receipt(notification.status(), value) {
            ReceiptDecision::Duplicate => {
                tracing::info!(payment_id = %id, "payment already confirmed, duplicate delivery");
                Ok(ProcessResult::Duplicate(id))
            }
            ReceiptDecision::Stale { current } => {
                tracing::warn!(
                    payment_id = %id,
                    current = %current,
                    status = notification.status(),
                    value = %value,
                    "notification disagrees with local state, not regressing"
                );
                let audit = self.payment.audit_entry(
                    self.actor,
                    "anomaly",
                    serde_json::json!({
                        "event": notification.event().as_str(),
                        "current_state": current.as_str(),
                        "incoming_status": notification.status(),
                        "incoming_value": value.cents(),
                    }),
                );
                self.changes.audit.push(audit);
                Ok(ProcessResult::Stale(id))
            }
            ReceiptDecision::NotSettled => {
                tracing::info!(
                    payment_id = %id,
                    status = notification.status(),
                    "provider status is not settled, nothing to do"
                );
                Ok(ProcessResult::Ignored)
            }
            ReceiptDecision::Mismatch { expected, received } => {
                let reason = match expected {
                    Some(expected) => {
                        format!("amount mismatch: expected {expected}, received {received}")
                    }
                    None => format!(
                        "amount mismatch: stored amount {} has no minor-unit form, received {received}",
                        self.payment.amount()
                    ),
                };
                let old = self.payment.state();
                self.payment.fail(reason.clone())?;
                self.payment_dirty = true;

                tracing::warn!(
                    payment_id = %id,
                    order_code = %self.order.code,
                    %reason,
                    "payment failed, flagged for operator review"
                );
                let audit = self.payment.audit_entry(
                    self.actor,
                    "amount_mismatch",
                    serde_json::json!({
                        "old_state": old.as_str(),
                        "new_state": PaymentState::Failed.as_str(),
                        "expected": expected.map(|e| e.cents()),
                        "received": received.cents(),
                        "transaction_id": notification.transaction_id(),
                        "operator_review": true,
                    }),
                );
                self.changes.audit.push(audit);
                Ok(ProcessResult::AmountMismatch(id))
            }
            ReceiptDecision::Confirm => {
                let old = self.payment.state();
                self.payment.confirm()?;
                self.payment_dirty = true;

                let confirmed_total = self.other_confirmed + self.payment.amount();
                let order_paid = match self.order.settle(confirmed_total) {
                    Some(old_status) => {
                        self.order_dirty = true;
                        let audit = self.order.audit_entry(self.actor, old_status, id);
                        self.changes.audit.push(audit);
                        true
                    }
                    None => false,
                };

                if self.order.status == OrderStatus::Canceled {
                    tracing::warn!(
                        payment_id = %id,
                        order_code = %self.order.code,
                        "payment confirmed on a canceled order, flagged for operator review"
                    );
                    let audit = self.payment.audit_entry(
                        self.actor,
                        "confirmed_on_canceled_order",
                        serde_json::json!({
                            "order_code": self.order.code,
                            "order_status": self.order.status.as_str(),
                            "value": value.cents(),
                            "transaction_id": notification.transaction_id(),
                            "operator_review": true,
                        }),
                    );
                    self.changes.audit.push(audit);
                }

                let audit = self.payment.audit_entry(
                    self.actor,
                    "confirmed",
                    serde_json::json!({
                        "old_state": old.as_str(),
                        "new_state": PaymentState::Confirmed.as_str(),
                        "value": value.cents(),
                        "transaction_id": notification.transaction_id(),
                        "end_to_end_id": notification.end_to_end_id(),
                        "order_status": self.order.status.as_str(),
                    }),
                );
                self.changes.audit.push(audit);
                self.changes
                    .hooks
                    .push(NewHookJob::confirmed(&self.order, &self.payment, value));

                tracing::info!(payment_id = %id, order_paid, "payment confirmed");
                Ok(ProcessResult::Confirmed {
                    payment_id: id,
                    order_paid,
                })
            }
        }
    }

    /// Applies refund entries in order. Idempotent per refund id.
    fn apply_refunds(&mut self, refunds: &[RefundEntry]) -> Result<RefundOutcome, PipelineError> {
        let id = self.payment.id();
        let mut outcome = RefundOutcome {
            applied: 0,
            fully_refunded: false,
        };

        for entry in refunds {
            if self.applied_refunds.contains(&entry.refund_id) {
                tracing::info!(payment_id = %id, refund_id = %entry.refund_id, "refund already applied, skipping");
                continue;
            }
            if !entry.is_settled() {
                tracing::info!(
                    payment_id = %id,
                    refund_id = %entry.refund_id,
                    status = entry.status.as_deref().unwrap_or(""),
                    "refund not settled yet, skipping"
                );
                continue;
            }
            if self.payment.state() != PaymentState::Confirmed {
                tracing::warn!(
                    payment_id = %id,
                    refund_id = %entry.refund_id,
                    state = %self.payment.state(),
                    "refund for a payment that is not confirmed, skipping"
                );
                continue;
            }

            let outstanding = self.payment.outstanding()?;
            if entry.amount.is_zero() || entry.amount > outstanding {
                tracing::warn!(
                    payment_id = %id,
                    refund_id = %entry.refund_id,
                    amount = %entry.amount,
                    %outstanding,
                    "refund amount out of range, flagged for operator review"
                );
                let audit = self.payment.audit_entry(
                    self.actor,
                    "refund_anomaly",
                    serde_json::json!({
                        "refund_id": entry.refund_id.as_str(),
                        "amount": entry.amount.cents(),
                        "outstanding": outstanding.cents(),
                        "operator_review": true,
                    }),
                );
                self.changes.audit.push(audit);
                continue;
            }

            let fully = self.payment.apply_refund(entry.amount)?;
            self.payment_dirty = true;
            self.applied_refunds.insert(entry.refund_id.clone());
            self.changes.applied_refunds.push(AppliedRefund {
                payment_id: id,
                refund_id: entry.refund_id.clone(),
                amount: entry.amount,
            });

            if fully {
                if let Some(old_status) = self.order.unsettle(self.other_confirmed) {
                    self.order_dirty = true;
                    let audit = self.order.audit_entry(self.actor, old_status, id);
                    self.changes.audit.push(audit);
                }
            }

            let audit = self.payment.audit_entry(
                self.actor,
                "refund_applied",
                serde_json::json!({
                    "refund_id": entry.refund_id.as_str(),
                    "amount": entry.amount.cents(),
                    "refunded_total": self.payment.refunded_amount().cents(),
                    "state": self.payment.state().as_str(),
                }),
            );
            self.changes.audit.push(audit);
            self.changes
                .hooks
                .push(NewHookJob::refunded(&self.order, &self.payment, entry.amount));

            tracing::info!(
                payment_id = %id,
                refund_id = %entry.refund_id,
                amount = %entry.amount,
                fully_refunded = fully,
                "refund applied"
            );
            outcome.applied += 1;
            outcome.fully_refunded = fully;
        }

        Ok(outcome)
    }

    fn into_changes(self) -> ReconcileChanges {
        let mut changes = self.changes;
        if self.payment_dirty {
            changes.payment = Some(self.payment);
        }
        if self.order_dirty {
            changes.order = Some(self.order);
        }
        changes
    }
}
