use {
    super::error::PipelineError,
    super::money::MoneyAmount,
    super::order::Order,
    super::payment::Payment,
    super::repository::BoxFuture,
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    PaymentConfirmed,
    PaymentRefunded,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentRefunded => "payment_refunded",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for HookKind {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "payment_confirmed" => Ok(Self::PaymentConfirmed),
            "payment_refunded" => Ok(Self::PaymentRefunded),
            other => Err(PipelineError::Validation(format!(
                "unknown hook kind: {other}"
            ))),
        }
    }
}

/// Order and payment as they were when the transition committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPayload {
    pub order: Order,
    pub payment: Payment,
}

/// Outbox entry written in the same commit as the state transition.
#[derive(Debug, Clone)]
pub struct NewHookJob {
    pub id: Uuid,
    pub kind: HookKind,
    pub amount: MoneyAmount,
    pub payload: HookPayload,
}

impl NewHookJob {
    pub fn confirmed(order: &Order, payment: &Payment, amount: MoneyAmount) -> Self {
        Self::new(HookKind::PaymentConfirmed, order, payment, amount)
    }

    pub fn refunded(order: &Order, payment: &Payment, amount: MoneyAmount) -> Self {
        Self::new(HookKind::PaymentRefunded, order, payment, amount)
    }

    fn new(kind: HookKind, order: &Order, payment: &Payment, amount: MoneyAmount) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            amount,
            payload: HookPayload {
                order: order.clone(),
                payment: payment.clone(),
            },
        }
    }
}

/// A claimed outbox entry.
#[derive(Debug, Clone)]
pub struct HookJob {
    pub id: Uuid,
    pub kind: HookKind,
    pub amount: MoneyAmount,
    pub payload: HookPayload,
    pub attempts: i32,
}

/// Downstream reactions to payment state changes (ticket issuance, refund
/// mail, ...). Delivered at-least-once, so implementations must be idempotent.
pub trait PaymentHooks: Send + Sync {
    fn on_confirmed<'a>(
        &'a self,
        order: &'a Order,
        payment: &'a Payment,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    fn on_refunded<'a>(
        &'a self,
        order: &'a Order,
        payment: &'a Payment,
        amount: MoneyAmount,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;
}

/// Hooks that only log. Used when no downstream system is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl PaymentHooks for LoggingHooks {
    fn on_confirmed<'a>(
        &'a self,
        order: &'a Order,
        payment: &'a Payment,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            tracing::info!(
                order_code = %order.code,
                payment_id = %payment.id(),
                order_status = %order.status,
                "payment confirmed"
            );
            Ok(())
        })
    }

    fn on_refunded<'a>(
        &'a self,
        order: &'a Order,
        payment: &'a Payment,
        amount: MoneyAmount,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            tracing::info!(
                order_code = %order.code,
                payment_id = %payment.id(),
                amount = %amount,
                "payment refunded"
            );
            Ok(())
        })
    }
}
