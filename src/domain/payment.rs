use {
    super::audit::NewAuditEntry,
    super::error::PipelineError,
    super::id::CorrelationId,
    super::money::MoneyAmount,
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

/// Provider identifier stored on every payment this crate reconciles.
pub const PROVIDER: &str = "pix_openpix";

/// Provider status that means the PIX transfer has settled.
pub const SETTLED_STATUS: &str = "CONFIRMED";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Created,
    Pending,
    Confirmed,
    Refunded,
    Canceled,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Refunded => "refunded",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    /// The only edges the reconciler may take. Everything else needs an operator.
    pub fn can_transition_to(&self, next: &PaymentState) -> bool {
        matches!(
            (self, next),
            (Self::Created | Self::Pending, Self::Confirmed)
                | (Self::Created | Self::Pending, Self::Failed)
                | (Self::Confirmed, Self::Refunded)
        )
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentState {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "refunded" => Ok(Self::Refunded),
            "canceled" => Ok(Self::Canceled),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown payment state: {other}"
            ))),
        }
    }
}

/// What a `TRANSACTION_RECEIVED` notification means for a payment in its
/// current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptDecision {
    /// Already confirmed for exactly this amount.
    Duplicate,
    /// Local state has already moved on; never regress it.
    Stale { current: PaymentState },
    /// Provider reports a status other than settled.
    NotSettled,
    Confirm,
    Mismatch {
        expected: Option<MoneyAmount>,
        received: MoneyAmount,
    },
}

pub struct PaymentParams {
    pub id: Uuid,
    pub order_code: String,
    pub local_id: i32,
    pub provider: String,
    pub amount: Decimal,
    pub state: PaymentState,
    pub process_initiated: bool,
    pub external_reference: Option<CorrelationId>,
    pub refunded_amount: MoneyAmount,
    pub fail_reason: Option<String>,
}

/// Payment row, owned by its order. The reconciler only ever mutates `state`,
/// `refunded_amount` and `fail_reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    id: Uuid,
    order_code: String,
    local_id: i32,
    provider: String,
    amount: Decimal,
    state: PaymentState,
    process_initiated: bool,
    external_reference: Option<CorrelationId>,
    refunded_amount: MoneyAmount,
    fail_reason: Option<String>,
}

impl Payment {
    pub fn new(params: PaymentParams) -> Self {
        Self {
            id: params.id,
            order_code: params.order_code,
            local_id: params.local_id,
            provider: params.provider,
            amount: params.amount,
            state: params.state,
            process_initiated: params.process_initiated,
            external_reference: params.external_reference,
            refunded_amount: params.refunded_amount,
            fail_reason: params.fail_reason,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order_code(&self) -> &str {
        &self.order_code
    }

    pub fn local_id(&self) -> i32 {
        self.local_id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn process_initiated(&self) -> bool {
        self.process_initiated
    }

    pub fn external_reference(&self) -> Option<&CorrelationId> {
        self.external_reference.as_ref()
    }

    pub fn refunded_amount(&self) -> MoneyAmount {
        self.refunded_amount
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    pub fn amount_minor(&self) -> Result<MoneyAmount, PipelineError> {
        MoneyAmount::from_major(self.amount)
    }

    /// Confirmed amount not yet refunded. Errors mean the stored row is corrupt.
    pub fn outstanding(&self) -> Result<MoneyAmount, PipelineError> {
        self.amount_minor()
            .map_err(|e| PipelineError::Storage(format!("payment {}: {e}", self.id)))?
            .checked_sub(self.refunded_amount)
            .ok_or_else(|| {
                PipelineError::Storage(format!(
                    "payment {} refunded more than its amount",
                    self.id
                ))
            })
    }

    pub fn decide_receipt(&self, status: &str, value: MoneyAmount) -> ReceiptDecision {
        let settled = status == SETTLED_STATUS;
        // A non-integral stored amount can never match an integer value.
        let expected = self.amount_minor().ok();

        match self.state {
            // A refunded payment was settled by this same receipt; refunds
            // arrive with it on every redelivery.
            PaymentState::Confirmed | PaymentState::Refunded
                if settled && expected == Some(value) =>
            {
                ReceiptDecision::Duplicate
            }
            PaymentState::Confirmed
            | PaymentState::Refunded
            | PaymentState::Failed
            | PaymentState::Canceled => ReceiptDecision::Stale {
                current: self.state,
            },
            PaymentState::Created | PaymentState::Pending if !settled => {
                ReceiptDecision::NotSettled
            }
            PaymentState::Created | PaymentState::Pending => match expected {
                Some(expected) if expected == value => ReceiptDecision::Confirm,
                expected => ReceiptDecision::Mismatch {
                    expected,
                    received: value,
                },
            },
        }
    }

    pub fn transition_state(&mut self, new: PaymentState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(&new) {
            return Err(PipelineError::Validation(format!(
                "invalid state transition: {} → {}",
                self.state, new
            )));
        }

        self.state = new;
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), PipelineError> {
        self.transition_state(PaymentState::Confirmed)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PipelineError> {
        self.transition_state(PaymentState::Failed)?;
        self.fail_reason = Some(reason.into());
        Ok(())
    }

    /// Records a refund against a confirmed payment. Returns `true` once the
    /// refunded total reaches the confirmed amount and the payment flipped to
    /// `Refunded`.
    pub fn apply_refund(&mut self, amount: MoneyAmount) -> Result<bool, PipelineError> {
        if self.state != PaymentState::Confirmed {
            return Err(PipelineError::Validation(format!(
                "cannot refund payment in state {}",
                self.state
            )));
        }
        if amount.is_zero() || amount > self.outstanding()? {
            return Err(PipelineError::Validation(format!(
                "refund of {amount} exceeds outstanding balance of payment {}",
                self.id
            )));
        }

        self.refunded_amount = self
            .refunded_amount
            .checked_add(amount)
            .ok_or_else(|| PipelineError::Validation("refunded amount overflow".into()))?;

        if self.outstanding()?.is_zero() {
            self.transition_state(PaymentState::Refunded)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn audit_entry(&self, actor: &str, action: &str, detail: serde_json::Value) -> NewAuditEntry {
        NewAuditEntry {
            id: Uuid::now_v7(),
            entity_type: "payment".to_string(),
            entity_id: Some(self.id),
            external_id: self.external_reference.as_ref().map(|r| r.as_str().to_string()),
            action: action.to_string(),
            actor: actor.to_string(),
            detail,
        }
    }
}
