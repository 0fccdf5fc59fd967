use {
    super::audit::NewAuditEntry,
    super::error::PipelineError,
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Canceled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "canceled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            other => Err(PipelineError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// Aggregate root for payments. `sales_channel` is carried for the hooks and
/// never changed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub code: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub expires: DateTime<Utc>,
    pub sales_channel: String,
}

impl Order {
    /// Marks the order paid when `confirmed_total` covers it. Canceled and
    /// refunded orders are left alone. Returns the previous status if it
    /// changed.
    pub fn settle(&mut self, confirmed_total: Decimal) -> Option<OrderStatus> {
        let payable = matches!(self.status, OrderStatus::Pending | OrderStatus::Expired);
        if payable && confirmed_total >= self.total {
            let old = self.status;
            self.status = OrderStatus::Paid;
            return Some(old);
        }
        None
    }

    /// Moves a paid order back once a confirming payment has been fully
    /// refunded. `remaining_confirmed` is what other confirmed payments still
    /// cover.
    pub fn unsettle(&mut self, remaining_confirmed: Decimal) -> Option<OrderStatus> {
        if self.status != OrderStatus::Paid || remaining_confirmed >= self.total {
            return None;
        }
        let old = self.status;
        self.status = if remaining_confirmed.is_zero() {
            OrderStatus::Refunded
        } else {
            OrderStatus::Pending
        };
        Some(old)
    }

    pub fn audit_entry(&self, actor: &str, old: OrderStatus, payment_id: Uuid) -> NewAuditEntry {
        NewAuditEntry {
            id: Uuid::now_v7(),
            entity_type: "order".to_string(),
            entity_id: None,
            external_id: Some(self.code.clone()),
            action: "status_changed".to_string(),
            actor: actor.to_string(),
            detail: serde_json::json!({
                "old_status": old.as_str(),
                "new_status": self.status.as_str(),
                "payment_id": payment_id,
            }),
        }
    }
}
