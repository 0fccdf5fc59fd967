use {
    super::error::PipelineError,
    super::id::{CorrelationId, RefundId},
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    serde::Deserialize,
    std::fmt,
};

const TRANSACTION_RECEIVED: &str = "OPENPIX:TRANSACTION_RECEIVED";
const TRANSACTION_REFUND_RECEIVED: &str = "OPENPIX:TRANSACTION_REFUND_RECEIVED";

/// Refund entries reported with this status have settled on the provider side.
/// Entries without a status are treated as settled.
const REFUND_SETTLED_STATUS: &str = "CONFIRMED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    TransactionReceived,
    TransactionRefundReceived,
    /// Parsed fine but nothing to do; acknowledged without action.
    Unhandled(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TransactionReceived => TRANSACTION_RECEIVED,
            Self::TransactionRefundReceived => TRANSACTION_REFUND_RECEIVED,
            Self::Unhandled(raw) => raw,
        }
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled(_))
    }
}

impl From<&str> for EventType {
    fn from(raw: &str) -> Self {
        match raw {
            TRANSACTION_RECEIVED => Self::TransactionReceived,
            TRANSACTION_REFUND_RECEIVED => Self::TransactionRefundReceived,
            other => Self::Unhandled(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundEntry {
    pub refund_id: RefundId,
    pub amount: MoneyAmount,
    pub status: Option<String>,
}

impl RefundEntry {
    pub fn is_settled(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|s| s == REFUND_SETTLED_STATUS)
    }
}

/// Typed view of one OpenPix webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    event: EventType,
    correlation_id: CorrelationId,
    value: MoneyAmount,
    status: String,
    transaction_id: Option<String>,
    end_to_end_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    refunds: Vec<RefundEntry>,
}

// ── Wire shape ─────────────────────────────────────────────────────────────
// Only the fields the engine reads. Everything else in the body is ignored.

#[derive(Debug, Deserialize)]
struct RawWebhook {
    event: Option<String>,
    #[serde(rename = "pixQrCode")]
    pix_qr_code: Option<RawQrCode>,
    pix: Option<RawPix>,
    #[serde(default)]
    refunds: Option<Vec<RawRefund>>,
}

#[derive(Debug, Deserialize)]
struct RawQrCode {
    #[serde(rename = "correlationID")]
    correlation_id: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPix {
    value: Option<serde_json::Number>,
    status: Option<String>,
    #[serde(rename = "transactionID")]
    transaction_id: Option<String>,
    #[serde(rename = "endToEndId")]
    end_to_end_id: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRefund {
    #[serde(rename = "refundId")]
    refund_id: Option<String>,
    #[serde(rename = "correlationID")]
    correlation_id: Option<String>,
    #[serde(rename = "endToEndId")]
    end_to_end_id: Option<String>,
    value: Option<serde_json::Number>,
    status: Option<String>,
}

fn malformed(msg: impl Into<String>) -> PipelineError {
    PipelineError::MalformedPayload(msg.into())
}

/// Amounts arrive as JSON integers in centavos. Floats and negatives are
/// rejected rather than rounded.
fn minor_units(n: &serde_json::Number, field: &str) -> Result<MoneyAmount, PipelineError> {
    let cents = n
        .as_i64()
        .ok_or_else(|| malformed(format!("{field} must be an integer amount in minor units, got {n}")))?;
    MoneyAmount::new(cents).map_err(|_| malformed(format!("{field} must not be negative, got {n}")))
}

fn timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case("application/json")
}

impl Notification {
    /// Decodes a raw webhook body. `content_type` is checked when present.
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Self, PipelineError> {
        match content_type {
            Some(ct) if !is_json(ct) => {
                return Err(malformed(format!("unsupported content type: {ct}")));
            }
            _ => {}
        }

        let raw: RawWebhook =
            serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

        let event = raw
            .event
            .as_deref()
            .map(EventType::from)
            .ok_or_else(|| malformed("missing field: event"))?;

        let pix = raw.pix.ok_or_else(|| malformed("missing field: pix"))?;
        let qr = raw.pix_qr_code;

        let correlation_id = qr
            .as_ref()
            .and_then(|q| non_empty(q.correlation_id.clone()))
            .or_else(|| non_empty(pix.transaction_id.clone()))
            .ok_or_else(|| {
                malformed("missing field: pixQrCode.correlationID or pix.transactionID")
            })?;

        let value = pix
            .value
            .as_ref()
            .ok_or_else(|| malformed("missing field: pix.value"))
            .and_then(|v| minor_units(v, "pix.value"))?;

        let refunds = raw
            .refunds
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let id = non_empty(r.refund_id)
                    .or_else(|| non_empty(r.correlation_id))
                    .or_else(|| non_empty(r.end_to_end_id))
                    .ok_or_else(|| malformed(format!("refunds[{i}] has no identifier")))?;
                let amount = r
                    .value
                    .as_ref()
                    .ok_or_else(|| malformed(format!("refunds[{i}] has no value")))
                    .and_then(|v| minor_units(v, "refunds[].value"))?;
                Ok(RefundEntry {
                    refund_id: RefundId::new(id)?,
                    amount,
                    status: r.status,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        Ok(Self {
            event,
            correlation_id: CorrelationId::new(correlation_id)?,
            value,
            status: pix.status.unwrap_or_default(),
            created_at: timestamp(pix.created_at.as_deref().or(pix.time.as_deref()))
                .or_else(|| timestamp(qr.as_ref().and_then(|q| q.created_at.as_deref()))),
            updated_at: timestamp(qr.as_ref().and_then(|q| q.updated_at.as_deref())),
            transaction_id: non_empty(pix.transaction_id),
            end_to_end_id: non_empty(pix.end_to_end_id),
            refunds,
        })
    }

    pub fn event(&self) -> &EventType {
        &self.event
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn value(&self) -> MoneyAmount {
        self.value
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn end_to_end_id(&self) -> Option<&str> {
        self.end_to_end_id.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn refunds(&self) -> &[RefundEntry] {
        &self.refunds
    }

    /// Refunds to hand to the refund handler. A refund event without a
    /// `refunds` list describes a single refund in its `pix` block.
    pub fn refund_entries(&self) -> Vec<RefundEntry> {
        if !self.refunds.is_empty() || self.event != EventType::TransactionRefundReceived {
            return self.refunds.clone();
        }

        let id = self
            .end_to_end_id
            .as_deref()
            .or(self.transaction_id.as_deref());
        match id.map(RefundId::new) {
            Some(Ok(refund_id)) => vec![RefundEntry {
                refund_id,
                amount: self.value,
                status: Some(self.status.clone()).filter(|s| !s.is_empty()),
            }],
            _ => Vec::new(),
        }
    }
}
