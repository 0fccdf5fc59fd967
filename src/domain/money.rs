use {
    super::error::PipelineError,
    rust_decimal::{Decimal, prelude::ToPrimitive},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Amount in minor units (centavos). Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub fn new(cents: i64) -> Result<Self, PipelineError> {
        if cents < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {cents}"
            )));
        }
        Ok(Self(cents))
    }

    /// Converts a major-unit decimal (e.g. `100.00`) into minor units.
    /// Fails when the value has sub-centavo precision or is negative.
    pub fn from_major(amount: Decimal) -> Result<Self, PipelineError> {
        let scaled = amount.checked_mul(Decimal::ONE_HUNDRED).ok_or_else(|| {
            PipelineError::Validation(format!("amount {amount} exceeds storage capacity"))
        })?;
        if !scaled.fract().is_zero() {
            return Err(PipelineError::Validation(format!(
                "amount {amount} is not representable in minor units"
            )));
        }
        let cents = scaled.to_i64().ok_or_else(|| {
            PipelineError::Validation(format!("amount {amount} exceeds storage capacity"))
        })?;
        Self::new(cents)
    }

    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0.checked_add(other.0).map(MoneyAmount)
    }

    pub fn checked_sub(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0
            .checked_sub(other.0)
            .filter(|&v| v >= 0)
            .map(MoneyAmount)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
