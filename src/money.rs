//! Monetary value objects
//!
//! Money is an immutable amount plus an ISO-4217 currency code. Arithmetic
//! across two different currencies is a domain error, never a silent
//! coercion — converting between currencies is the exchange-rate store's
//! job, not an operator overload.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{EngineError, EngineResult};

/// An ISO-4217 currency code (e.g. "USD", "EUR", "KES")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a currency code, validating the three-letter ISO shape
    pub fn new(code: impl Into<String>) -> EngineResult<Self> {
        let code: String = code.into();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EngineError::Validation(format!(
                "currency code must be three uppercase ASCII letters, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    /// The code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount of money in a single currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount, in major units
    pub amount: Decimal,
    /// The currency the amount is denominated in
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a monetary amount
    pub fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Whether the amount is exactly zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Add two amounts, requiring the same currency
    pub fn checked_add(&self, other: &Money) -> EngineResult<Money> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency.clone()))
    }

    /// Subtract another amount, requiring the same currency
    pub fn checked_sub(&self, other: &Money) -> EngineResult<Money> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency.clone()))
    }

    /// The negated amount, same currency
    pub fn negated(&self) -> Money {
        Money::new(-self.amount, self.currency.clone())
    }

    /// Round to minor-unit precision (two decimal places, midpoint away from zero)
    pub fn rounded(&self) -> Money {
        Money::new(
            self.amount
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            self.currency.clone(),
        )
    }

    fn require_same_currency(&self, other: &Money) -> EngineResult<()> {
        if self.currency != other.currency {
            return Err(EngineError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
