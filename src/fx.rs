//! Exchange-rate store
//!
//! Per-organization, per-currency, per-date FX rates into the organization's
//! local currency. This is a pure, locally-populated lookup table: resolution
//! never blocks on a live fetch mid-operation, and an absent rate is a miss
//! the caller turns into a typed pending outcome — never a stale substitute
//! unless the caller explicitly opts into the most-recent-prior fallback.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::OrgId;
use crate::money::CurrencyCode;

/// Policy for FX lookups when no rate exists for the exact date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FxFallback {
    /// Only an exact-date rate is acceptable (the default)
    #[default]
    ExactOnly,
    /// Fall back to the most recent rate on or before the requested date
    MostRecentPrior,
}

/// A resolved FX observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxRate {
    /// Units of local currency per one unit of the foreign currency
    pub rate: Decimal,
    /// The date the rate was observed on (may precede the requested date
    /// under [`FxFallback::MostRecentPrior`])
    pub as_of: NaiveDate,
}

/// In-memory exchange-rate store keyed by (organization, currency, date)
#[derive(Debug, Default)]
pub struct ExchangeRateStore {
    rates: RwLock<HashMap<(OrgId, CurrencyCode), BTreeMap<NaiveDate, Decimal>>>,
}

impl ExchangeRateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate for (organization, currency, date)
    ///
    /// Re-recording the same key overwrites: rates are reference data, not
    /// versioned domain rows.
    pub fn set_rate(
        &self,
        ctx: &OperationContext,
        currency: CurrencyCode,
        date: NaiveDate,
        rate: Decimal,
    ) -> EngineResult<()> {
        if rate <= Decimal::ZERO {
            return Err(EngineError::DataQuality {
                entity: "ExchangeRate".to_string(),
                reason: format!("rate must be positive, got {rate}"),
            });
        }
        let mut rates = self.rates.write().expect("fx store lock poisoned");
        rates
            .entry((ctx.organization, currency))
            .or_default()
            .insert(date, rate);
        Ok(())
    }

    /// Look up the rate for (organization, currency, date)
    ///
    /// Returns `None` when no acceptable rate exists under the given
    /// fallback policy.
    pub fn rate_on(
        &self,
        organization: OrgId,
        currency: &CurrencyCode,
        date: NaiveDate,
        fallback: FxFallback,
    ) -> Option<FxRate> {
        let rates = self.rates.read().expect("fx store lock poisoned");
        let by_date = rates.get(&(organization, currency.clone()))?;
        match fallback {
            FxFallback::ExactOnly => by_date.get(&date).map(|rate| FxRate {
                rate: *rate,
                as_of: date,
            }),
            FxFallback::MostRecentPrior => {
                by_date
                    .range(..=date)
                    .next_back()
                    .map(|(as_of, rate)| FxRate {
                        rate: *rate,
                        as_of: *as_of,
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use rust_decimal_macros::dec;

    fn ctx(org: OrgId) -> OperationContext {
        OperationContext::new(Principal::named("fx-loader"), org)
    }

    fn eur() -> CurrencyCode {
        CurrencyCode::new("EUR").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_exact_lookup() {
        let org = OrgId::new();
        let store = ExchangeRateStore::new();
        store
            .set_rate(&ctx(org), eur(), date(2025, 3, 1), dec!(1.08))
            .unwrap();

        let hit = store
            .rate_on(org, &eur(), date(2025, 3, 1), FxFallback::ExactOnly)
            .unwrap();
        assert_eq!(hit.rate, dec!(1.08));
        assert_eq!(hit.as_of, date(2025, 3, 1));

        // exact-only must not substitute a prior date
        assert!(store
            .rate_on(org, &eur(), date(2025, 3, 2), FxFallback::ExactOnly)
            .is_none());
    }

    #[test]
    fn test_most_recent_prior_fallback() {
        let org = OrgId::new();
        let store = ExchangeRateStore::new();
        store
            .set_rate(&ctx(org), eur(), date(2025, 3, 1), dec!(1.08))
            .unwrap();
        store
            .set_rate(&ctx(org), eur(), date(2025, 3, 10), dec!(1.10))
            .unwrap();

        let hit = store
            .rate_on(org, &eur(), date(2025, 3, 15), FxFallback::MostRecentPrior)
            .unwrap();
        assert_eq!(hit.rate, dec!(1.10));
        assert_eq!(hit.as_of, date(2025, 3, 10));

        // nothing on or before the requested date
        assert!(store
            .rate_on(org, &eur(), date(2025, 2, 1), FxFallback::MostRecentPrior)
            .is_none());
    }

    #[test]
    fn test_rates_are_scoped_per_organization() {
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        let store = ExchangeRateStore::new();
        store
            .set_rate(&ctx(org_a), eur(), date(2025, 1, 1), dec!(1.05))
            .unwrap();
        assert!(store
            .rate_on(org_b, &eur(), date(2025, 1, 1), FxFallback::ExactOnly)
            .is_none());
    }

    #[test]
    fn test_nonpositive_rate_rejected() {
        let org = OrgId::new();
        let store = ExchangeRateStore::new();
        let err = store
            .set_rate(&ctx(org), eur(), date(2025, 1, 1), dec!(0))
            .unwrap_err();
        assert!(err.is_validation_error());
    }
}
