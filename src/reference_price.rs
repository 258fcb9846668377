//! Market reference prices
//!
//! External market observations — most importantly the Grid Reference Price
//! (GRP) derived from utility invoices as total variable charges divided by
//! total kWh invoiced. Observations are uniquely keyed by
//! (project, observation type, period start); monthly observations roll up
//! into the annual one.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{ProjectId, ReferencePriceId};
use crate::money::CurrencyCode;
use crate::period::BillingMonth;

/// What kind of market observation this is
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    /// Grid Reference Price derived from utility invoices
    GridReferencePrice,
    /// Some other market reference series
    Custom(String),
}

/// Observation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceGranularity {
    /// One observation per calendar month
    Monthly,
    /// One observation per calendar year
    Annual,
}

/// A market reference-price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePrice {
    /// Observation id
    pub id: ReferencePriceId,
    /// The project the observation applies to
    pub project_id: ProjectId,
    /// The observed series
    pub observation_type: ObservationType,
    /// Monthly or annual
    pub granularity: PriceGranularity,
    /// First day of the observed period
    pub period_start: NaiveDate,
    /// The per-kWh price
    pub price: Decimal,
    /// Currency of the price
    pub currency: CurrencyCode,
    /// Total variable charges the price was derived from, when invoice-derived
    pub total_variable_charges: Option<Decimal>,
    /// Total kWh invoiced the price was derived from, when invoice-derived
    pub total_kwh_invoiced: Option<Decimal>,
    /// When the observation was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Derive a Grid Reference Price from invoice aggregates
///
/// GRP = total variable charges / total kWh invoiced. A non-positive
/// denominator is a data-quality error, never a zero price.
pub fn derive_grp(total_variable_charges: Decimal, total_kwh_invoiced: Decimal) -> EngineResult<Decimal> {
    if total_kwh_invoiced <= Decimal::ZERO {
        return Err(EngineError::DataQuality {
            entity: "ReferencePrice".to_string(),
            reason: format!("total_kwh_invoiced must be positive, got {total_kwh_invoiced}"),
        });
    }
    if total_variable_charges < Decimal::ZERO {
        return Err(EngineError::DataQuality {
            entity: "ReferencePrice".to_string(),
            reason: format!("total_variable_charges must be non-negative, got {total_variable_charges}"),
        });
    }
    Ok(total_variable_charges / total_kwh_invoiced)
}

impl ReferencePrice {
    /// Build a monthly GRP observation from utility-invoice aggregates
    pub fn monthly_from_invoice(
        project_id: ProjectId,
        month: BillingMonth,
        total_variable_charges: Decimal,
        total_kwh_invoiced: Decimal,
        currency: CurrencyCode,
    ) -> EngineResult<Self> {
        let price = derive_grp(total_variable_charges, total_kwh_invoiced)?;
        Ok(Self {
            id: ReferencePriceId::new(),
            project_id,
            observation_type: ObservationType::GridReferencePrice,
            granularity: PriceGranularity::Monthly,
            period_start: month.first_day(),
            price,
            currency,
            total_variable_charges: Some(total_variable_charges),
            total_kwh_invoiced: Some(total_kwh_invoiced),
            recorded_at: Utc::now(),
        })
    }
}

type ObservationKey = (ProjectId, ObservationType, NaiveDate);

/// In-memory reference-price store
#[derive(Debug, Default)]
pub struct ReferencePriceStore {
    rows: RwLock<IndexMap<ReferencePriceId, ReferencePrice>>,
    by_key: RwLock<HashMap<ObservationKey, ReferencePriceId>>,
}

impl ReferencePriceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an observation; the (project, type, period-start) key is unique
    pub fn insert(
        &self,
        ctx: &OperationContext,
        observation: ReferencePrice,
    ) -> EngineResult<ReferencePriceId> {
        if observation.price < Decimal::ZERO {
            return Err(EngineError::DataQuality {
                entity: "ReferencePrice".to_string(),
                reason: format!("price must be non-negative, got {}", observation.price),
            });
        }
        let key = (
            observation.project_id,
            observation.observation_type.clone(),
            observation.period_start,
        );
        let mut by_key = self.by_key.write().expect("reference price lock poisoned");
        if by_key.contains_key(&key) {
            return Err(EngineError::AlreadyExists(format!(
                "reference price for project {} at {}",
                observation.project_id, observation.period_start
            )));
        }
        let id = observation.id;
        info!(
            project = %observation.project_id,
            period = %observation.period_start,
            price = %observation.price,
            principal = %ctx.principal.name,
            "recorded reference price"
        );
        by_key.insert(key, id);
        self.rows
            .write()
            .expect("reference price lock poisoned")
            .insert(id, observation);
        Ok(id)
    }

    /// Fetch an observation by id
    pub fn get(&self, id: ReferencePriceId) -> Option<ReferencePrice> {
        self.rows
            .read()
            .expect("reference price lock poisoned")
            .get(&id)
            .cloned()
    }

    /// The monthly observation for a billing month, falling back to the
    /// parent annual observation when no monthly one exists
    pub fn monthly_or_annual(
        &self,
        project: ProjectId,
        observation_type: &ObservationType,
        month: BillingMonth,
    ) -> Option<ReferencePrice> {
        let by_key = self.by_key.read().expect("reference price lock poisoned");
        let rows = self.rows.read().expect("reference price lock poisoned");
        let monthly_key = (project, observation_type.clone(), month.first_day());
        if let Some(id) = by_key.get(&monthly_key) {
            return rows.get(id).cloned();
        }
        let annual_start = NaiveDate::from_ymd_opt(month.year(), 1, 1).expect("valid date");
        let annual_key = (project, observation_type.clone(), annual_start);
        by_key
            .get(&annual_key)
            .and_then(|id| rows.get(id))
            .filter(|rp| rp.granularity == PriceGranularity::Annual)
            .cloned()
    }

    /// Aggregate a year's monthly observations into the annual observation
    ///
    /// The annual GRP is the kWh-weighted ratio: Σ charges / Σ kWh over the
    /// invoice-derived monthly rows. Re-running replaces the annual row.
    pub fn roll_up_annual(
        &self,
        ctx: &OperationContext,
        project: ProjectId,
        observation_type: ObservationType,
        year: i32,
    ) -> EngineResult<ReferencePrice> {
        let (total_charges, total_kwh, currency) = {
            let rows = self.rows.read().expect("reference price lock poisoned");
            let monthly: Vec<&ReferencePrice> = rows
                .values()
                .filter(|rp| {
                    rp.project_id == project
                        && rp.observation_type == observation_type
                        && rp.granularity == PriceGranularity::Monthly
                        && rp.period_start.year() == year
                })
                .collect();
            if monthly.is_empty() {
                return Err(EngineError::not_found(
                    "ReferencePrice",
                    format!("monthly observations for project {project} in {year}"),
                ));
            }
            let mut total_charges = Decimal::ZERO;
            let mut total_kwh = Decimal::ZERO;
            for rp in &monthly {
                match (rp.total_variable_charges, rp.total_kwh_invoiced) {
                    (Some(charges), Some(kwh)) => {
                        total_charges += charges;
                        total_kwh += kwh;
                    }
                    _ => {
                        return Err(EngineError::DataQuality {
                            entity: "ReferencePrice".to_string(),
                            reason: format!(
                                "monthly observation {} lacks invoice aggregates",
                                rp.period_start
                            ),
                        })
                    }
                }
            }
            (total_charges, total_kwh, monthly[0].currency.clone())
        };

        let price = derive_grp(total_charges, total_kwh)?;
        let annual = ReferencePrice {
            id: ReferencePriceId::new(),
            project_id: project,
            observation_type: observation_type.clone(),
            granularity: PriceGranularity::Annual,
            period_start: NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date"),
            price,
            currency,
            total_variable_charges: Some(total_charges),
            total_kwh_invoiced: Some(total_kwh),
            recorded_at: ctx.requested_at,
        };

        let key = (project, observation_type, annual.period_start);
        let mut by_key = self.by_key.write().expect("reference price lock poisoned");
        let mut rows = self.rows.write().expect("reference price lock poisoned");
        if let Some(existing) = by_key.remove(&key) {
            rows.shift_remove(&existing);
        }
        by_key.insert(key, annual.id);
        rows.insert(annual.id, annual.clone());
        Ok(annual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use crate::identifiers::OrgId;
    use rust_decimal_macros::dec;

    fn ctx() -> OperationContext {
        OperationContext::new(Principal::named("uploader"), OrgId::new())
    }

    fn kes() -> CurrencyCode {
        CurrencyCode::new("KES").unwrap()
    }

    fn month(y: i32, m: u32) -> BillingMonth {
        BillingMonth::new(y, m).unwrap()
    }

    #[test]
    fn test_grp_derivation() {
        assert_eq!(derive_grp(dec!(1500), dec!(10000)).unwrap(), dec!(0.15));
        assert!(derive_grp(dec!(1500), dec!(0)).unwrap_err().is_validation_error());
        assert!(derive_grp(dec!(-10), dec!(100)).unwrap_err().is_validation_error());
    }

    #[test]
    fn test_unique_key_enforced() {
        let store = ReferencePriceStore::new();
        let project = ProjectId::new();
        let obs =
            ReferencePrice::monthly_from_invoice(project, month(2025, 3), dec!(1500), dec!(10000), kes())
                .unwrap();
        store.insert(&ctx(), obs.clone()).unwrap();

        let dup =
            ReferencePrice::monthly_from_invoice(project, month(2025, 3), dec!(1600), dec!(10000), kes())
                .unwrap();
        assert!(matches!(
            store.insert(&ctx(), dup),
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_monthly_preferred_over_annual() {
        let store = ReferencePriceStore::new();
        let project = ProjectId::new();
        for m in 1..=3 {
            let obs = ReferencePrice::monthly_from_invoice(
                project,
                month(2025, m),
                dec!(1000) * Decimal::from(m),
                dec!(10000),
                kes(),
            )
            .unwrap();
            store.insert(&ctx(), obs).unwrap();
        }
        let annual = store
            .roll_up_annual(&ctx(), project, ObservationType::GridReferencePrice, 2025)
            .unwrap();
        // (1000 + 2000 + 3000) / 30000
        assert_eq!(annual.price, dec!(0.2));

        // March has its own monthly row
        let hit = store
            .monthly_or_annual(project, &ObservationType::GridReferencePrice, month(2025, 3))
            .unwrap();
        assert_eq!(hit.granularity, PriceGranularity::Monthly);
        assert_eq!(hit.price, dec!(0.3));

        // July falls back to the annual roll-up
        let hit = store
            .monthly_or_annual(project, &ObservationType::GridReferencePrice, month(2025, 7))
            .unwrap();
        assert_eq!(hit.granularity, PriceGranularity::Annual);
        assert_eq!(hit.price, dec!(0.2));

        // no observation at all for 2026
        assert!(store
            .monthly_or_annual(project, &ObservationType::GridReferencePrice, month(2026, 1))
            .is_none());
    }

    #[test]
    fn test_roll_up_is_rerunnable() {
        let store = ReferencePriceStore::new();
        let project = ProjectId::new();
        store
            .insert(
                &ctx(),
                ReferencePrice::monthly_from_invoice(project, month(2025, 1), dec!(100), dec!(1000), kes())
                    .unwrap(),
            )
            .unwrap();
        let first = store
            .roll_up_annual(&ctx(), project, ObservationType::GridReferencePrice, 2025)
            .unwrap();
        assert_eq!(first.price, dec!(0.1));

        store
            .insert(
                &ctx(),
                ReferencePrice::monthly_from_invoice(project, month(2025, 2), dec!(300), dec!(1000), kes())
                    .unwrap(),
            )
            .unwrap();
        let second = store
            .roll_up_annual(&ctx(), project, ObservationType::GridReferencePrice, 2025)
            .unwrap();
        assert_eq!(second.price, dec!(0.2));
    }
}
