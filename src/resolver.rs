//! The tariff resolver
//!
//! `resolve_rate(tariff, billing month)` returns the authoritative per-unit
//! price for that month. Deterministic escalation types compute directly
//! from the base rate; market-rebased tariffs resolve at monthly
//! granularity against a reference price with FX-converted floor/ceiling
//! bounds. Missing market data is a typed pending outcome the caller can
//! retry later, never a zero rate and never an error.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::fx::ExchangeRateStore;
use crate::identifiers::{AnnualRateId, MonthlyRateId, ProjectId, ReferencePriceId, TariffId};
use crate::money::CurrencyCode;
use crate::period::BillingMonth;
use crate::reference_price::ReferencePriceStore;
use crate::tariff::{
    ClauseTariff, EscalationType, MonthlyRateInputs, RateBinding, RateLedger, RateSource,
    TariffStore,
};

/// Provenance of a resolved rate: which rows produced it
#[derive(Debug, Clone, PartialEq)]
pub enum RateBasis {
    /// Deterministic annual escalation
    AnnualEscalation {
        /// The tariff version the rate was resolved from
        tariff_id: TariffId,
        /// The annual-rate row
        annual_rate_id: AnnualRateId,
        /// 1-based contract year
        contract_year: u32,
    },
    /// Monthly market rebase
    MonthlyRebase {
        /// The tariff version the rate was resolved from
        tariff_id: TariffId,
        /// The annual-rate row (reference point only)
        annual_rate_id: AnnualRateId,
        /// The monthly-rate row
        monthly_rate_id: MonthlyRateId,
        /// The reference observation used
        reference_price_id: ReferencePriceId,
        /// Which bound was binding
        rate_binding: RateBinding,
    },
}

/// A successfully resolved rate with full provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    /// The per-unit rate in local currency
    pub rate: Decimal,
    /// The local currency
    pub currency: CurrencyCode,
    /// Where the rate came from
    pub basis: RateBasis,
}

/// Why a rate could not be resolved yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    /// No reference-price observation covers the billing month
    MissingReferencePrice {
        /// The project whose observation is missing
        project: ProjectId,
        /// The uncovered month
        month: BillingMonth,
    },
    /// No acceptable FX rate exists for converting the contractual bounds
    MissingFxRate {
        /// The bounds' currency
        currency: CurrencyCode,
        /// The conversion date that had no rate
        date: NaiveDate,
    },
}

/// Outcome of a rate resolution
///
/// Pending is not an error: the inputs are valid but external market data
/// has not arrived yet. Re-running after the data lands resolves it.
#[derive(Debug, Clone, PartialEq)]
pub enum RateOutcome {
    /// The authoritative rate for the month
    Resolved(ResolvedRate),
    /// Resolution is blocked on missing market data
    Pending(PendingReason),
}

impl RateOutcome {
    /// Whether resolution is blocked on missing data
    pub fn is_pending(&self) -> bool {
        matches!(self, RateOutcome::Pending(_))
    }

    /// The resolved rate, when not pending
    pub fn resolved(&self) -> Option<&ResolvedRate> {
        match self {
            RateOutcome::Resolved(rate) => Some(rate),
            RateOutcome::Pending(_) => None,
        }
    }
}

/// Resolves authoritative per-unit prices across escalation and rebasing
#[derive(Debug)]
pub struct TariffResolver<'a> {
    tariffs: &'a TariffStore,
    ledger: &'a RateLedger,
    reference_prices: &'a ReferencePriceStore,
    fx: &'a ExchangeRateStore,
    config: &'a EngineConfig,
}

impl<'a> TariffResolver<'a> {
    /// Build a resolver over the given stores
    pub fn new(
        tariffs: &'a TariffStore,
        ledger: &'a RateLedger,
        reference_prices: &'a ReferencePriceStore,
        fx: &'a ExchangeRateStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            tariffs,
            ledger,
            reference_prices,
            fx,
            config,
        }
    }

    /// Resolve the authoritative rate for a tariff and billing month
    ///
    /// Idempotent: re-running for an already-resolved month updates the
    /// existing ledger rows in place rather than duplicating them.
    pub fn resolve_rate(
        &self,
        ctx: &OperationContext,
        tariff_id: TariffId,
        month: BillingMonth,
    ) -> EngineResult<RateOutcome> {
        let tariff = self
            .tariffs
            .version_in_force(tariff_id, month.first_day())?
            .ok_or_else(|| {
                EngineError::not_found(
                    "ClauseTariff",
                    format!("{tariff_id} (no version in force for {month})"),
                )
            })?;
        let contract_year = month.contract_year(tariff.escalation_anchor)?;
        let annual_rate = self.round(self.escalated_rate(&tariff, contract_year));
        let annual_row = self
            .ledger
            .upsert_annual(ctx, tariff.id, contract_year, annual_rate);

        if tariff.escalation.is_deterministic() {
            debug!(
                tariff = %tariff.id,
                %month,
                contract_year,
                rate = %annual_row.final_effective_tariff,
                "resolved deterministic rate"
            );
            return Ok(RateOutcome::Resolved(ResolvedRate {
                rate: annual_row.final_effective_tariff,
                currency: tariff.currency,
                basis: RateBasis::AnnualEscalation {
                    tariff_id: tariff.id,
                    annual_rate_id: annual_row.id,
                    contract_year,
                },
            }));
        }
        self.resolve_monthly_rebase(ctx, &tariff, annual_row.id, month)
    }

    /// The deterministic escalated rate for a contract year
    ///
    /// Escalation compounds: year 1 is the base rate, year N multiplies by
    /// the annual factor N-1 times. For a rebased tariff this yields the
    /// annual reference point, not the authoritative rate.
    fn escalated_rate(&self, tariff: &ClauseTariff, contract_year: u32) -> Decimal {
        let annual_pct = match &tariff.escalation {
            EscalationType::None | EscalationType::RebasedMarketPrice { .. } => Decimal::ZERO,
            EscalationType::FixedIncrease { annual_pct } => *annual_pct,
            EscalationType::FixedDecrease { annual_pct } => -*annual_pct,
            EscalationType::Percentage { annual_pct } => *annual_pct,
            EscalationType::UsCpi { assumed_annual_pct } => *assumed_annual_pct,
        };
        let factor = Decimal::ONE + annual_pct / Decimal::ONE_HUNDRED;
        let mut rate = tariff.base_rate;
        for _ in 1..contract_year {
            rate *= factor;
        }
        rate
    }

    fn resolve_monthly_rebase(
        &self,
        ctx: &OperationContext,
        tariff: &ClauseTariff,
        annual_rate_id: AnnualRateId,
        month: BillingMonth,
    ) -> EngineResult<RateOutcome> {
        let EscalationType::RebasedMarketPrice {
            discount_pct,
            floor,
            ceiling,
            observation_type,
        } = &tariff.escalation
        else {
            return Err(EngineError::Internal(format!(
                "tariff {} is not market-rebased",
                tariff.id
            )));
        };
        let project = tariff.project_id.ok_or_else(|| EngineError::DataQuality {
            entity: "ClauseTariff".to_string(),
            reason: format!(
                "market-rebased tariff {} has no project for reference prices",
                tariff.id
            ),
        })?;

        let Some(reference) = self
            .reference_prices
            .monthly_or_annual(project, observation_type, month)
        else {
            debug!(tariff = %tariff.id, %month, "no reference price yet, rate pending");
            return Ok(RateOutcome::Pending(PendingReason::MissingReferencePrice {
                project,
                month,
            }));
        };

        let discounted = self.round(
            reference.price * (Decimal::ONE - discount_pct / Decimal::ONE_HUNDRED),
        );

        // bounds convert into local currency at the end of the billing month
        let (floor_local, ceiling_local, fx_rate_used) = if floor.currency == tariff.currency {
            (floor.amount, ceiling.amount, None)
        } else {
            let conversion_date = month.last_day();
            let Some(fx) = self.fx.rate_on(
                ctx.organization,
                &floor.currency,
                conversion_date,
                self.config.fx_fallback,
            ) else {
                debug!(
                    tariff = %tariff.id,
                    %month,
                    currency = %floor.currency,
                    "no FX rate for bound conversion, rate pending"
                );
                return Ok(RateOutcome::Pending(PendingReason::MissingFxRate {
                    currency: floor.currency.clone(),
                    date: conversion_date,
                }));
            };
            (
                self.round(floor.amount * fx.rate),
                self.round(ceiling.amount * fx.rate),
                Some(fx.rate),
            )
        };

        let (effective, rate_binding) = if discounted < floor_local {
            (floor_local, RateBinding::Floor)
        } else if discounted > ceiling_local {
            (ceiling_local, RateBinding::Ceiling)
        } else {
            (discounted, RateBinding::Discounted)
        };

        let monthly_row = self.ledger.upsert_monthly(
            ctx,
            annual_rate_id,
            month,
            MonthlyRateInputs {
                reference_price_id: reference.id,
                discounted_reference: discounted,
                floor_local,
                ceiling_local,
                fx_rate_used,
                effective_tariff_local: effective,
                rate_binding,
            },
        );
        // the annual authoritative value tracks the latest resolved month;
        // a backfilled earlier month must not displace it
        if monthly_row.is_current {
            self.ledger
                .set_final_tariff(annual_rate_id, effective, RateSource::MonthlyRebase)?;
        }

        info!(
            tariff = %tariff.id,
            %month,
            rate = %effective,
            binding = ?rate_binding,
            principal = %ctx.principal.name,
            "resolved market-rebased rate"
        );
        Ok(RateOutcome::Resolved(ResolvedRate {
            rate: effective,
            currency: tariff.currency.clone(),
            basis: RateBasis::MonthlyRebase {
                tariff_id: tariff.id,
                annual_rate_id,
                monthly_rate_id: monthly_row.id,
                reference_price_id: reference.id,
                rate_binding,
            },
        }))
    }

    fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.config.rate_scale, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use crate::identifiers::{ContractId, OrgId};
    use crate::money::Money;
    use crate::reference_price::{ObservationType, ReferencePrice};
    use crate::tariff::{EnergySaleType, TariffStructure, TariffUnit};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    struct Fixture {
        ctx: OperationContext,
        tariffs: TariffStore,
        ledger: RateLedger,
        reference_prices: ReferencePriceStore,
        fx: ExchangeRateStore,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ctx: OperationContext::new(Principal::named("resolver"), OrgId::new()),
                tariffs: TariffStore::new(),
                ledger: RateLedger::new(),
                reference_prices: ReferencePriceStore::new(),
                fx: ExchangeRateStore::new(),
                config: EngineConfig::default(),
            }
        }

        fn resolver(&self) -> TariffResolver<'_> {
            TariffResolver::new(
                &self.tariffs,
                &self.ledger,
                &self.reference_prices,
                &self.fx,
                &self.config,
            )
        }
    }

    fn kes() -> CurrencyCode {
        CurrencyCode::new("KES").unwrap()
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    fn fixed_tariff(escalation: EscalationType) -> ClauseTariff {
        ClauseTariff::new(
            ContractId::new(),
            "energy-base",
            dec!(0.10),
            TariffUnit::PerKwh,
            kes(),
            TariffStructure::Fixed,
            EnergySaleType::NetExport,
            escalation,
            anchor(),
        )
        .unwrap()
    }

    fn month(y: i32, m: u32) -> BillingMonth {
        BillingMonth::new(y, m).unwrap()
    }

    #[test_case(1, dec!(0.10) ; "year one is the base rate")]
    #[test_case(2, dec!(0.1025) ; "year two escalates once")]
    #[test_case(3, dec!(0.105063) ; "year three compounds and rounds")]
    fn test_fixed_increase_escalation(year: u32, expected: Decimal) {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::FixedIncrease {
            annual_pct: dec!(2.5),
        });
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();

        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2022 + year as i32, 6))
            .unwrap();
        let resolved = outcome.resolved().unwrap();
        assert_eq!(resolved.rate, expected);
        assert_eq!(resolved.currency, kes());
        assert!(matches!(
            resolved.basis,
            RateBasis::AnnualEscalation { contract_year, .. } if contract_year == year
        ));
    }

    #[test]
    fn test_fixed_decrease_compounds_downward() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::FixedDecrease {
            annual_pct: dec!(10),
        });
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();
        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2024, 6))
            .unwrap();
        assert_eq!(outcome.resolved().unwrap().rate, dec!(0.09));
    }

    #[test]
    fn test_clamp_at_ceiling() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
            discount_pct: dec!(20),
            floor: Money::new(dec!(0.40), kes()),
            ceiling: Money::new(dec!(0.45), kes()),
            observation_type: ObservationType::GridReferencePrice,
        })
        .with_project(crate::identifiers::ProjectId::new());
        let project = tariff.project_id.unwrap();
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();

        // GRP 0.625 discounted 20% = 0.50, above the 0.45 ceiling
        fixture
            .reference_prices
            .insert(
                &fixture.ctx,
                ReferencePrice::monthly_from_invoice(
                    project,
                    month(2025, 3),
                    dec!(6250),
                    dec!(10000),
                    kes(),
                )
                .unwrap(),
            )
            .unwrap();

        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2025, 3))
            .unwrap();
        let resolved = outcome.resolved().unwrap();
        assert_eq!(resolved.rate, dec!(0.45));
        assert!(matches!(
            resolved.basis,
            RateBasis::MonthlyRebase {
                rate_binding: RateBinding::Ceiling,
                ..
            }
        ));
    }

    #[test]
    fn test_fx_converted_bounds() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
            discount_pct: dec!(20),
            floor: Money::new(dec!(0.003), usd()),
            ceiling: Money::new(dec!(0.0035), usd()),
            observation_type: ObservationType::GridReferencePrice,
        })
        .with_project(crate::identifiers::ProjectId::new());
        let project = tariff.project_id.unwrap();
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();

        fixture
            .reference_prices
            .insert(
                &fixture.ctx,
                ReferencePrice::monthly_from_invoice(
                    project,
                    month(2025, 3),
                    dec!(6250),
                    dec!(10000),
                    kes(),
                )
                .unwrap(),
            )
            .unwrap();

        // no FX rate yet: pending, not an error and not zero
        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2025, 3))
            .unwrap();
        assert!(matches!(
            outcome,
            RateOutcome::Pending(PendingReason::MissingFxRate { ref currency, .. })
                if *currency == usd()
        ));

        // 130 KES per USD: floor 0.39, ceiling 0.455, discounted 0.50 clamps
        fixture
            .fx
            .set_rate(
                &fixture.ctx,
                usd(),
                NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
                dec!(130),
            )
            .unwrap();
        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2025, 3))
            .unwrap();
        let resolved = outcome.resolved().unwrap();
        assert_eq!(resolved.rate, dec!(0.455));

        let monthly = fixture
            .ledger
            .monthly_for(
                match resolved.basis {
                    RateBasis::MonthlyRebase { annual_rate_id, .. } => annual_rate_id,
                    _ => panic!("expected monthly rebase"),
                },
                month(2025, 3),
            )
            .unwrap();
        assert_eq!(monthly.fx_rate_used, Some(dec!(130)));
        assert_eq!(monthly.floor_local, dec!(0.39));
        assert_eq!(monthly.ceiling_local, dec!(0.455));
    }

    #[test]
    fn test_missing_reference_price_is_pending() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
            discount_pct: dec!(10),
            floor: Money::new(dec!(0.40), kes()),
            ceiling: Money::new(dec!(0.45), kes()),
            observation_type: ObservationType::GridReferencePrice,
        })
        .with_project(crate::identifiers::ProjectId::new());
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();

        let outcome = fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2025, 6))
            .unwrap();
        assert!(outcome.is_pending());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
            discount_pct: dec!(20),
            floor: Money::new(dec!(0.40), kes()),
            ceiling: Money::new(dec!(0.60), kes()),
            observation_type: ObservationType::GridReferencePrice,
        })
        .with_project(crate::identifiers::ProjectId::new());
        let project = tariff.project_id.unwrap();
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();
        fixture
            .reference_prices
            .insert(
                &fixture.ctx,
                ReferencePrice::monthly_from_invoice(
                    project,
                    month(2025, 3),
                    dec!(6250),
                    dec!(10000),
                    kes(),
                )
                .unwrap(),
            )
            .unwrap();

        let resolver = fixture.resolver();
        let first = resolver.resolve_rate(&fixture.ctx, id, month(2025, 3)).unwrap();
        let second = resolver.resolve_rate(&fixture.ctx, id, month(2025, 3)).unwrap();
        assert_eq!(first, second);

        let RateBasis::MonthlyRebase { annual_rate_id, .. } =
            first.resolved().unwrap().basis.clone()
        else {
            panic!("expected monthly rebase");
        };
        assert_eq!(fixture.ledger.monthly_rows(annual_rate_id).len(), 1);

        // the annual row carries the monthly value as authoritative
        let annual = fixture.ledger.annual_for(id, 3).unwrap();
        assert_eq!(annual.final_effective_tariff, dec!(0.50));
        assert_eq!(annual.final_source, RateSource::MonthlyRebase);
    }

    #[test]
    fn test_backfilled_month_keeps_latest_final_tariff() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
            discount_pct: dec!(20),
            floor: Money::new(dec!(0.40), kes()),
            ceiling: Money::new(dec!(0.60), kes()),
            observation_type: ObservationType::GridReferencePrice,
        })
        .with_project(crate::identifiers::ProjectId::new());
        let project = tariff.project_id.unwrap();
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();

        // February GRP 0.625 discounts to 0.50; January GRP 0.45 discounts
        // to 0.36, below the 0.40 floor
        for (m, charges) in [(2, dec!(6250)), (1, dec!(4500))] {
            fixture
                .reference_prices
                .insert(
                    &fixture.ctx,
                    ReferencePrice::monthly_from_invoice(
                        project,
                        month(2025, m),
                        charges,
                        dec!(10000),
                        kes(),
                    )
                    .unwrap(),
                )
                .unwrap();
        }

        let resolver = fixture.resolver();
        let feb = resolver.resolve_rate(&fixture.ctx, id, month(2025, 2)).unwrap();
        assert_eq!(feb.resolved().unwrap().rate, dec!(0.50));

        // a nightly backfill of January resolves at the floor but leaves
        // the annual authoritative value on February
        let jan = resolver.resolve_rate(&fixture.ctx, id, month(2025, 1)).unwrap();
        assert_eq!(jan.resolved().unwrap().rate, dec!(0.40));

        let annual = fixture.ledger.annual_for(id, 3).unwrap();
        assert_eq!(annual.final_effective_tariff, dec!(0.50));
        assert_eq!(annual.final_source, RateSource::MonthlyRebase);
    }

    proptest! {
        /// The resolved market-rebased rate always lands within the
        /// contractual bounds, and the reported binding matches where the
        /// discounted reference actually fell.
        #[test]
        fn rebased_rate_respects_bounds(
            grp_cents in 1u32..=200,
            floor_cents in 1u32..=100,
            spread_cents in 0u32..=100,
            discount in 0u32..=100,
        ) {
            let fixture = Fixture::new();
            let floor = Decimal::new(i64::from(floor_cents), 2);
            let ceiling = floor + Decimal::new(i64::from(spread_cents), 2);
            let tariff = fixed_tariff(EscalationType::RebasedMarketPrice {
                discount_pct: Decimal::from(discount),
                floor: Money::new(floor, kes()),
                ceiling: Money::new(ceiling, kes()),
                observation_type: ObservationType::GridReferencePrice,
            })
            .with_project(crate::identifiers::ProjectId::new());
            let project = tariff.project_id.unwrap();
            let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();
            fixture
                .reference_prices
                .insert(
                    &fixture.ctx,
                    ReferencePrice::monthly_from_invoice(
                        project,
                        month(2025, 3),
                        Decimal::from(grp_cents * 100),
                        dec!(10000),
                        kes(),
                    )
                    .unwrap(),
                )
                .unwrap();

            let outcome = fixture
                .resolver()
                .resolve_rate(&fixture.ctx, id, month(2025, 3))
                .unwrap();
            let resolved = outcome.resolved().unwrap();
            prop_assert!(resolved.rate >= floor);
            prop_assert!(resolved.rate <= ceiling);

            let grp = Decimal::new(i64::from(grp_cents), 2);
            let discounted = (grp * (Decimal::ONE_HUNDRED - Decimal::from(discount))
                / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero);
            let RateBasis::MonthlyRebase { rate_binding, .. } = resolved.basis else {
                panic!("expected a monthly rebase");
            };
            match rate_binding {
                RateBinding::Floor => {
                    prop_assert!(discounted < floor);
                    prop_assert_eq!(resolved.rate, floor);
                }
                RateBinding::Ceiling => {
                    prop_assert!(discounted > ceiling);
                    prop_assert_eq!(resolved.rate, ceiling);
                }
                RateBinding::Discounted => prop_assert_eq!(resolved.rate, discounted),
            }
        }
    }

    #[test]
    fn test_month_before_anchor_rejected() {
        let fixture = Fixture::new();
        let tariff = fixed_tariff(EscalationType::None);
        let id = fixture.tariffs.insert(&fixture.ctx, tariff).unwrap();
        assert!(fixture
            .resolver()
            .resolve_rate(&fixture.ctx, id, month(2022, 6))
            .is_err());
    }
}
