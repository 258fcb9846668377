//! Clause tariffs and resolved rate records
//!
//! A [`ClauseTariff`] is a priced line-item definition: base rate, unit,
//! currency, escalation behavior, and a group key identifying the same
//! logical pricing line across its version history. Resolved rates live in
//! the [`RateLedger`]: one annual row per contract year, plus monthly rows
//! for market-rebased tariffs.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::context::OperationContext;
use crate::contract::ContractStore;
use crate::entity::EntityId;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{
    AmendmentId, AnnualRateId, ClauseId, ContractId, MonthlyRateId, ProjectId, ReferencePriceId,
    TariffId, TariffMarker,
};
use crate::money::{CurrencyCode, Money};
use crate::period::BillingMonth;
use crate::reference_price::ObservationType;
use crate::versioning::{VersionChain, VersionedRecord};

/// Tariff structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TariffStructure {
    /// Flat contractual rate
    Fixed,
    /// Grid-referenced rate
    Grid,
    /// Generator-referenced rate
    Generator,
}

/// What kind of energy sale the tariff prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergySaleType {
    /// All generated energy
    GrossGeneration,
    /// Net energy exported to the grid
    NetExport,
    /// Excess energy beyond a consumption baseline
    Excess,
}

/// The unit the rate applies per
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TariffUnit {
    /// Per kilowatt-hour
    PerKwh,
    /// Per megawatt-hour
    PerMwh,
    /// Per kilowatt of capacity per month
    PerKwMonth,
    /// Fixed monthly charge
    FixedMonthly,
}

/// How the rate escalates from the base rate across contract years
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationType {
    /// The base rate applies unchanged
    None,
    /// Compounds upward by a fixed annual percentage
    FixedIncrease {
        /// Annual escalation, percent (positive)
        annual_pct: Decimal,
    },
    /// Compounds downward by a fixed annual percentage
    FixedDecrease {
        /// Annual de-escalation, percent (positive)
        annual_pct: Decimal,
    },
    /// Compounds by a signed annual percentage
    Percentage {
        /// Annual escalation, percent (signed)
        annual_pct: Decimal,
    },
    /// Compounds by a contractually assumed US-CPI percentage
    UsCpi {
        /// Assumed annual CPI, percent
        assumed_annual_pct: Decimal,
    },
    /// Rebased monthly against a market reference price, bounded by a
    /// contractual floor and ceiling
    RebasedMarketPrice {
        /// Discount applied to the reference price, percent
        discount_pct: Decimal,
        /// Contractual floor (possibly in a foreign currency)
        floor: Money,
        /// Contractual ceiling (same currency as the floor)
        ceiling: Money,
        /// The reference series to rebase against
        observation_type: ObservationType,
    },
}

impl EscalationType {
    /// Whether the effective rate is computable without market data
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, EscalationType::RebasedMarketPrice { .. })
    }

    /// Validate the escalation parameters
    ///
    /// Floor above ceiling is a data-quality error caught here, at write
    /// time, not at resolution time.
    pub fn validate(&self) -> EngineResult<()> {
        let reject = |reason: String| {
            Err(EngineError::DataQuality {
                entity: "ClauseTariff".to_string(),
                reason,
            })
        };
        match self {
            EscalationType::None => Ok(()),
            EscalationType::FixedIncrease { annual_pct } => {
                if *annual_pct <= Decimal::ZERO {
                    return reject(format!(
                        "fixed escalation percentage must be positive, got {annual_pct}"
                    ));
                }
                Ok(())
            }
            EscalationType::FixedDecrease { annual_pct } => {
                if *annual_pct <= Decimal::ZERO {
                    return reject(format!(
                        "fixed escalation percentage must be positive, got {annual_pct}"
                    ));
                }
                // a decrease of 100% or more zeroes or flips the rate sign
                if *annual_pct >= Decimal::ONE_HUNDRED {
                    return reject(format!(
                        "annual decrease must be below 100%, got {annual_pct}"
                    ));
                }
                Ok(())
            }
            EscalationType::Percentage { annual_pct }
            | EscalationType::UsCpi {
                assumed_annual_pct: annual_pct,
            } => {
                if *annual_pct <= -Decimal::ONE_HUNDRED {
                    return reject(format!(
                        "annual percentage must be above -100%, got {annual_pct}"
                    ));
                }
                Ok(())
            }
            EscalationType::RebasedMarketPrice {
                discount_pct,
                floor,
                ceiling,
                ..
            } => {
                if *discount_pct < Decimal::ZERO || *discount_pct > Decimal::ONE_HUNDRED {
                    return reject(format!(
                        "discount percentage must be within [0, 100], got {discount_pct}"
                    ));
                }
                if floor.currency != ceiling.currency {
                    return reject(format!(
                        "floor currency {} differs from ceiling currency {}",
                        floor.currency, ceiling.currency
                    ));
                }
                if floor.amount > ceiling.amount {
                    return reject(format!(
                        "floor {} exceeds ceiling {}",
                        floor.amount, ceiling.amount
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A priced line-item definition (one version of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseTariff {
    /// Tariff row id
    pub id: TariffId,
    /// Owning contract
    pub contract_id: ContractId,
    /// The pricing clause this tariff implements, when linked
    pub clause_id: Option<ClauseId>,
    /// The project whose market observations price this tariff
    pub project_id: Option<ProjectId>,
    /// Identifies the same logical pricing line across versions
    pub tariff_group_key: String,
    /// The contractual base rate
    pub base_rate: Decimal,
    /// Unit the rate applies per
    pub unit: TariffUnit,
    /// Local (billing) currency
    pub currency: CurrencyCode,
    /// Tariff structure
    pub structure: TariffStructure,
    /// What energy sale the tariff prices
    pub energy_sale_type: EnergySaleType,
    /// Escalation behavior
    pub escalation: EscalationType,
    /// Contract-year anchor (commercial operation date)
    pub escalation_anchor: NaiveDate,
    /// Effective from (inclusive), if bounded
    pub valid_from: Option<NaiveDate>,
    /// Effective to (inclusive), if bounded
    pub valid_to: Option<NaiveDate>,
    /// Whether this is the current version
    pub is_current: bool,
    /// The tariff row this version superseded
    pub supersedes_tariff_id: Option<TariffId>,
    /// The amendment that introduced this version
    pub contract_amendment_id: Option<AmendmentId>,
    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl ClauseTariff {
    /// Create the first version of a tariff, validating rate and escalation
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contract_id: ContractId,
        tariff_group_key: impl Into<String>,
        base_rate: Decimal,
        unit: TariffUnit,
        currency: CurrencyCode,
        structure: TariffStructure,
        energy_sale_type: EnergySaleType,
        escalation: EscalationType,
        escalation_anchor: NaiveDate,
    ) -> EngineResult<Self> {
        if base_rate < Decimal::ZERO {
            return Err(EngineError::DataQuality {
                entity: "ClauseTariff".to_string(),
                reason: format!("base rate must be non-negative, got {base_rate}"),
            });
        }
        escalation.validate()?;
        Ok(Self {
            id: TariffId::new(),
            contract_id,
            clause_id: None,
            project_id: None,
            tariff_group_key: tariff_group_key.into(),
            base_rate,
            unit,
            currency,
            structure,
            energy_sale_type,
            escalation,
            escalation_anchor,
            valid_from: None,
            valid_to: None,
            is_current: true,
            supersedes_tariff_id: None,
            contract_amendment_id: None,
            created_at: Utc::now(),
        })
    }

    /// Link the pricing clause
    pub fn with_clause(mut self, clause: ClauseId) -> Self {
        self.clause_id = Some(clause);
        self
    }

    /// Link the project supplying market observations
    pub fn with_project(mut self, project: ProjectId) -> Self {
        self.project_id = Some(project);
        self
    }

    /// Bound the validity window
    pub fn with_validity(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    /// Attach the amendment that introduced this version
    pub fn with_amendment(mut self, amendment: AmendmentId) -> Self {
        self.contract_amendment_id = Some(amendment);
        self
    }
}

impl VersionedRecord for ClauseTariff {
    type Marker = TariffMarker;

    fn entity_name() -> &'static str {
        "ClauseTariff"
    }

    fn record_id(&self) -> EntityId<Self::Marker> {
        self.id
    }

    fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    fn identity_key(&self) -> String {
        let from = self
            .valid_from
            .map_or_else(|| "*".to_string(), |d| d.to_string());
        let to = self
            .valid_to
            .map_or_else(|| "*".to_string(), |d| d.to_string());
        format!("{}@{from}..{to}", self.tariff_group_key)
    }

    fn validity(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.valid_from, self.valid_to)
    }

    fn is_current(&self) -> bool {
        self.is_current
    }

    fn set_current(&mut self, current: bool) {
        self.is_current = current;
    }

    fn supersedes(&self) -> Option<EntityId<Self::Marker>> {
        self.supersedes_tariff_id
    }

    fn set_supersedes(&mut self, prior: Option<EntityId<Self::Marker>>) {
        self.supersedes_tariff_id = prior;
    }

    fn amendment_id(&self) -> Option<AmendmentId> {
        self.contract_amendment_id
    }
}

/// Tariff store: a version chain with tariff-shaped lookups
#[derive(Debug, Default)]
pub struct TariffStore {
    chain: VersionChain<ClauseTariff>,
}

impl TariffStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the first version of a tariff
    pub fn insert(&self, _ctx: &OperationContext, tariff: ClauseTariff) -> EngineResult<TariffId> {
        self.chain.insert_initial(tariff)
    }

    /// Supersede `prior_id` with a new tariff version
    pub fn amend(
        &self,
        ctx: &OperationContext,
        new_version: ClauseTariff,
        prior_id: TariffId,
        contracts: &ContractStore,
    ) -> EngineResult<TariffId> {
        new_version.escalation.validate()?;
        self.chain.supersede(ctx, new_version, prior_id, contracts)
    }

    /// Fetch any version by row id
    pub fn get(&self, id: TariffId) -> Option<ClauseTariff> {
        self.chain.get(id)
    }

    /// The version of this tariff's group in force on a date
    pub fn version_in_force(
        &self,
        tariff_id: TariffId,
        date: NaiveDate,
    ) -> EngineResult<Option<ClauseTariff>> {
        let row = self
            .chain
            .get(tariff_id)
            .ok_or_else(|| EngineError::not_found("ClauseTariff", tariff_id))?;
        self.chain.as_of(row.contract_id, &row.identity_key(), date)
    }

    /// The current tariff for (contract, group key) valid in `month`
    pub fn current_by_group(
        &self,
        contract: ContractId,
        group_key: &str,
        month: BillingMonth,
    ) -> Option<ClauseTariff> {
        let day = month.first_day();
        self.chain
            .for_contract(contract)
            .into_iter()
            .find(|t| {
                t.is_current
                    && t.tariff_group_key == group_key
                    && t.valid_from.map_or(true, |f| f <= day)
                    && t.valid_to.map_or(true, |to| day <= to)
            })
    }
}

/// Which bound was binding when a monthly rate was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBinding {
    /// The contractual floor bound the rate
    Floor,
    /// The contractual ceiling bound the rate
    Ceiling,
    /// The discounted reference price was within bounds
    Discounted,
}

/// Where a year's authoritative `final_effective_tariff` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Deterministic annual escalation
    AnnualEscalation,
    /// Latest monthly market rebase
    MonthlyRebase,
}

/// The escalated rate for one contract year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffAnnualRate {
    /// Row id
    pub id: AnnualRateId,
    /// The tariff this rate belongs to
    pub clause_tariff_id: TariffId,
    /// 1-based contract year
    pub contract_year: u32,
    /// The escalated annual rate (a reference point for rebased tariffs)
    pub annual_rate: Decimal,
    /// The authoritative rate for the year
    pub final_effective_tariff: Decimal,
    /// Where the authoritative rate came from
    pub final_source: RateSource,
    /// Whether this is the latest resolved year for the tariff
    pub is_current: bool,
    /// When the row was last resolved
    pub resolved_at: DateTime<Utc>,
}

/// The bounded market-rebased rate for one billing month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffMonthlyRate {
    /// Row id
    pub id: MonthlyRateId,
    /// Parent annual-rate row
    pub tariff_annual_rate_id: AnnualRateId,
    /// The billing month
    pub billing_month: BillingMonth,
    /// The reference observation used
    pub reference_price_id: ReferencePriceId,
    /// Reference price after discount
    pub discounted_reference: Decimal,
    /// Contractual floor in local currency
    pub floor_local: Decimal,
    /// Contractual ceiling in local currency
    pub ceiling_local: Decimal,
    /// FX rate used to convert the bounds, when conversion was needed
    pub fx_rate_used: Option<Decimal>,
    /// The bounded effective rate in local currency
    pub effective_tariff_local: Decimal,
    /// Which bound was binding
    pub rate_binding: RateBinding,
    /// Whether this is the latest resolved month for the annual rate
    pub is_current: bool,
    /// When the row was last resolved
    pub resolved_at: DateTime<Utc>,
}

/// Inputs for a monthly-rate upsert (see [`RateLedger::upsert_monthly`])
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRateInputs {
    /// The reference observation used
    pub reference_price_id: ReferencePriceId,
    /// Reference price after discount
    pub discounted_reference: Decimal,
    /// Floor in local currency
    pub floor_local: Decimal,
    /// Ceiling in local currency
    pub ceiling_local: Decimal,
    /// FX rate used, when conversion was needed
    pub fx_rate_used: Option<Decimal>,
    /// Bounded effective rate
    pub effective_tariff_local: Decimal,
    /// Binding bound
    pub rate_binding: RateBinding,
}

/// Store of resolved annual and monthly rates
///
/// Upserts are idempotent per natural key — (tariff, contract year) for
/// annual rows, (annual row, billing month) for monthly rows — so a nightly
/// re-run never creates duplicates. Rows for past months are never deleted;
/// only the `is_current` flag moves.
#[derive(Debug, Default)]
pub struct RateLedger {
    annual: RwLock<IndexMap<AnnualRateId, TariffAnnualRate>>,
    monthly: RwLock<IndexMap<MonthlyRateId, TariffMonthlyRate>>,
}

impl RateLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the annual row for (tariff, contract year)
    ///
    /// Marks the row current and any other year of the same tariff
    /// non-current. An existing row keeps its id; the final tariff is only
    /// reset when the annual rate actually changed.
    pub fn upsert_annual(
        &self,
        ctx: &OperationContext,
        tariff: TariffId,
        contract_year: u32,
        annual_rate: Decimal,
    ) -> TariffAnnualRate {
        let mut annual = self.annual.write().expect("rate ledger lock poisoned");
        let existing_id = annual
            .values()
            .find(|r| r.clause_tariff_id == tariff && r.contract_year == contract_year)
            .map(|r| r.id);
        let id = match existing_id {
            Some(id) => {
                let row = annual.get_mut(&id).expect("looked up above");
                if row.annual_rate != annual_rate {
                    row.annual_rate = annual_rate;
                    row.final_effective_tariff = annual_rate;
                    row.final_source = RateSource::AnnualEscalation;
                    row.resolved_at = ctx.requested_at;
                }
                id
            }
            None => {
                let row = TariffAnnualRate {
                    id: AnnualRateId::new(),
                    clause_tariff_id: tariff,
                    contract_year,
                    annual_rate,
                    final_effective_tariff: annual_rate,
                    final_source: RateSource::AnnualEscalation,
                    is_current: true,
                    resolved_at: ctx.requested_at,
                };
                let id = row.id;
                annual.insert(id, row);
                id
            }
        };
        for row in annual.values_mut() {
            if row.clause_tariff_id == tariff {
                row.is_current = row.id == id;
            }
        }
        annual.get(&id).expect("just upserted").clone()
    }

    /// Record the authoritative rate for a year after a monthly rebase
    pub fn set_final_tariff(
        &self,
        annual_rate_id: AnnualRateId,
        value: Decimal,
        source: RateSource,
    ) -> EngineResult<()> {
        let mut annual = self.annual.write().expect("rate ledger lock poisoned");
        let row = annual
            .get_mut(&annual_rate_id)
            .ok_or_else(|| EngineError::not_found("TariffAnnualRate", annual_rate_id))?;
        row.final_effective_tariff = value;
        row.final_source = source;
        Ok(())
    }

    /// Upsert the monthly row for (annual row, billing month)
    ///
    /// Re-running with unchanged inputs returns the existing row untouched;
    /// changed inputs update it in place and bump `resolved_at`. The row
    /// becomes the annual rate's single current month.
    pub fn upsert_monthly(
        &self,
        ctx: &OperationContext,
        annual_rate_id: AnnualRateId,
        billing_month: BillingMonth,
        inputs: MonthlyRateInputs,
    ) -> TariffMonthlyRate {
        let mut monthly = self.monthly.write().expect("rate ledger lock poisoned");
        let existing_id = monthly
            .values()
            .find(|r| r.tariff_annual_rate_id == annual_rate_id && r.billing_month == billing_month)
            .map(|r| r.id);
        let id = match existing_id {
            Some(id) => {
                let row = monthly.get_mut(&id).expect("looked up above");
                let unchanged = row.reference_price_id == inputs.reference_price_id
                    && row.discounted_reference == inputs.discounted_reference
                    && row.floor_local == inputs.floor_local
                    && row.ceiling_local == inputs.ceiling_local
                    && row.effective_tariff_local == inputs.effective_tariff_local;
                if !unchanged {
                    row.reference_price_id = inputs.reference_price_id;
                    row.discounted_reference = inputs.discounted_reference;
                    row.floor_local = inputs.floor_local;
                    row.ceiling_local = inputs.ceiling_local;
                    row.fx_rate_used = inputs.fx_rate_used;
                    row.effective_tariff_local = inputs.effective_tariff_local;
                    row.rate_binding = inputs.rate_binding;
                    row.resolved_at = ctx.requested_at;
                }
                id
            }
            None => {
                let row = TariffMonthlyRate {
                    id: MonthlyRateId::new(),
                    tariff_annual_rate_id: annual_rate_id,
                    billing_month,
                    reference_price_id: inputs.reference_price_id,
                    discounted_reference: inputs.discounted_reference,
                    floor_local: inputs.floor_local,
                    ceiling_local: inputs.ceiling_local,
                    fx_rate_used: inputs.fx_rate_used,
                    effective_tariff_local: inputs.effective_tariff_local,
                    rate_binding: inputs.rate_binding,
                    is_current: true,
                    resolved_at: ctx.requested_at,
                };
                let id = row.id;
                monthly.insert(id, row);
                id
            }
        };
        // the latest resolved month is the annual rate's single current row
        let latest = monthly
            .values()
            .filter(|r| r.tariff_annual_rate_id == annual_rate_id)
            .map(|r| r.billing_month)
            .max()
            .expect("at least the upserted row");
        for row in monthly.values_mut() {
            if row.tariff_annual_rate_id == annual_rate_id {
                row.is_current = row.billing_month == latest;
            }
        }
        monthly.get(&id).expect("just upserted").clone()
    }

    /// The annual row for (tariff, contract year)
    pub fn annual_for(&self, tariff: TariffId, contract_year: u32) -> Option<TariffAnnualRate> {
        self.annual
            .read()
            .expect("rate ledger lock poisoned")
            .values()
            .find(|r| r.clause_tariff_id == tariff && r.contract_year == contract_year)
            .cloned()
    }

    /// The monthly row for (annual row, billing month)
    pub fn monthly_for(
        &self,
        annual_rate_id: AnnualRateId,
        month: BillingMonth,
    ) -> Option<TariffMonthlyRate> {
        self.monthly
            .read()
            .expect("rate ledger lock poisoned")
            .values()
            .find(|r| r.tariff_annual_rate_id == annual_rate_id && r.billing_month == month)
            .cloned()
    }

    /// All monthly rows for an annual rate, in insertion order
    pub fn monthly_rows(&self, annual_rate_id: AnnualRateId) -> Vec<TariffMonthlyRate> {
        self.monthly
            .read()
            .expect("rate ledger lock poisoned")
            .values()
            .filter(|r| r.tariff_annual_rate_id == annual_rate_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use crate::identifiers::OrgId;
    use rust_decimal_macros::dec;

    fn ctx() -> OperationContext {
        OperationContext::new(Principal::named("resolver"), OrgId::new())
    }

    fn kes() -> CurrencyCode {
        CurrencyCode::new("KES").unwrap()
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    #[test]
    fn test_floor_above_ceiling_rejected_at_write_time() {
        let escalation = EscalationType::RebasedMarketPrice {
            discount_pct: dec!(10),
            floor: Money::new(dec!(0.50), usd()),
            ceiling: Money::new(dec!(0.40), usd()),
            observation_type: ObservationType::GridReferencePrice,
        };
        let err = ClauseTariff::new(
            ContractId::new(),
            "energy-base",
            dec!(0.10),
            TariffUnit::PerKwh,
            kes(),
            TariffStructure::Grid,
            EnergySaleType::NetExport,
            escalation,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        )
        .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_sign_flipping_escalation_rejected() {
        let err = EscalationType::Percentage {
            annual_pct: dec!(-100),
        }
        .validate()
        .unwrap_err();
        assert!(err.is_validation_error());
        assert!(EscalationType::UsCpi {
            assumed_annual_pct: dec!(-150)
        }
        .validate()
        .is_err());
        assert!(EscalationType::FixedDecrease {
            annual_pct: dec!(100)
        }
        .validate()
        .is_err());

        assert!(EscalationType::Percentage {
            annual_pct: dec!(-5)
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_mismatched_bound_currencies_rejected() {
        let escalation = EscalationType::RebasedMarketPrice {
            discount_pct: dec!(10),
            floor: Money::new(dec!(0.40), usd()),
            ceiling: Money::new(dec!(0.50), kes()),
            observation_type: ObservationType::GridReferencePrice,
        };
        assert!(escalation.validate().is_err());
    }

    #[test]
    fn test_annual_upsert_idempotent_and_single_current() {
        let ledger = RateLedger::new();
        let tariff = TariffId::new();

        let year1 = ledger.upsert_annual(&ctx(), tariff, 1, dec!(0.10));
        assert!(year1.is_current);

        let year2 = ledger.upsert_annual(&ctx(), tariff, 2, dec!(0.1025));
        assert!(year2.is_current);
        assert!(!ledger.annual_for(tariff, 1).unwrap().is_current);

        // re-running year 2 keeps the same row
        let again = ledger.upsert_annual(&ctx(), tariff, 2, dec!(0.1025));
        assert_eq!(again.id, year2.id);
    }

    #[test]
    fn test_monthly_upsert_idempotent() {
        let ledger = RateLedger::new();
        let tariff = TariffId::new();
        let annual = ledger.upsert_annual(&ctx(), tariff, 1, dec!(0.10));
        let month = BillingMonth::new(2025, 3).unwrap();
        let inputs = MonthlyRateInputs {
            reference_price_id: ReferencePriceId::new(),
            discounted_reference: dec!(0.50),
            floor_local: dec!(0.40),
            ceiling_local: dec!(0.45),
            fx_rate_used: Some(dec!(130)),
            effective_tariff_local: dec!(0.45),
            rate_binding: RateBinding::Ceiling,
        };

        let first = ledger.upsert_monthly(&ctx(), annual.id, month, inputs.clone());
        let second = ledger.upsert_monthly(&ctx(), annual.id, month, inputs);
        assert_eq!(first.id, second.id);
        assert_eq!(first.resolved_at, second.resolved_at);
        assert_eq!(ledger.monthly_rows(annual.id).len(), 1);
    }

    #[test]
    fn test_latest_month_is_current() {
        let ledger = RateLedger::new();
        let tariff = TariffId::new();
        let annual = ledger.upsert_annual(&ctx(), tariff, 1, dec!(0.10));
        let inputs = |eff: Decimal| MonthlyRateInputs {
            reference_price_id: ReferencePriceId::new(),
            discounted_reference: eff,
            floor_local: dec!(0.10),
            ceiling_local: dec!(1.00),
            fx_rate_used: None,
            effective_tariff_local: eff,
            rate_binding: RateBinding::Discounted,
        };

        let jan = ledger.upsert_monthly(
            &ctx(),
            annual.id,
            BillingMonth::new(2025, 1).unwrap(),
            inputs(dec!(0.50)),
        );
        let feb = ledger.upsert_monthly(
            &ctx(),
            annual.id,
            BillingMonth::new(2025, 2).unwrap(),
            inputs(dec!(0.55)),
        );
        assert!(feb.is_current);
        assert!(!ledger
            .monthly_for(annual.id, jan.billing_month)
            .unwrap()
            .is_current);

        // re-resolving January must not steal currency from February
        let jan_again = ledger.upsert_monthly(
            &ctx(),
            annual.id,
            BillingMonth::new(2025, 1).unwrap(),
            inputs(dec!(0.52)),
        );
        assert!(!jan_again.is_current);
        assert!(ledger
            .monthly_for(annual.id, feb.billing_month)
            .unwrap()
            .is_current);
    }
}
