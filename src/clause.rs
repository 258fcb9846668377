//! Contractual clauses and their normalized payloads
//!
//! A clause is one obligation or provision of a contract. The original
//! documents carry free text; an external extraction collaborator produces
//! the machine-readable parameters, which this module models as a tagged
//! sum type per category rather than an untyped map — a payload that does
//! not fit its category is rejected at the boundary.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::OperationContext;
use crate::contract::ContractStore;
use crate::entity::EntityId;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{AmendmentId, ClauseId, ClauseMarker, ContractId, PartyId};
use crate::money::CurrencyCode;
use crate::versioning::{VersionChain, VersionedRecord};

/// The thirteen fixed clause categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClauseCategory {
    /// Conditions precedent to commercial operation
    ConditionsPrecedent,
    /// Plant availability guarantees
    Availability,
    /// Performance-ratio / output guarantees
    PerformanceGuarantee,
    /// Liquidated-damages provisions
    LiquidatedDamages,
    /// Tariff and pricing provisions
    Pricing,
    /// Invoicing and payment terms
    PaymentTerms,
    /// Events of default
    Default,
    /// Force majeure
    ForceMajeure,
    /// Termination rights
    Termination,
    /// Scheduled and corrective maintenance
    Maintenance,
    /// Regulatory and permit compliance
    Compliance,
    /// Security package (guarantees, letters of credit)
    SecurityPackage,
    /// Everything else
    General,
}

impl ClauseCategory {
    /// Whether clauses of this category carry a measurable obligation
    pub fn is_obligation(&self) -> bool {
        matches!(
            self,
            ClauseCategory::Availability | ClauseCategory::PerformanceGuarantee
        )
    }

    /// Whether clauses of this category can act as an excuse condition
    pub fn is_excusing(&self) -> bool {
        matches!(
            self,
            ClauseCategory::ForceMajeure | ClauseCategory::Maintenance
        )
    }
}

impl fmt::Display for ClauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClauseCategory::ConditionsPrecedent => "CONDITIONS_PRECEDENT",
            ClauseCategory::Availability => "AVAILABILITY",
            ClauseCategory::PerformanceGuarantee => "PERFORMANCE_GUARANTEE",
            ClauseCategory::LiquidatedDamages => "LIQUIDATED_DAMAGES",
            ClauseCategory::Pricing => "PRICING",
            ClauseCategory::PaymentTerms => "PAYMENT_TERMS",
            ClauseCategory::Default => "DEFAULT",
            ClauseCategory::ForceMajeure => "FORCE_MAJEURE",
            ClauseCategory::Termination => "TERMINATION",
            ClauseCategory::Maintenance => "MAINTENANCE",
            ClauseCategory::Compliance => "COMPLIANCE",
            ClauseCategory::SecurityPackage => "SECURITY_PACKAGE",
            ClauseCategory::General => "GENERAL",
        };
        write!(f, "{name}")
    }
}

/// Comparison operator in an obligation ("availability >= 95")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    /// Observed must be at least the threshold
    Gte,
    /// Observed must exceed the threshold
    Gt,
    /// Observed must be at most the threshold
    Lte,
    /// Observed must be below the threshold
    Lt,
    /// Observed must equal the threshold
    Eq,
}

impl ComparisonOp {
    /// Whether `observed <op> threshold` holds (the obligation is met)
    pub fn holds(&self, observed: Decimal, threshold: Decimal) -> bool {
        match self {
            ComparisonOp::Gte => observed >= threshold,
            ComparisonOp::Gt => observed > threshold,
            ComparisonOp::Lte => observed <= threshold,
            ComparisonOp::Lt => observed < threshold,
            ComparisonOp::Eq => observed == threshold,
        }
    }

    /// How far the observed value fell on the wrong side of the threshold
    /// (always non-negative; zero when the obligation holds)
    pub fn shortfall(&self, observed: Decimal, threshold: Decimal) -> Decimal {
        if self.holds(observed, threshold) {
            return Decimal::ZERO;
        }
        match self {
            ComparisonOp::Gte | ComparisonOp::Gt => threshold - observed,
            ComparisonOp::Lte | ComparisonOp::Lt => observed - threshold,
            ComparisonOp::Eq => (observed - threshold).abs(),
        }
    }
}

/// The metric an obligation is measured on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Availability percentage over the evaluation period
    AvailabilityPct,
    /// Performance ratio (actual vs expected yield)
    PerformanceRatio,
    /// Energy delivered over the period, in kWh
    EnergyDeliveredKwh,
    /// A metric the engine does not model natively
    Custom(String),
}

/// How often an obligation is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPeriod {
    /// Once per billing month
    Monthly,
    /// Once per quarter
    Quarterly,
    /// Once per contract year
    Annual,
}

/// Machine-readable parameters of a measurable obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationTerms {
    /// The metric measured
    pub metric: MetricKind,
    /// The contractual threshold
    pub threshold: Decimal,
    /// How observed relates to the threshold when the obligation is met
    pub comparison: ComparisonOp,
    /// Evaluation cadence
    pub evaluation_period: EvaluationPeriod,
}

/// Machine-readable parameters of a liquidated-damages provision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdTerms {
    /// LD amount per point of shortfall
    pub ld_per_point: Decimal,
    /// Annual cap on LD payable under this clause, if any
    pub ld_cap_annual: Option<Decimal>,
    /// Days the defaulting party has to cure before consequences crystallize
    pub cure_period_days: u32,
    /// Currency LD amounts are denominated in
    pub currency: CurrencyCode,
    /// Tariff group used to price any associated invoice adjustment
    pub priced_tariff_group: Option<String>,
}

/// The normalized payload: one variant per parameter shape
///
/// Categories without machine parameters use [`NormalizedPayload::General`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedPayload {
    /// A measurable obligation (availability, performance guarantee)
    Obligation(ObligationTerms),
    /// Liquidated-damages parameters
    LiquidatedDamages(LdTerms),
    /// An excusing condition (force majeure, scheduled maintenance)
    ExcuseCondition {
        /// Notice period the excused party must give, if stipulated
        notice_days: Option<u32>,
    },
    /// A priced line item, linking the clause to a tariff group
    Pricing {
        /// Key of the tariff group this clause prices
        tariff_group_key: String,
    },
    /// Invoicing terms
    PaymentTerms {
        /// Days until an invoice falls due
        due_days: u32,
        /// Late-payment interest, percent per annum
        late_interest_pct: Option<Decimal>,
    },
    /// No machine-readable parameters
    General {
        /// Optional extracted summary
        summary: Option<String>,
    },
}

impl NormalizedPayload {
    /// Whether this payload shape is permitted on a clause of `category`
    pub fn permitted_for(&self, category: ClauseCategory) -> bool {
        match self {
            NormalizedPayload::Obligation(_) => category.is_obligation(),
            NormalizedPayload::LiquidatedDamages(_) => {
                category == ClauseCategory::LiquidatedDamages
            }
            NormalizedPayload::ExcuseCondition { .. } => category.is_excusing(),
            NormalizedPayload::Pricing { .. } => category == ClauseCategory::Pricing,
            NormalizedPayload::PaymentTerms { .. } => category == ClauseCategory::PaymentTerms,
            NormalizedPayload::General { .. } => true,
        }
    }

    /// The obligation terms, if this is an obligation payload
    pub fn obligation_terms(&self) -> Option<&ObligationTerms> {
        match self {
            NormalizedPayload::Obligation(terms) => Some(terms),
            _ => None,
        }
    }

    /// The LD terms, if this is a liquidated-damages payload
    pub fn ld_terms(&self) -> Option<&LdTerms> {
        match self {
            NormalizedPayload::LiquidatedDamages(terms) => Some(terms),
            _ => None,
        }
    }
}

/// A confidence score in [0, 1]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Confidence(Decimal);

impl Confidence {
    /// Create a confidence score, validating the [0, 1] range
    pub fn new(value: Decimal) -> EngineResult<Self> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(EngineError::Validation(format!(
                "confidence must be within [0, 1], got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Full confidence (1.0)
    pub fn certain() -> Self {
        Self(Decimal::ONE)
    }

    /// The underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a contract party in a specific role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyRef {
    /// The party's id
    pub party_id: PartyId,
    /// Display name, when known
    pub name: Option<String>,
}

/// A contractual clause (one version of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Clause row id
    pub id: ClauseId,
    /// Owning contract
    pub contract_id: ContractId,
    /// Category
    pub category: ClauseCategory,
    /// Section reference in the contract document ("12.3(b)")
    pub section_ref: String,
    /// Short title, when extracted
    pub title: Option<String>,
    /// Machine-readable parameters
    pub payload: NormalizedPayload,
    /// Party bearing the obligation
    pub responsible_party: Option<PartyRef>,
    /// Party benefiting from it
    pub beneficiary_party: Option<PartyRef>,
    /// Extraction confidence
    pub confidence: Confidence,
    /// Effective from (inclusive), if bounded
    pub valid_from: Option<NaiveDate>,
    /// Effective to (inclusive), if bounded
    pub valid_to: Option<NaiveDate>,
    /// Whether this is the current version
    pub is_current: bool,
    /// The clause row this version superseded
    pub supersedes_clause_id: Option<ClauseId>,
    /// The amendment that introduced this version
    pub contract_amendment_id: Option<AmendmentId>,
    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl Clause {
    /// Create the first version of a clause, validating the payload shape
    pub fn new(
        contract_id: ContractId,
        category: ClauseCategory,
        section_ref: impl Into<String>,
        payload: NormalizedPayload,
        confidence: Confidence,
    ) -> EngineResult<Self> {
        if !payload.permitted_for(category) {
            return Err(EngineError::DataQuality {
                entity: "Clause".to_string(),
                reason: format!("payload shape not permitted for category {category}"),
            });
        }
        Ok(Self {
            id: ClauseId::new(),
            contract_id,
            category,
            section_ref: section_ref.into(),
            title: None,
            payload,
            responsible_party: None,
            beneficiary_party: None,
            confidence,
            valid_from: None,
            valid_to: None,
            is_current: true,
            supersedes_clause_id: None,
            contract_amendment_id: None,
            created_at: Utc::now(),
        })
    }

    /// Set the clause title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the responsible and beneficiary parties
    pub fn with_parties(mut self, responsible: PartyRef, beneficiary: PartyRef) -> Self {
        self.responsible_party = Some(responsible);
        self.beneficiary_party = Some(beneficiary);
        self
    }

    /// Bound the effective window
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

    /// A successor version of this clause, sharing the identity key
    ///
    /// The caller passes the result to [`ClauseStore::amend`]; the version
    /// chain links the supersede pointer itself.
    pub fn next_version(&self, payload: NormalizedPayload) -> EngineResult<Clause> {
        let mut next = Clause::new(
            self.contract_id,
            self.category,
            self.section_ref.clone(),
            payload,
            self.confidence,
        )?;
        next.title = self.title.clone();
        next.responsible_party = self.responsible_party.clone();
        next.beneficiary_party = self.beneficiary_party.clone();
        Ok(next)
    }
}

impl VersionedRecord for Clause {
    type Marker = ClauseMarker;

    fn entity_name() -> &'static str {
        "Clause"
    }

    fn record_id(&self) -> EntityId<Self::Marker> {
        self.id
    }

    fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    fn identity_key(&self) -> String {
        format!("{}#{}", self.category, self.section_ref)
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
        self.supersedes_clause_id
    }

    fn set_supersedes(&mut self, prior: Option<EntityId<Self::Marker>>) {
        self.supersedes_clause_id = prior;
    }

    fn amendment_id(&self) -> Option<AmendmentId> {
        self.contract_amendment_id
    }
}

/// Clause store: a version chain with clause-shaped lookups
#[derive(Debug, Default)]
pub struct ClauseStore {
    chain: VersionChain<Clause>,
}

impl ClauseStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the first version of a clause
    pub fn insert(&self, _ctx: &OperationContext, clause: Clause) -> EngineResult<ClauseId> {
        self.chain.insert_initial(clause)
    }

    /// Supersede `prior_id` with a new clause version
    pub fn amend(
        &self,
        ctx: &OperationContext,
        new_version: Clause,
        prior_id: ClauseId,
        contracts: &ContractStore,
    ) -> EngineResult<ClauseId> {
        self.chain.supersede(ctx, new_version, prior_id, contracts)
    }

    /// Fetch any version by row id
    pub fn get(&self, id: ClauseId) -> Option<Clause> {
        self.chain.get(id)
    }

    /// The current version for (contract, category, section-ref)
    pub fn current(
        &self,
        contract: ContractId,
        category: ClauseCategory,
        section_ref: &str,
    ) -> Option<Clause> {
        self.chain
            .current(contract, &format!("{category}#{section_ref}"))
    }

    /// The version in force on a date
    pub fn as_of(
        &self,
        contract: ContractId,
        category: ClauseCategory,
        section_ref: &str,
        date: NaiveDate,
    ) -> EngineResult<Option<Clause>> {
        self.chain
            .as_of(contract, &format!("{category}#{section_ref}"), date)
    }

    /// All clause rows for a contract
    pub fn for_contract(&self, contract: ContractId) -> Vec<Clause> {
        self.chain.for_contract(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn availability_payload() -> NormalizedPayload {
        NormalizedPayload::Obligation(ObligationTerms {
            metric: MetricKind::AvailabilityPct,
            threshold: dec!(95),
            comparison: ComparisonOp::Gte,
            evaluation_period: EvaluationPeriod::Monthly,
        })
    }

    #[test]
    fn test_payload_category_compatibility() {
        let contract = ContractId::new();
        // obligation payload on an availability clause: fine
        assert!(Clause::new(
            contract,
            ClauseCategory::Availability,
            "4.1",
            availability_payload(),
            Confidence::certain(),
        )
        .is_ok());

        // obligation payload on a termination clause: rejected
        let err = Clause::new(
            contract,
            ClauseCategory::Termination,
            "15.2",
            availability_payload(),
            Confidence::certain(),
        )
        .unwrap_err();
        assert!(err.is_validation_error());

        // general payload is permitted anywhere
        assert!(Clause::new(
            contract,
            ClauseCategory::Termination,
            "15.2",
            NormalizedPayload::General { summary: None },
            Confidence::certain(),
        )
        .is_ok());
    }

    #[test]
    fn test_comparison_holds_and_shortfall() {
        assert!(ComparisonOp::Gte.holds(dec!(95), dec!(95)));
        assert!(!ComparisonOp::Gt.holds(dec!(95), dec!(95)));
        assert!(ComparisonOp::Lte.holds(dec!(3), dec!(5)));

        assert_eq!(ComparisonOp::Gte.shortfall(dec!(92.5), dec!(95)), dec!(2.5));
        assert_eq!(ComparisonOp::Gte.shortfall(dec!(97), dec!(95)), dec!(0));
        assert_eq!(ComparisonOp::Lte.shortfall(dec!(7), dec!(5)), dec!(2));
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(Confidence::new(dec!(0.8)).is_ok());
        assert!(Confidence::new(dec!(1.2)).is_err());
        assert!(Confidence::new(dec!(-0.1)).is_err());
        assert!(Confidence::new(dec!(0.9)).unwrap() > Confidence::new(dec!(0.8)).unwrap());
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&ClauseCategory::ForceMajeure).unwrap();
        assert_eq!(json, "\"FORCE_MAJEURE\"");
        let back: ClauseCategory = serde_json::from_str("\"LIQUIDATED_DAMAGES\"").unwrap();
        assert_eq!(back, ClauseCategory::LiquidatedDamages);
    }

    #[test]
    fn test_identity_key_includes_category_and_section() {
        let clause = Clause::new(
            ContractId::new(),
            ClauseCategory::Availability,
            "4.1",
            availability_payload(),
            Confidence::certain(),
        )
        .unwrap();
        assert_eq!(clause.identity_key(), "AVAILABILITY#4.1");
    }
}
