//! # PPA Obligation & Settlement Engine
//!
//! Core domain logic for power-purchase-agreement compliance: detecting
//! contractual breaches from operational data, computing their financial
//! consequences, and reconciling invoices against contractually-derived
//! expectations.
//!
//! ## Architecture
//!
//! The engine is built from four tightly coupled parts:
//!
//! - **Amendment version chain** ([`versioning`]) — clauses and tariffs are
//!   append-only version chains with a `supersedes` back-pointer and a
//!   single-current-row invariant per (contract, identity key), so the
//!   obligation or price in force at any past date is never lost.
//! - **Obligation graph** ([`graph`], [`relationship`]) — typed edges
//!   between clauses (TRIGGERS, EXCUSES, GOVERNS, INPUTS) with provenance
//!   and confidence; answers "what excuses this obligation" and "what does
//!   breaching it trigger".
//! - **Tariff resolver** ([`resolver`], [`tariff`]) — computes the
//!   authoritative per-unit price for any billing month, handling annual
//!   escalation and, for market-referenced tariffs, monthly FX-bounded
//!   rebasing against a grid reference price.
//! - **Breach pipeline and reconciliation** ([`breach`], [`reconciliation`])
//!   — raw events become default events, rule outputs, invoice adjustments,
//!   and finally variance classifications against received invoices.
//!
//! Missing market data (FX rates, reference prices) is a typed pending
//! outcome, never an error and never a silent zero; consequences the
//! pipeline cannot price are flagged for review, since under-billing is the
//! unsafe failure direction.
//!
//! ## Usage
//!
//! ```rust
//! use ppa_settlement::{
//!     BillingMonth, ClauseTariff, CurrencyCode, EngineConfig, EnergySaleType,
//!     EscalationType, ExchangeRateStore, OperationContext, OrgId, Principal,
//!     RateLedger, RateOutcome, ReferencePriceStore, TariffResolver, TariffStore,
//!     TariffStructure, TariffUnit,
//! };
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//!
//! # fn main() -> Result<(), ppa_settlement::EngineError> {
//! let ctx = OperationContext::new(Principal::named("billing"), OrgId::new());
//! let tariffs = TariffStore::new();
//! let ledger = RateLedger::new();
//! let reference_prices = ReferencePriceStore::new();
//! let fx = ExchangeRateStore::new();
//! let config = EngineConfig::default();
//!
//! let tariff = ClauseTariff::new(
//!     ppa_settlement::ContractId::new(),
//!     "energy-base",
//!     dec!(0.10),
//!     TariffUnit::PerKwh,
//!     CurrencyCode::new("KES")?,
//!     TariffStructure::Fixed,
//!     EnergySaleType::NetExport,
//!     EscalationType::FixedIncrease { annual_pct: dec!(2.5) },
//!     NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
//! )?;
//! let tariff_id = tariffs.insert(&ctx, tariff)?;
//!
//! let resolver = TariffResolver::new(&tariffs, &ledger, &reference_prices, &fx, &config);
//! let outcome = resolver.resolve_rate(&ctx, tariff_id, BillingMonth::new(2025, 6)?)?;
//! if let RateOutcome::Resolved(rate) = outcome {
//!     assert_eq!(rate.rate, dec!(0.105063));
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod breach;
pub mod clause;
pub mod config;
pub mod context;
pub mod contract;
pub mod entity;
pub mod errors;
pub mod fx;
pub mod graph;
pub mod identifiers;
pub mod money;
pub mod period;
pub mod reconciliation;
pub mod reference_price;
pub mod relationship;
pub mod resolver;
pub mod state_machine;
pub mod tariff;
pub mod versioning;

pub use breach::{
    BreachFinding, BreachPipeline, Disposition, EvaluationOutcome, ObligationMeasurement,
    RuleOutput, RuleOutputStore,
};
pub use clause::{
    Clause, ClauseCategory, ClauseStore, ComparisonOp, Confidence, EvaluationPeriod, LdTerms,
    MetricKind, NormalizedPayload, ObligationTerms, PartyRef,
};
pub use config::EngineConfig;
pub use context::{OperationContext, Principal};
pub use contract::{Contract, ContractStore};
pub use entity::EntityId;
pub use errors::{EngineError, EngineResult};
pub use fx::{ExchangeRateStore, FxFallback, FxRate};
pub use graph::{ExcuseEdge, ObligationGraph, TriggerEdge};
pub use identifiers::{
    AmendmentId, AnnualRateId, ClauseId, ComparisonId, ContractId, DefaultEventId, EdgeId,
    EventId, InvoiceId, MonthlyRateId, OrgId, PartyId, ProjectId, ReferencePriceId, RuleOutputId,
    TariffId,
};
pub use money::{CurrencyCode, Money};
pub use period::{BillingMonth, TimeWindow};
pub use reconciliation::{
    ComparisonStore, ExpectedInvoice, ExpectedInvoiceOutcome, InvoiceComparison,
    InvoiceComparisonLineItem, InvoiceLine, ReceivedInvoice, ReconciliationEngine,
    ReconciliationStatus, UsageLine,
};
pub use reference_price::{
    derive_grp, ObservationType, PriceGranularity, ReferencePrice, ReferencePriceStore,
};
pub use relationship::{ClauseRelationship, EdgeProvenance, InferenceSource, RelationshipKind};
pub use resolver::{PendingReason, RateBasis, RateOutcome, ResolvedRate, TariffResolver};
pub use state_machine::{
    DefaultEvent, DefaultEventStore, DefaultStatus, Event, EventKind, EventStore,
};
pub use tariff::{
    ClauseTariff, EnergySaleType, EscalationType, RateBinding, RateLedger, RateSource,
    TariffAnnualRate, TariffMonthlyRate, TariffStore, TariffStructure, TariffUnit,
};
pub use versioning::{AmendmentStore, ContractAmendment, VersionChain, VersionedRecord};
