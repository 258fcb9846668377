//! Marker types and ID aliases for every record kind in the engine

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Marker for organizations (the tenant owning contracts and FX rates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationMarker;

/// Marker for contracts (PPA, O&M, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractMarker;

/// Marker for generation projects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectMarker;

/// Marker for contract parties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyMarker;

/// Marker for contractual clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClauseMarker;

/// Marker for clause-relationship edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipMarker;

/// Marker for contract amendments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmendmentMarker;

/// Marker for clause tariffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TariffMarker;

/// Marker for tariff annual rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnualRateMarker;

/// Marker for tariff monthly rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonthlyRateMarker;

/// Marker for market reference-price observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferencePriceMarker;

/// Marker for raw operational events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMarker;

/// Marker for default (candidate-breach) events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefaultEventMarker;

/// Marker for computed rule outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleOutputMarker;

/// Marker for received invoices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceMarker;

/// Marker for invoice comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComparisonMarker;

/// Organization ID
pub type OrgId = EntityId<OrganizationMarker>;
/// Contract ID
pub type ContractId = EntityId<ContractMarker>;
/// Project ID
pub type ProjectId = EntityId<ProjectMarker>;
/// Party ID
pub type PartyId = EntityId<PartyMarker>;
/// Clause ID
pub type ClauseId = EntityId<ClauseMarker>;
/// Clause-relationship edge ID
pub type EdgeId = EntityId<RelationshipMarker>;
/// Contract-amendment ID
pub type AmendmentId = EntityId<AmendmentMarker>;
/// Clause-tariff ID
pub type TariffId = EntityId<TariffMarker>;
/// Tariff-annual-rate ID
pub type AnnualRateId = EntityId<AnnualRateMarker>;
/// Tariff-monthly-rate ID
pub type MonthlyRateId = EntityId<MonthlyRateMarker>;
/// Reference-price ID
pub type ReferencePriceId = EntityId<ReferencePriceMarker>;
/// Operational-event ID
pub type EventId = EntityId<EventMarker>;
/// Default-event ID
pub type DefaultEventId = EntityId<DefaultEventMarker>;
/// Rule-output ID
pub type RuleOutputId = EntityId<RuleOutputMarker>;
/// Received-invoice ID
pub type InvoiceId = EntityId<InvoiceMarker>;
/// Invoice-comparison ID
pub type ComparisonId = EntityId<ComparisonMarker>;
