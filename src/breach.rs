//! The breach evaluation pipeline
//!
//! Runs once per (contract, clause, evaluation period): measure, compare,
//! excuse-check against the obligation graph, then price the consequence.
//! Every finding is written down — an excused breach keeps its default
//! event and rule output for audit, and a consequence the pipeline cannot
//! price becomes a needs-review output rather than a silent zero, since
//! under-reporting financial exposure is the unsafe direction.

use chrono::Duration;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::clause::{Clause, ClauseCategory, ClauseStore, Confidence, LdTerms};
use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::graph::{ExcuseEdge, ObligationGraph, TriggerEdge};
use crate::identifiers::{
    ClauseId, ContractId, DefaultEventId, EdgeId, EventId, RuleOutputId,
};
use crate::money::Money;
use crate::period::BillingMonth;
use crate::resolver::{RateOutcome, TariffResolver};
use crate::state_machine::{DefaultEventStore, EventStore};
use crate::tariff::TariffStore;

/// How a rule output was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// Liquidated damages computed and ready to invoice
    Priced,
    /// An honored excuse negated the consequence
    Excused,
    /// Consequence could not be priced; flagged for an operator
    NeedsReview {
        /// Why manual review is needed
        reason: String,
    },
    /// Offsetting correction issued after a cure
    Offset,
}

/// The computed financial consequence of a default event against one clause
///
/// Immutable once created. Corrections are new rows (see
/// [`BreachPipeline::offset_for_cure`]), never updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutput {
    /// Rule-output id
    pub id: RuleOutputId,
    /// The default event this output settles
    pub default_event_id: DefaultEventId,
    /// Contract of the breached clause
    pub contract_id: ContractId,
    /// The breached obligation clause
    pub clause_id: ClauseId,
    /// The liquidated-damages clause that was triggered, when one was
    pub ld_clause_id: Option<ClauseId>,
    /// The TRIGGERS edge that was followed
    pub trigger_edge: Option<EdgeId>,
    /// The EXCUSES edge that negated the consequence
    pub excused_by: Option<EdgeId>,
    /// Whether the obligation was breached
    pub breach: bool,
    /// Whether an excuse applies (overrides `breach` for billing, the
    /// finding itself is retained)
    pub excuse: bool,
    /// Shortfall the consequence was computed from
    pub shortfall: Decimal,
    /// Liquidated damages payable (magnitude; offsets are negative)
    pub ld_amount: Option<Money>,
    /// Invoice adjustment magnitude priced via the tariff resolver
    pub invoice_adjustment: Option<Money>,
    /// How the output was settled
    pub disposition: Disposition,
    /// The evaluation period
    pub billing_month: BillingMonth,
    /// When the output was computed
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only store of rule outputs
#[derive(Debug, Default)]
pub struct RuleOutputStore {
    outputs: RwLock<IndexMap<RuleOutputId, RuleOutput>>,
}

impl RuleOutputStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, output: RuleOutput) -> RuleOutputId {
        let id = output.id;
        self.outputs
            .write()
            .expect("rule output store lock poisoned")
            .insert(id, output);
        id
    }

    /// Fetch a rule output by id
    pub fn get(&self, id: RuleOutputId) -> Option<RuleOutput> {
        self.outputs
            .read()
            .expect("rule output store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All outputs settling a default event, in insertion order
    pub fn for_default_event(&self, default_event: DefaultEventId) -> Vec<RuleOutput> {
        self.outputs
            .read()
            .expect("rule output store lock poisoned")
            .values()
            .filter(|o| o.default_event_id == default_event)
            .cloned()
            .collect()
    }

    /// All outputs for a contract and billing month
    pub fn for_contract_month(&self, contract: ContractId, month: BillingMonth) -> Vec<RuleOutput> {
        self.outputs
            .read()
            .expect("rule output store lock poisoned")
            .values()
            .filter(|o| o.contract_id == contract && o.billing_month == month)
            .cloned()
            .collect()
    }

    /// Net LD charged under an LD clause in a calendar year
    ///
    /// Offsetting rows carry negative amounts, so the sum is the remaining
    /// exposure counted against the annual cap.
    pub fn ld_total_in_year(&self, ld_clause: ClauseId, year: i32) -> Decimal {
        self.outputs
            .read()
            .expect("rule output store lock poisoned")
            .values()
            .filter(|o| o.ld_clause_id == Some(ld_clause) && o.billing_month.year() == year)
            .filter_map(|o| o.ld_amount.as_ref().map(|m| m.amount))
            .sum()
    }
}

/// One obligation measurement, supplied by the operational-data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationMeasurement {
    /// The obligation clause being evaluated
    pub clause_id: ClauseId,
    /// The evaluation period
    pub billing_month: BillingMonth,
    /// Observed metric value (e.g. availability percent)
    pub observed: Decimal,
    /// Quantity to price any invoice adjustment over (e.g. kWh lost)
    pub adjustment_quantity: Option<Decimal>,
    /// Raw events behind the measurement
    pub source_events: Vec<EventId>,
}

/// Result of evaluating one obligation for one period
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// The obligation was met; nothing was written
    Compliant {
        /// The evaluated clause
        clause_id: ClauseId,
        /// The observed value
        observed: Decimal,
    },
    /// The obligation was breached; a default event and outputs exist
    Breached(BreachFinding),
}

/// The written record of a breach finding
#[derive(Debug, Clone, PartialEq)]
pub struct BreachFinding {
    /// The default event (queryable even when excused)
    pub default_event_id: DefaultEventId,
    /// Whether an honored excuse applied
    pub excused: bool,
    /// The excuse edge that applied, when one did
    pub excused_by: Option<EdgeId>,
    /// Rule outputs written for this finding
    pub rule_outputs: Vec<RuleOutputId>,
    /// Excuse edges whose condition was active but whose confidence fell
    /// below the honoring threshold; left for human confirmation
    pub unconfirmed_excuses: Vec<EdgeId>,
}

/// The breach-to-consequence pipeline
#[derive(Debug)]
pub struct BreachPipeline<'a> {
    clauses: &'a ClauseStore,
    graph: &'a ObligationGraph,
    events: &'a EventStore,
    defaults: &'a DefaultEventStore,
    outputs: &'a RuleOutputStore,
    resolver: &'a TariffResolver<'a>,
    tariffs: &'a TariffStore,
    excuse_threshold: Confidence,
}

impl<'a> BreachPipeline<'a> {
    /// Build a pipeline over the given stores
    ///
    /// Rejects an invalid configuration up front: an out-of-range excuse
    /// threshold would otherwise change dispositions silently.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clauses: &'a ClauseStore,
        graph: &'a ObligationGraph,
        events: &'a EventStore,
        defaults: &'a DefaultEventStore,
        outputs: &'a RuleOutputStore,
        resolver: &'a TariffResolver<'a>,
        tariffs: &'a TariffStore,
        config: &'a EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let excuse_threshold = Confidence::new(config.excuse_confidence_threshold)?;
        Ok(Self {
            clauses,
            graph,
            events,
            defaults,
            outputs,
            resolver,
            tariffs,
            excuse_threshold,
        })
    }

    /// Evaluate one obligation for one period
    ///
    /// Idempotent per (clause, month): re-running against an existing
    /// default event returns the finding already on record instead of
    /// duplicating it.
    pub fn evaluate(
        &self,
        ctx: &OperationContext,
        measurement: &ObligationMeasurement,
    ) -> EngineResult<EvaluationOutcome> {
        let clause = self
            .clauses
            .get(measurement.clause_id)
            .ok_or_else(|| EngineError::not_found("Clause", measurement.clause_id))?;
        let terms = clause
            .payload
            .obligation_terms()
            .ok_or_else(|| EngineError::DataQuality {
                entity: "Clause".to_string(),
                reason: format!(
                    "clause {} carries no measurable obligation",
                    clause.id
                ),
            })?;

        if terms.comparison.holds(measurement.observed, terms.threshold) {
            return Ok(EvaluationOutcome::Compliant {
                clause_id: clause.id,
                observed: measurement.observed,
            });
        }
        let shortfall = terms
            .comparison
            .shortfall(measurement.observed, terms.threshold);

        if let Some(existing) = self
            .defaults
            .for_clause_month(clause.id, measurement.billing_month)
        {
            let rule_outputs = self.outputs.for_default_event(existing.id);
            if !rule_outputs.is_empty() {
                let excused_by = rule_outputs.iter().find_map(|o| o.excused_by);
                return Ok(EvaluationOutcome::Breached(BreachFinding {
                    default_event_id: existing.id,
                    excused: excused_by.is_some(),
                    excused_by,
                    rule_outputs: rule_outputs.iter().map(|o| o.id).collect(),
                    unconfirmed_excuses: vec![],
                }));
            }
        }

        let triggers = self.ld_triggers(clause.id);
        let cure_days = triggers
            .iter()
            .filter_map(|(_, ld)| ld.payload.ld_terms().map(|t| t.cure_period_days))
            .max()
            .unwrap_or(0);
        let window = measurement.billing_month.utc_window();
        let window_end = window.end.expect("month window is bounded");
        let cure_deadline = window_end + Duration::days(i64::from(cure_days));

        let default_event_id = self.defaults.open(
            ctx,
            clause.contract_id,
            clause.id,
            measurement.billing_month,
            measurement.observed,
            terms.threshold,
            shortfall,
            cure_deadline,
            measurement.source_events.clone(),
        );

        let (applied_excuse, unconfirmed_excuses) = self.check_excuses(clause.id, &window)?;

        let mut rule_outputs = Vec::new();
        if let Some(excuse_edge) = &applied_excuse {
            let ld_currency = triggers
                .iter()
                .find_map(|(_, ld)| ld.payload.ld_terms().map(|t| t.currency.clone()));
            info!(
                default_event = %default_event_id,
                clause = %clause.id,
                excused_by = %excuse_edge.source_clause,
                "breach excused, no liquidated damages apply"
            );
            rule_outputs.push(self.outputs.insert(RuleOutput {
                id: RuleOutputId::new(),
                default_event_id,
                contract_id: clause.contract_id,
                clause_id: clause.id,
                ld_clause_id: None,
                trigger_edge: None,
                excused_by: Some(excuse_edge.edge_id),
                breach: true,
                excuse: true,
                shortfall,
                ld_amount: ld_currency.map(Money::zero),
                invoice_adjustment: None,
                disposition: Disposition::Excused,
                billing_month: measurement.billing_month,
                created_at: ctx.requested_at,
            }));
        } else if triggers.is_empty() {
            warn!(
                default_event = %default_event_id,
                clause = %clause.id,
                "unexcused breach triggers no liquidated-damages clause, flagging for review"
            );
            rule_outputs.push(self.outputs.insert(RuleOutput {
                id: RuleOutputId::new(),
                default_event_id,
                contract_id: clause.contract_id,
                clause_id: clause.id,
                ld_clause_id: None,
                trigger_edge: None,
                excused_by: None,
                breach: true,
                excuse: false,
                shortfall,
                ld_amount: None,
                invoice_adjustment: None,
                disposition: Disposition::NeedsReview {
                    reason: "no liquidated-damages clause triggered".to_string(),
                },
                billing_month: measurement.billing_month,
                created_at: ctx.requested_at,
            }));
        } else {
            for (edge, ld_clause) in &triggers {
                let output = self.price_consequence(
                    ctx,
                    default_event_id,
                    &clause,
                    ld_clause,
                    edge,
                    shortfall,
                    measurement,
                );
                rule_outputs.push(self.outputs.insert(output));
            }
        }

        Ok(EvaluationOutcome::Breached(BreachFinding {
            default_event_id,
            excused: applied_excuse.is_some(),
            excused_by: applied_excuse.map(|e| e.edge_id),
            rule_outputs,
            unconfirmed_excuses,
        }))
    }

    /// Issue offsetting outputs for a cured default event
    ///
    /// Cure never removes an issued output; each priced output gets a new
    /// row with the negated amounts.
    pub fn offset_for_cure(
        &self,
        ctx: &OperationContext,
        default_event_id: DefaultEventId,
    ) -> EngineResult<Vec<RuleOutputId>> {
        let default_event = self
            .defaults
            .get(default_event_id)
            .ok_or_else(|| EngineError::not_found("DefaultEvent", default_event_id))?;
        let mut offsets = Vec::new();
        for prior in self.outputs.for_default_event(default_event_id) {
            if prior.disposition != Disposition::Priced {
                continue;
            }
            offsets.push(self.outputs.insert(RuleOutput {
                id: RuleOutputId::new(),
                default_event_id,
                contract_id: prior.contract_id,
                clause_id: prior.clause_id,
                ld_clause_id: prior.ld_clause_id,
                trigger_edge: prior.trigger_edge,
                excused_by: None,
                breach: true,
                excuse: false,
                shortfall: prior.shortfall,
                ld_amount: prior.ld_amount.as_ref().map(Money::negated),
                invoice_adjustment: prior.invoice_adjustment.as_ref().map(Money::negated),
                disposition: Disposition::Offset,
                billing_month: default_event.billing_month,
                created_at: ctx.requested_at,
            }));
        }
        Ok(offsets)
    }

    /// TRIGGERS edges out of the clause into liquidated-damages clauses
    fn ld_triggers(&self, clause_id: ClauseId) -> Vec<(TriggerEdge, Clause)> {
        let threshold = self.excuse_threshold;
        self.graph
            .triggers_from(clause_id)
            .into_iter()
            .filter(|edge| edge.provenance.honored(threshold))
            .filter_map(|edge| {
                self.clauses
                    .get(edge.target_clause)
                    .filter(|c| c.category == ClauseCategory::LiquidatedDamages)
                    .map(|c| (edge, c))
            })
            .collect()
    }

    /// The applying excuse with the strongest provenance, plus edges whose
    /// condition is active but whose confidence fell below the threshold
    fn check_excuses(
        &self,
        clause_id: ClauseId,
        window: &crate::period::TimeWindow,
    ) -> EngineResult<(Option<ExcuseEdge>, Vec<EdgeId>)> {
        let threshold = self.excuse_threshold;
        let mut applying: Vec<ExcuseEdge> = Vec::new();
        let mut unconfirmed = Vec::new();
        for edge in self.graph.excuses_for(clause_id) {
            let Some(source) = self.clauses.get(edge.source_clause) else {
                continue;
            };
            if !source.category.is_excusing() {
                continue;
            }
            let active = !self.events.active_excusing(source.category, window).is_empty();
            if !active {
                continue;
            }
            if edge.provenance.honored(threshold) {
                applying.push(edge);
            } else {
                unconfirmed.push(edge.edge_id);
            }
        }
        applying.sort_by(|a, b| b.provenance.rank().cmp(&a.provenance.rank()));
        Ok((applying.into_iter().next(), unconfirmed))
    }

    /// Price one triggered LD clause, capped by its annual LD cap
    #[allow(clippy::too_many_arguments)]
    fn price_consequence(
        &self,
        ctx: &OperationContext,
        default_event_id: DefaultEventId,
        clause: &Clause,
        ld_clause: &Clause,
        edge: &TriggerEdge,
        shortfall: Decimal,
        measurement: &ObligationMeasurement,
    ) -> RuleOutput {
        let base = RuleOutput {
            id: RuleOutputId::new(),
            default_event_id,
            contract_id: clause.contract_id,
            clause_id: clause.id,
            ld_clause_id: Some(ld_clause.id),
            trigger_edge: Some(edge.edge_id),
            excused_by: None,
            breach: true,
            excuse: false,
            shortfall,
            ld_amount: None,
            invoice_adjustment: None,
            disposition: Disposition::Priced,
            billing_month: measurement.billing_month,
            created_at: ctx.requested_at,
        };

        let Some(terms) = ld_clause.payload.ld_terms() else {
            warn!(
                ld_clause = %ld_clause.id,
                "triggered liquidated-damages clause has no usable parameters"
            );
            return RuleOutput {
                disposition: Disposition::NeedsReview {
                    reason: format!("missing LD parameters on clause {}", ld_clause.id),
                },
                ..base
            };
        };

        let ld_amount = self.capped_ld(terms, ld_clause.id, shortfall, measurement.billing_month);
        let invoice_adjustment =
            match self.price_adjustment(ctx, clause.contract_id, terms, measurement) {
                Ok(adjustment) => adjustment,
                Err(reason) => {
                    return RuleOutput {
                        ld_amount: Some(ld_amount),
                        disposition: Disposition::NeedsReview { reason },
                        ..base
                    }
                }
            };

        info!(
            clause = %clause.id,
            ld_clause = %ld_clause.id,
            month = %measurement.billing_month,
            ld = %ld_amount,
            "priced breach consequence"
        );
        RuleOutput {
            ld_amount: Some(ld_amount),
            invoice_adjustment,
            ..base
        }
    }

    fn capped_ld(
        &self,
        terms: &LdTerms,
        ld_clause: ClauseId,
        shortfall: Decimal,
        month: BillingMonth,
    ) -> Money {
        let gross = shortfall * terms.ld_per_point;
        let amount = match terms.ld_cap_annual {
            Some(cap) => {
                let already = self.outputs.ld_total_in_year(ld_clause, month.year());
                gross.min((cap - already).max(Decimal::ZERO))
            }
            None => gross,
        };
        Money::new(amount, terms.currency.clone()).rounded()
    }

    /// Price the invoice adjustment via the tariff resolver; an error string
    /// means the output must go to review instead
    fn price_adjustment(
        &self,
        ctx: &OperationContext,
        contract: ContractId,
        terms: &LdTerms,
        measurement: &ObligationMeasurement,
    ) -> Result<Option<Money>, String> {
        let Some(group) = &terms.priced_tariff_group else {
            return Ok(None);
        };
        let Some(quantity) = measurement.adjustment_quantity else {
            return Ok(None);
        };
        let Some(tariff) = self
            .tariffs
            .current_by_group(contract, group, measurement.billing_month)
        else {
            return Err(format!("no current tariff for group {group:?}"));
        };
        let outcome = self
            .resolver
            .resolve_rate(ctx, tariff.id, measurement.billing_month)
            .map_err(|e| e.to_string())?;
        match outcome {
            RateOutcome::Resolved(rate) => Ok(Some(
                Money::new(rate.rate * quantity, rate.currency).rounded(),
            )),
            RateOutcome::Pending(reason) => Err(format!(
                "rate for tariff group {group:?} is pending: {reason:?}"
            )),
        }
    }
}
